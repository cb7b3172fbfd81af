//! Test harness that runs a gate node against an in-memory ledger.
//!
//! The `TestHarness` boots a real node (HTTP server on `127.0.0.1:0`) with an
//! [`InMemoryLedger`] injected, so tests can submit "payments" and treasury
//! events directly and observe the results over HTTP.

use overflow_gate::balance::{BalanceListener, BalanceStore};
use overflow_gate::ledger::{EventKind, InMemoryLedger, LedgerEvent, LedgerTransaction};
use overflow_gate::node::ShutdownHandle;
use overflow_gate::{GateConfig, GateEvent, GateEventsChannel, GateNodeBuilder, PaymentGate};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::info;

/// Treasury object every test pays into.
pub const TREASURY: &str = "0x7a11e5";

/// Stablecoin type used by the tests.
pub const USDC: &str = "0xa11ce::usdc::USDC";

/// Treasury package id.
pub const PACKAGE: &str = "0xfeed";

/// A 64-character digest made of one repeated character.
pub fn digest(fill: char) -> String {
    fill.to_string().repeat(64)
}

/// A configuration with complete ledger settings rooted at `root`.
pub fn configured(root: &Path) -> GateConfig {
    let mut config = GateConfig {
        root_dir: root.to_path_buf(),
        ..GateConfig::default()
    };
    config.server.listen_addr = SocketAddr::from(([127, 0, 0, 1], 0));
    config.ledger.rpc_endpoint = Some("http://127.0.0.1:9".to_string());
    config.ledger.treasury_package_id = Some(PACKAGE.to_string());
    config.ledger.treasury_object_id = Some(TREASURY.to_string());
    config.ledger.usdc_type = Some(USDC.to_string());
    config.listener.poll_interval_ms = 10;
    config.listener.max_backoff_ms = 50;
    config
}

/// A running node plus handles into its internals.
pub struct TestHarness {
    /// The ledger the node observes.
    pub ledger: Arc<InMemoryLedger>,
    addr: SocketAddr,
    http: reqwest::Client,
    shutdown: ShutdownHandle,
    task: JoinHandle<overflow_gate::Result<()>>,
    listener: Option<BalanceListener>,
    gate: Option<Arc<PaymentGate>>,
    store: Arc<BalanceStore>,
    events: GateEventsChannel,
}

impl TestHarness {
    /// Start a node with `config` observing `ledger`.
    pub async fn start(config: GateConfig, ledger: Arc<InMemoryLedger>) -> Self {
        let mut node = GateNodeBuilder::new(config)
            .with_ledger(ledger.clone())
            .build()
            .await
            .expect("node builds");

        let addr = node.local_addr();
        let shutdown = node.shutdown_handle();
        let listener = node.listener().cloned();
        let gate = node.gate().cloned();
        let store = Arc::clone(node.store());
        let events = node.subscribe_events();
        let task = tokio::spawn(async move { node.run().await });
        info!(%addr, "Test node running");

        Self {
            ledger,
            addr,
            http: reqwest::Client::new(),
            shutdown,
            task,
            listener,
            gate,
            store,
            events,
        }
    }

    /// Start a fully configured node in `root` with a fresh ledger.
    pub async fn setup(root: &Path) -> Self {
        Self::start(configured(root), Arc::new(InMemoryLedger::new())).await
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The node's balance listener.
    pub fn listener(&self) -> &BalanceListener {
        self.listener.as_ref().expect("ledger configured")
    }

    /// The node's payment gate.
    pub fn gate(&self) -> &Arc<PaymentGate> {
        self.gate.as_ref().expect("ledger configured")
    }

    /// The node's balance store.
    pub fn store(&self) -> &Arc<BalanceStore> {
        &self.store
    }

    /// Gate events published since the last call.
    pub fn drain_events(&mut self) -> Vec<GateEvent> {
        let mut seen = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => seen.push(event),
                Err(TryRecvError::Lagged(_)) => {}
                Err(_) => return seen,
            }
        }
    }

    /// Record a queryable payment of `amount` to the treasury.
    pub fn pay(&self, fill: char, sender: &str, amount: Decimal) -> String {
        let reference = digest(fill);
        self.ledger.insert_transaction(
            LedgerTransaction::new(reference.clone(), sender).with_transfer(TREASURY, USDC, amount),
        );
        reference
    }

    /// Record a payment that the ledger has not indexed yet.
    pub fn pay_unindexed(&self, fill: char, sender: &str, amount: Decimal) -> String {
        let reference = digest(fill);
        self.ledger.insert_unindexed(
            LedgerTransaction::new(reference.clone(), sender).with_transfer(TREASURY, USDC, amount),
        );
        reference
    }

    /// Append a treasury event to the ledger's event stream.
    pub fn emit(&self, reference: &str, kind: EventKind, account: &str, amount: Decimal) {
        self.ledger
            .push_event(LedgerEvent::new(reference, 0, kind, account, amount));
    }

    /// Stop the node and wait for it to exit.
    pub async fn teardown(self) -> overflow_gate::Result<()> {
        self.shutdown.shutdown();
        self.task.await.expect("node task joins")
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}
