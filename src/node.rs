//! Node implementation: wires the ledger, gate, balance services and HTTP
//! server together.

use crate::api::{self, ApiState, Services};
use crate::balance::{BalanceListener, BalanceStore, WithdrawalConfirmer};
use crate::config::GateConfig;
use crate::error::{Error, Result};
use crate::event::{create_event_channel, GateEvent, GateEventsChannel, GateEventsSender};
use crate::gate::{InsightProvider, PaymentGate, PlaceholderInsights, ResourcePolicy};
use crate::ledger::{EventFilter, LedgerClient, SuiRpcClient};
use crate::payment::{ConsumedReferences, PaymentVerifier, PaymentVerifierConfig};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Number of verified transactions kept in memory.
const VERIFIED_CACHE_CAPACITY: usize = 10_000;

/// Builder for constructing a gate node.
pub struct GateNodeBuilder {
    config: GateConfig,
    ledger: Option<Arc<dyn LedgerClient>>,
    insights: Option<Arc<dyn InsightProvider>>,
}

impl GateNodeBuilder {
    /// Create a new node builder with the given configuration.
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            ledger: None,
            insights: None,
        }
    }

    /// Use `ledger` instead of a JSON-RPC client built from the config.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerClient>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Serve insights from `insights` instead of the placeholder texts.
    #[must_use]
    pub fn with_insights(mut self, insights: Arc<dyn InsightProvider>) -> Self {
        self.insights = Some(insights);
        self
    }

    /// Build the node and bind its HTTP listener.
    ///
    /// Incomplete ledger settings do not fail the build: payment routes then
    /// answer 503 until the operator fixes the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory, the snapshots or the listen
    /// address cannot be opened.
    pub async fn build(self) -> Result<RunningGateNode> {
        info!(
            root_dir = %self.config.root_dir.display(),
            network = %self.config.ledger.network,
            listen = %self.config.server.listen_addr,
            "Building overflow-gate"
        );

        std::fs::create_dir_all(&self.config.root_dir)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, _) = create_event_channel();

        let store = Arc::new(BalanceStore::open(&self.config.snapshot_path())?);
        let network = self.config.ledger.network;

        let (state, listener, gate) = match self.config.ledger.validate() {
            Ok(target) => {
                let ledger: Arc<dyn LedgerClient> = match self.ledger {
                    Some(ledger) => ledger,
                    None => {
                        info!(
                            endpoint = %target.rpc_endpoint,
                            public_fullnode = network.public_fullnode_url(),
                            "Using Sui JSON-RPC ledger"
                        );
                        Arc::new(SuiRpcClient::new(
                            target.clone(),
                            self.config.ledger.request_timeout(),
                            self.config.ledger.retry_policy(),
                        )?)
                    }
                };

                let consumed = Arc::new(ConsumedReferences::open(&self.config.consumed_path())?);
                let verifier = Arc::new(PaymentVerifier::new(
                    Arc::clone(&ledger),
                    consumed,
                    PaymentVerifierConfig {
                        treasury: target.treasury_object_id.clone(),
                        coin_type: target.usdc_type.clone(),
                        cache_capacity: VERIFIED_CACHE_CAPACITY,
                    },
                ));

                let resources = &self.config.resources;
                let gate = Arc::new(
                    PaymentGate::new(
                        [
                            ResourcePolicy::ai_insight(resources.insight_price),
                            ResourcePolicy::blitz_round(
                                resources.blitz_price,
                                Duration::from_secs(resources.blitz_window_secs),
                                resources.blitz_multiplier,
                            ),
                        ],
                        verifier,
                        events_tx.clone(),
                    )
                    .with_grant_record(&self.config.grants_path())?,
                );

                let listener = BalanceListener::new(
                    Arc::clone(&ledger),
                    Arc::clone(&store),
                    EventFilter {
                        package: target.treasury_package_id.clone(),
                        module: self.config.listener.event_module.clone(),
                    },
                    self.config.listener.clone(),
                    events_tx.clone(),
                );

                let services = Services {
                    gate: Arc::clone(&gate),
                    insights: self
                        .insights
                        .unwrap_or_else(|| Arc::new(PlaceholderInsights)),
                    listener: listener.clone(),
                    confirmer: Arc::new(WithdrawalConfirmer::new(
                        Arc::clone(&ledger),
                        Arc::clone(&store),
                    )),
                    ledger,
                    treasury: target.treasury_object_id,
                    coin_type: target.usdc_type,
                };
                (
                    ApiState::ready(services, Arc::clone(&store), network),
                    Some(listener),
                    Some(gate),
                )
            }
            Err(Error::Config(reason)) => {
                warn!(%reason, "Ledger configuration incomplete; payment routes disabled");
                (
                    ApiState::misconfigured(reason, Arc::clone(&store), network),
                    None,
                    None,
                )
            }
            Err(e) => return Err(e),
        };

        let tcp = TcpListener::bind(self.config.server.listen_addr).await?;
        let local_addr = tcp.local_addr()?;

        Ok(RunningGateNode {
            config: self.config,
            local_addr,
            tcp: Some(tcp),
            router: Some(api::router(state)),
            listener,
            gate,
            store,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            events_tx,
        })
    }
}

/// Requests shutdown of a running node from anywhere.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Request the node to shut down.
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

/// A running gate node.
pub struct RunningGateNode {
    config: GateConfig,
    local_addr: SocketAddr,
    tcp: Option<TcpListener>,
    router: Option<Router>,
    listener: Option<BalanceListener>,
    gate: Option<Arc<PaymentGate>>,
    store: Arc<BalanceStore>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: GateEventsSender,
}

impl RunningGateNode {
    /// Address the HTTP server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The balance listener, if the ledger is configured.
    #[must_use]
    pub fn listener(&self) -> Option<&BalanceListener> {
        self.listener.as_ref()
    }

    /// The payment gate, if the ledger is configured.
    #[must_use]
    pub fn gate(&self) -> Option<&Arc<PaymentGate>> {
        self.gate.as_ref()
    }

    /// The balance store.
    #[must_use]
    pub fn store(&self) -> &Arc<BalanceStore> {
        &self.store
    }

    /// Subscribe to gate events.
    #[must_use]
    pub fn subscribe_events(&self) -> GateEventsChannel {
        self.events_tx.subscribe()
    }

    /// A handle that can stop the node after `run` has taken it.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Serve HTTP until shutdown is requested or Ctrl-C is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails or the node has already run.
    pub async fn run(&mut self) -> Result<()> {
        let (Some(tcp), Some(router)) = (self.tcp.take(), self.router.take()) else {
            return Err(Error::Server("node has already run".to_string()));
        };

        info!(addr = %self.local_addr, "Starting overflow-gate");

        let event_logger = tokio::spawn(log_events(self.events_tx.subscribe()));

        if self.config.listener.autostart {
            match &self.listener {
                Some(listener) => {
                    listener.start();
                }
                None => warn!("Listener autostart requested but the ledger is not configured"),
            }
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        let signal = async move {
            tokio::select! {
                _ = shutdown_rx.wait_for(|stop| *stop) => info!("Shutdown signal received"),
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, initiating shutdown"),
            }
        };

        let served = axum::serve(tcp, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| Error::Server(e.to_string()));

        if let Some(listener) = &self.listener {
            listener.stop().await;
        }
        if let Err(e) = self.store.persist().await {
            error!(error = %e, "Failed to persist balances at shutdown");
        }
        event_logger.abort();

        info!("Node shutdown complete");
        served
    }

    /// Request the node to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn log_events(mut events: GateEventsChannel) {
    loop {
        match events.recv().await {
            Ok(GateEvent::AccessGranted {
                resource,
                subject,
                reference,
            }) => info!(resource, subject, reference, "event: access granted"),
            Ok(GateEvent::AccessRejected { resource, code }) => {
                info!(resource, code, "event: access rejected");
            }
            Ok(GateEvent::ListenerStarted) => info!("event: listener started"),
            Ok(GateEvent::ListenerStopped) => info!("event: listener stopped"),
            Ok(GateEvent::ListenerFailed { message }) => {
                error!(error = %message, "event: listener failed");
            }
            Ok(GateEvent::BalanceEventApplied {
                account,
                delta,
                event_id,
            }) => info!(account, %delta, event_id, "event: balance changed"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
