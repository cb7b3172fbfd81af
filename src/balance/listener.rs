//! Supervised treasury event listener.
//!
//! One [`BalanceListener`] is created per process and injected where needed.
//! Its lifecycle is `Stopped → Starting → Running → Stopping → Stopped`; all
//! transitions happen under a single lock, so concurrent `start`/`stop` calls
//! are linearizable and `start` never spawns a second poller.
//!
//! The poller reads events strictly after the store's cursor, applies each
//! page in ledger order, then persists. Cancellation is only observed between
//! pages, never inside one.

use crate::balance::BalanceStore;
use crate::config::ListenerConfig;
use crate::error::Error;
use crate::event::{GateEvent, GateEventsSender};
use crate::ledger::{EventFilter, EventKind, LedgerClient, LedgerError, LedgerEvent, RetryPolicy};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    /// Not polling.
    Stopped,
    /// Spawning the poller.
    Starting,
    /// Polling.
    Running,
    /// Finishing the current page before stopping.
    Stopping,
}

/// Snapshot of the listener's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    /// True while running.
    pub is_listening: bool,
    /// Lifecycle state.
    pub state: ListenerState,
    /// Last event applied, as `digest:seq`.
    pub cursor: Option<String>,
    /// Error that stopped the listener, if any.
    pub last_error: Option<String>,
    /// Events applied since the process started.
    pub events_applied: u64,
}

struct Control {
    state: ListenerState,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    last_error: Option<String>,
}

struct Shared {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<BalanceStore>,
    filter: EventFilter,
    config: ListenerConfig,
    events: GateEventsSender,
    control: Mutex<Control>,
    events_applied: AtomicU64,
}

/// Lifecycle-controlled poller feeding the [`BalanceStore`].
#[derive(Clone)]
pub struct BalanceListener {
    shared: Arc<Shared>,
}

impl BalanceListener {
    /// Create a stopped listener.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<BalanceStore>,
        filter: EventFilter,
        config: ListenerConfig,
        events: GateEventsSender,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                ledger,
                store,
                filter,
                config,
                events,
                control: Mutex::new(Control {
                    state: ListenerState::Stopped,
                    shutdown: None,
                    task: None,
                    last_error: None,
                }),
                events_applied: AtomicU64::new(0),
            }),
        }
    }

    /// Start polling. A no-op reporting the current status unless stopped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> ListenerStatus {
        {
            let mut control = self.shared.control.lock();
            if control.state != ListenerState::Stopped {
                debug!(state = ?control.state, "Listener already active");
                drop(control);
                return self.status();
            }

            control.state = ListenerState::Starting;
            control.last_error = None;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let shared = Arc::clone(&self.shared);
            control.task = Some(tokio::spawn(poll_loop(shared, shutdown_rx)));
            control.shutdown = Some(shutdown_tx);
            control.state = ListenerState::Running;
        }

        info!(
            package = %self.shared.filter.package,
            module = %self.shared.filter.module,
            cursor = ?self.shared.store.cursor().map(|c| c.to_string()),
            "Balance listener started"
        );
        let _ = self.shared.events.send(GateEvent::ListenerStarted);
        self.status()
    }

    /// Stop polling after the current page and persist the cursor.
    ///
    /// A no-op reporting the current status unless running.
    pub async fn stop(&self) -> ListenerStatus {
        let (shutdown, task) = {
            let mut control = self.shared.control.lock();
            if control.state != ListenerState::Running {
                drop(control);
                return self.status();
            }
            control.state = ListenerState::Stopping;
            (control.shutdown.take(), control.task.take())
        };

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Balance listener task panicked");
            }
        }
        if let Err(e) = self.shared.store.persist().await {
            warn!(error = %e, "Failed to persist balances on stop");
        }

        self.shared.control.lock().state = ListenerState::Stopped;
        info!("Balance listener stopped");
        let _ = self.shared.events.send(GateEvent::ListenerStopped);
        self.status()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ListenerStatus {
        let (state, last_error) = {
            let control = self.shared.control.lock();
            (control.state, control.last_error.clone())
        };
        ListenerStatus {
            is_listening: state == ListenerState::Running,
            state,
            cursor: self.shared.store.cursor().map(|c| c.to_string()),
            last_error,
            events_applied: self.shared.events_applied.load(Ordering::SeqCst),
        }
    }

    /// Returns true while running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.shared.control.lock().state == ListenerState::Running
    }
}

async fn poll_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let backoff = RetryPolicy {
        max_attempts: u32::MAX,
        base_delay: shared.config.poll_interval(),
        max_delay: shared.config.max_backoff(),
    };
    let mut failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let cursor = shared.store.cursor();
        let fetched = tokio::select! {
            _ = shutdown.changed() => break,
            page = shared.ledger.get_events(&shared.filter, cursor.as_ref(), shared.config.page_size) => page,
        };

        let delay = match fetched {
            Ok(page) => {
                failures = 0;
                if let Err(e) = apply_page(&shared, &page.events).await {
                    fail(&shared, &e);
                    return;
                }
                if page.has_next_page {
                    continue;
                }
                shared.config.poll_interval()
            }
            Err(e) if e.is_transient() => {
                let delay = backoff.jittered(failures);
                failures = failures.saturating_add(1);
                warn!(
                    error = %e,
                    failures,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Event query failed, backing off"
                );
                delay
            }
            Err(e) => {
                fail(&shared, &fatal(&e));
                return;
            }
        };

        if sleep_or_shutdown(&mut shutdown, delay).await {
            break;
        }
    }
    debug!("Balance listener loop exited");
}

/// Apply one page in order, then persist. Fails with
/// [`Error::ListenerFatal`] if an event cannot be applied.
async fn apply_page(shared: &Shared, events: &[LedgerEvent]) -> Result<(), Error> {
    for event in events {
        match shared.store.apply_event(event) {
            Ok(true) => {
                shared.events_applied.fetch_add(1, Ordering::SeqCst);
                let delta = match event.kind {
                    EventKind::Deposit => event.amount,
                    EventKind::Withdrawal => -event.amount,
                };
                let _ = shared.events.send(GateEvent::BalanceEventApplied {
                    account: event.account.clone(),
                    delta,
                    event_id: event.id.to_string(),
                });
            }
            Ok(false) => {}
            Err(e) => {
                // Persist what was applied so the cursor stops right before
                // the offending event.
                if let Err(persist) = shared.store.persist().await {
                    warn!(error = %persist, "Failed to persist balances");
                }
                return Err(Error::ListenerFatal(format!("event {}: {e}", event.id)));
            }
        }
    }
    if !events.is_empty() {
        if let Err(e) = shared.store.persist().await {
            warn!(error = %e, "Failed to persist balances");
        }
        debug!(count = events.len(), "Applied event page");
    }
    Ok(())
}

fn fatal(e: &LedgerError) -> Error {
    match e {
        LedgerError::Schema(detail) => {
            Error::ListenerFatal(format!("unexpected event schema: {detail}"))
        }
        other => Error::ListenerFatal(other.to_string()),
    }
}

fn fail(shared: &Shared, e: &Error) {
    let message = e.to_string();
    error!(error = %message, "Balance listener stopped on unrecoverable error");
    {
        let mut control = shared.control.lock();
        control.last_error = Some(message.clone());
        if control.state == ListenerState::Running {
            control.state = ListenerState::Stopped;
            control.shutdown = None;
            control.task = None;
        }
    }
    let _ = shared.events.send(GateEvent::ListenerFailed { message });
}

/// Sleep for `delay`; returns true if shutdown was requested meanwhile.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        () = tokio::time::sleep(delay) => false,
    }
}
