//! Gate event system.

use rust_decimal::Decimal;
use tokio::sync::broadcast;

/// Events emitted by the gate and the balance listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// A payment was redeemed for access.
    AccessGranted {
        /// Resource id.
        resource: String,
        /// Paying account.
        subject: String,
        /// Transaction digest.
        reference: String,
    },

    /// A payment proof was refused.
    AccessRejected {
        /// Resource id.
        resource: String,
        /// Rejection code.
        code: &'static str,
    },

    /// The balance listener began polling.
    ListenerStarted,

    /// The balance listener stopped on request.
    ListenerStopped,

    /// The balance listener stopped on an unrecoverable error.
    ListenerFailed {
        /// Error message.
        message: String,
    },

    /// A treasury event changed a house balance.
    BalanceEventApplied {
        /// Account whose balance changed.
        account: String,
        /// Signed change: positive for deposits.
        delta: Decimal,
        /// Event id.
        event_id: String,
    },
}

/// Channel for receiving gate events.
pub type GateEventsChannel = broadcast::Receiver<GateEvent>;

/// Sender for gate events.
pub type GateEventsSender = broadcast::Sender<GateEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (GateEventsSender, GateEventsChannel) {
    broadcast::channel(256)
}
