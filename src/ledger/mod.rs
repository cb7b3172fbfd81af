//! Read-only access to the Sui ledger.
//!
//! The rest of the crate talks to the ledger exclusively through the
//! [`LedgerClient`] trait:
//!
//! - `get_transaction`: fetch a transaction by digest. `Ok(None)` means the
//!   transaction is not visible yet (indexing lag), not that it is invalid.
//! - `get_events`: page through treasury deposit/withdrawal events in ledger
//!   order, restartable from any cursor.
//! - `get_account_balance`: read an account's coin balance.
//!
//! Transient failures are retried with bounded exponential backoff by the
//! implementation (see [`RetryPolicy`]); callers only see them once retries
//! are exhausted.

mod memory;
mod retry;
mod sui;

pub use memory::InMemoryLedger;
pub use retry::RetryPolicy;
pub use sui::SuiRpcClient;

use futures::future::BoxFuture;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Errors returned by ledger queries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// Network or node-side failure that may succeed on retry.
    #[error("ledger request failed: {0}")]
    Transient(String),

    /// The node did not answer within the request timeout.
    #[error("ledger request timed out after {0:?}")]
    Timeout(Duration),

    /// The node rejected the request.
    #[error("ledger RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the node.
        message: String,
    },

    /// The response did not have the expected shape.
    #[error("unexpected ledger data: {0}")]
    Schema(String),
}

impl LedgerError {
    /// Returns true for failures worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Execution status of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Executed successfully.
    Success,
    /// Aborted on-chain.
    Failure {
        /// Abort reason reported by the ledger.
        error: String,
    },
}

/// A coin movement into an account observed in a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Receiving account or object.
    pub recipient: String,
    /// Full coin type.
    pub coin_type: String,
    /// Amount in coin units.
    pub amount: Decimal,
}

/// A transaction as observed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Transaction digest.
    pub digest: String,
    /// Signer of the transaction.
    pub sender: String,
    /// Execution status.
    pub status: ExecutionStatus,
    /// Incoming coin movements.
    pub transfers: Vec<Transfer>,
    /// Treasury events emitted by the transaction.
    pub events: Vec<LedgerEvent>,
    /// Checkpoint the transaction was included in.
    pub checkpoint: Option<u64>,
    /// Ledger timestamp in milliseconds.
    pub timestamp_ms: Option<u64>,
}

impl LedgerTransaction {
    /// A successful transaction with no transfers or events.
    #[must_use]
    pub fn new(digest: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            sender: sender.into(),
            status: ExecutionStatus::Success,
            transfers: Vec::new(),
            events: Vec::new(),
            checkpoint: None,
            timestamp_ms: None,
        }
    }

    /// Add an incoming transfer.
    #[must_use]
    pub fn with_transfer(
        mut self,
        recipient: impl Into<String>,
        coin_type: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        self.transfers.push(Transfer {
            recipient: recipient.into(),
            coin_type: coin_type.into(),
            amount,
        });
        self
    }

    /// Add an emitted treasury event.
    #[must_use]
    pub fn with_event(mut self, event: LedgerEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Mark the transaction as aborted.
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = ExecutionStatus::Failure {
            error: error.into(),
        };
        self
    }

    /// Set the checkpoint.
    #[must_use]
    pub fn at_checkpoint(mut self, checkpoint: u64, timestamp_ms: u64) -> Self {
        self.checkpoint = Some(checkpoint);
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Returns true if the transaction executed successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Identifier of a ledger event; also the paging cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    /// Digest of the emitting transaction.
    pub tx_digest: String,
    /// Position of the event within the transaction.
    pub event_seq: u64,
}

impl EventId {
    /// Create an event id.
    #[must_use]
    pub fn new(tx_digest: impl Into<String>, event_seq: u64) -> Self {
        Self {
            tx_digest: tx_digest.into(),
            event_seq,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_digest, self.event_seq)
    }
}

/// Direction of a treasury balance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Funds moved into the treasury for `account`.
    Deposit,
    /// Funds moved out of the treasury to `account`.
    Withdrawal,
}

/// A treasury deposit or withdrawal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Unique event id.
    pub id: EventId,
    /// Deposit or withdrawal.
    pub kind: EventKind,
    /// Account whose house balance changes.
    pub account: String,
    /// Amount in coin units.
    pub amount: Decimal,
    /// Digest of the transaction that emitted the event.
    pub reference: String,
    /// Ledger timestamp in milliseconds.
    pub timestamp_ms: Option<u64>,
}

impl LedgerEvent {
    /// Build an event emitted by transaction `reference` at position `event_seq`.
    #[must_use]
    pub fn new(
        reference: impl Into<String>,
        event_seq: u64,
        kind: EventKind,
        account: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        let reference = reference.into();
        Self {
            id: EventId::new(reference.clone(), event_seq),
            kind,
            account: account.into(),
            amount,
            reference,
            timestamp_ms: None,
        }
    }
}

/// Which Move module's events to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Package id.
    pub package: String,
    /// Module name.
    pub module: String,
}

/// One page of events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPage {
    /// Events in ledger order.
    pub events: Vec<LedgerEvent>,
    /// Cursor to resume after this page.
    pub next_cursor: Option<EventId>,
    /// Whether more events are immediately available.
    pub has_next_page: bool,
}

/// Read-only ledger interface.
///
/// Implementations must bound every request with a timeout so a slow node
/// cannot stall a caller indefinitely.
pub trait LedgerClient: Send + Sync + 'static {
    /// Fetch a transaction by digest.
    ///
    /// `Ok(None)` after the final retry means "not visible yet".
    fn get_transaction<'a>(
        &'a self,
        digest: &'a str,
    ) -> BoxFuture<'a, Result<Option<LedgerTransaction>, LedgerError>>;

    /// Fetch events strictly after `since` (from the start when `None`).
    fn get_events<'a>(
        &'a self,
        filter: &'a EventFilter,
        since: Option<&'a EventId>,
        limit: usize,
    ) -> BoxFuture<'a, Result<EventPage, LedgerError>>;

    /// Fetch the balance of `coin_type` held by `account`.
    fn get_account_balance<'a>(
        &'a self,
        account: &'a str,
        coin_type: &'a str,
    ) -> BoxFuture<'a, Result<Decimal, LedgerError>>;
}
