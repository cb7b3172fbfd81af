//! Error types for overflow-gate.

use crate::ledger::LedgerError;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in overflow-gate.
///
/// Payment rejections are not errors: they are reported as
/// [`RejectReason`](crate::payment::RejectReason) values so callers can tell
/// "retry later" from "pay again".
#[derive(Error, Debug)]
pub enum Error {
    /// Required configuration is missing or invalid. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Ledger query failed after all retries.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The balance listener hit an unrecoverable condition.
    #[error("listener stopped: {0}")]
    ListenerFatal(String),

    /// Balance store error.
    #[error("balance error: {0}")]
    Balance(String),

    /// HTTP server error.
    #[error("server error: {0}")]
    Server(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns true if retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_transient(),
            _ => false,
        }
    }
}
