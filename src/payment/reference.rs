//! Transaction references presented as proof of payment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Authorization scheme used by clients presenting a payment proof.
pub const AUTH_SCHEME: &str = "x402";

/// Shortest accepted reference.
pub const MIN_REFERENCE_LEN: usize = 50;

/// Longest accepted reference.
pub const MAX_REFERENCE_LEN: usize = 128;

/// Why a reference was refused before any ledger query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    /// The Authorization header does not use the x402 scheme.
    #[error("authorization scheme must be `x402 <reference>`")]
    WrongScheme,

    /// Shorter than [`MIN_REFERENCE_LEN`].
    #[error("reference too short ({0} characters, need at least {MIN_REFERENCE_LEN})")]
    TooShort(usize),

    /// Longer than [`MAX_REFERENCE_LEN`].
    #[error("reference too long ({0} characters, at most {MAX_REFERENCE_LEN})")]
    TooLong(usize),

    /// Contains a character outside the digest alphabet.
    #[error("reference contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// A syntactically valid ledger transaction reference.
///
/// Construction only checks shape; whether the transaction exists and pays
/// what it should is decided by the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionReference(String);

impl TransactionReference {
    /// Validate a raw reference.
    ///
    /// Surrounding whitespace and an optional `0x` prefix are stripped.
    ///
    /// # Errors
    ///
    /// Returns a [`ReferenceError`] describing the first problem found.
    pub fn parse(raw: &str) -> Result<Self, ReferenceError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if let Some(bad) = body.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(ReferenceError::InvalidCharacter(bad));
        }
        let len = body.len();
        if len < MIN_REFERENCE_LEN {
            return Err(ReferenceError::TooShort(len));
        }
        if len > MAX_REFERENCE_LEN {
            return Err(ReferenceError::TooLong(len));
        }
        Ok(Self(body.to_string()))
    }

    /// Extract the reference from an `Authorization: x402 <reference>` value.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::WrongScheme`] for other schemes, or the
    /// reference's own validation error.
    pub fn from_authorization(header: &str) -> Result<Self, ReferenceError> {
        let (scheme, rest) = header
            .trim_start()
            .split_once(' ')
            .ok_or(ReferenceError::WrongScheme)?;
        if scheme != AUTH_SCHEME {
            return Err(ReferenceError::WrongScheme);
        }
        Self::parse(rest)
    }

    /// The reference text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TransactionReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TransactionReference {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TransactionReference> for String {
    fn from(value: TransactionReference) -> Self {
        value.0
    }
}

impl AsRef<str> for TransactionReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
