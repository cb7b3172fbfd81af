//! Payment proof verification against the ledger.
//!
//! This is the core payment verification logic for overflow-gate. Every fact
//! in a [`VerifiedPayment`] comes from the ledger's copy of the transaction;
//! nothing the client claims about amount or asset is trusted.

use crate::error::Result;
use crate::ledger::{ExecutionStatus, LedgerClient, LedgerTransaction};
use crate::payment::cache::{CacheStats, VerifiedCache};
use crate::payment::consumed::ConsumedReferences;
use crate::payment::reference::TransactionReference;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for the payment verifier.
#[derive(Debug, Clone)]
pub struct PaymentVerifierConfig {
    /// Account or object that must receive payments.
    pub treasury: String,
    /// Coin type payments must be made in.
    pub coin_type: String,
    /// Cache capacity (number of transactions to cache).
    pub cache_capacity: usize,
}

/// A payment proven by the ledger.
///
/// Only the verifier constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPayment {
    /// Transaction reference.
    pub reference: TransactionReference,
    /// Actual signer of the transaction.
    pub sender: String,
    /// Receiving treasury.
    pub recipient: String,
    /// Coin type paid.
    pub asset: String,
    /// Total amount paid to the treasury in that coin.
    pub amount: Decimal,
    /// Checkpoint of inclusion.
    pub checkpoint: Option<u64>,
    /// Ledger timestamp in milliseconds.
    pub timestamp_ms: Option<u64>,
}

/// Why a payment proof was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectReason {
    /// The reference is not a well-formed digest.
    Malformed {
        /// What was wrong with it.
        detail: String,
    },
    /// The transaction aborted on-chain.
    TransactionFailed {
        /// Abort reason.
        error: String,
    },
    /// Nothing was paid to the treasury.
    WrongRecipient,
    /// The treasury was paid in another coin.
    WrongAsset,
    /// Less than the price was paid.
    InsufficientAmount {
        /// Price of the resource.
        required: Decimal,
        /// Amount found on the ledger.
        paid: Decimal,
    },
    /// The presenting account did not sign the transaction.
    SenderMismatch,
    /// The reference was already redeemed for this resource.
    AlreadyConsumed,
    /// The subject still holds an unexpired grant for this resource.
    ActiveGrant {
        /// Expiry of the existing grant, Unix milliseconds.
        expires_at: i64,
    },
    /// The resource does not exist.
    UnknownResource {
        /// Requested resource id.
        resource: String,
    },
}

impl RejectReason {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::TransactionFailed { .. } => "transaction_failed",
            Self::WrongRecipient => "wrong_recipient",
            Self::WrongAsset => "wrong_asset",
            Self::InsufficientAmount { .. } => "insufficient_amount",
            Self::SenderMismatch => "sender_mismatch",
            Self::AlreadyConsumed => "already_consumed",
            Self::ActiveGrant { .. } => "active_grant",
            Self::UnknownResource { .. } => "unknown_resource",
        }
    }

    /// What the caller should do next.
    #[must_use]
    pub fn hint(&self) -> String {
        match self {
            Self::Malformed { .. } => {
                "Send `Authorization: x402 <transaction digest>` with the digest returned by your wallet.".to_string()
            }
            Self::TransactionFailed { .. } => {
                "The payment transaction failed on-chain. Submit a new payment.".to_string()
            }
            Self::WrongRecipient | Self::WrongAsset => {
                "Payment invalid: pay the advertised destination in the advertised asset.".to_string()
            }
            Self::InsufficientAmount { required, .. } => {
                format!("Payment invalid: at least {required} is required. Submit a new payment.")
            }
            Self::SenderMismatch => {
                "Payment invalid: present the proof from the wallet that signed it.".to_string()
            }
            Self::AlreadyConsumed => {
                "This payment was already used. Submit a new payment.".to_string()
            }
            Self::ActiveGrant { .. } => {
                "You already have active access. Your payment was not used; keep it for a later round.".to_string()
            }
            Self::UnknownResource { .. } => "No such resource.".to_string(),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { detail } => write!(f, "malformed payment proof: {detail}"),
            Self::TransactionFailed { error } => write!(f, "payment transaction failed: {error}"),
            Self::WrongRecipient => f.write_str("payment not sent to the treasury"),
            Self::WrongAsset => f.write_str("payment made in the wrong asset"),
            Self::InsufficientAmount { required, paid } => {
                write!(f, "insufficient payment: required {required}, paid {paid}")
            }
            Self::SenderMismatch => f.write_str("payment signed by a different account"),
            Self::AlreadyConsumed => f.write_str("payment already consumed"),
            Self::ActiveGrant { expires_at } => {
                write!(f, "access already granted until {expires_at}")
            }
            Self::UnknownResource { resource } => write!(f, "unknown resource {resource}"),
        }
    }
}

/// Result of verifying a proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The ledger confirms the payment.
    Verified(VerifiedPayment),
    /// The transaction is not visible yet; retry later with the same reference.
    Pending,
    /// The proof is invalid for this resource.
    Rejected(RejectReason),
}

/// Verifies payment proofs against the ledger.
///
/// Combines:
/// 1. Shape checks on the reference (no network)
/// 2. The per-resource consumed-reference record
/// 3. An LRU cache of successful transactions
/// 4. Ledger lookups for everything else
pub struct PaymentVerifier {
    ledger: Arc<dyn LedgerClient>,
    cache: VerifiedCache,
    consumed: Arc<ConsumedReferences>,
    config: PaymentVerifierConfig,
}

impl PaymentVerifier {
    /// Create a new payment verifier.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        consumed: Arc<ConsumedReferences>,
        config: PaymentVerifierConfig,
    ) -> Self {
        let cache = VerifiedCache::with_capacity(config.cache_capacity);

        info!(
            treasury = %config.treasury,
            coin_type = %config.coin_type,
            cache_capacity = config.cache_capacity,
            "Payment verifier initialized"
        );

        Self {
            ledger,
            cache,
            consumed,
            config,
        }
    }

    /// Verify a payment proof for `resource` without consuming it.
    ///
    /// Steps:
    /// 1. Reject malformed references without any ledger query
    /// 2. Reject references already consumed for this resource
    /// 3. Fetch the transaction (cache, then ledger); a miss is `Pending`
    /// 4. Require on-chain success
    /// 5. Require payment to the treasury, in the configured coin, of at
    ///    least `price`
    /// 6. If a sender was claimed, require it to be the signer
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger stayed unreachable through all
    /// retries; the caller may retry later.
    pub async fn verify(
        &self,
        resource: &str,
        price: Decimal,
        raw_reference: &str,
        claimed_sender: Option<&str>,
    ) -> Result<Verification> {
        let reference = match TransactionReference::parse(raw_reference) {
            Ok(reference) => reference,
            Err(e) => {
                debug!(resource, error = %e, "Malformed payment reference");
                return Ok(Verification::Rejected(RejectReason::Malformed {
                    detail: e.to_string(),
                }));
            }
        };

        if self.consumed.is_consumed(resource, &reference) {
            debug!(resource, reference = %reference, "Payment reference already consumed");
            return Ok(Verification::Rejected(RejectReason::AlreadyConsumed));
        }

        let tx = match self.cache.get(reference.as_str()) {
            Some(tx) => tx,
            None => match self.ledger.get_transaction(reference.as_str()).await? {
                Some(tx) => tx,
                None => {
                    debug!(resource, reference = %reference, "Payment not indexed yet");
                    return Ok(Verification::Pending);
                }
            },
        };

        let outcome = self.check(&reference, &tx, price, claimed_sender);
        match &outcome {
            Verification::Verified(payment) => {
                self.cache.insert(tx);
                debug!(
                    resource,
                    reference = %reference,
                    amount = %payment.amount,
                    sender = %payment.sender,
                    "Payment verified"
                );
            }
            Verification::Rejected(reason) => {
                warn!(resource, reference = %reference, %reason, "Payment rejected");
            }
            Verification::Pending => {}
        }
        Ok(outcome)
    }

    fn check(
        &self,
        reference: &TransactionReference,
        tx: &LedgerTransaction,
        price: Decimal,
        claimed_sender: Option<&str>,
    ) -> Verification {
        if let ExecutionStatus::Failure { error } = &tx.status {
            return Verification::Rejected(RejectReason::TransactionFailed {
                error: error.clone(),
            });
        }

        let to_treasury: Vec<_> = tx
            .transfers
            .iter()
            .filter(|t| same_address(&t.recipient, &self.config.treasury))
            .collect();
        if to_treasury.is_empty() {
            return Verification::Rejected(RejectReason::WrongRecipient);
        }

        let in_asset: Vec<_> = to_treasury
            .into_iter()
            .filter(|t| t.coin_type == self.config.coin_type)
            .collect();
        if in_asset.is_empty() {
            return Verification::Rejected(RejectReason::WrongAsset);
        }

        let paid: Decimal = in_asset.iter().map(|t| t.amount).sum();
        if paid < price {
            return Verification::Rejected(RejectReason::InsufficientAmount {
                required: price,
                paid,
            });
        }

        if let Some(claimed) = claimed_sender {
            if !same_address(claimed, &tx.sender) {
                return Verification::Rejected(RejectReason::SenderMismatch);
            }
        }

        Verification::Verified(VerifiedPayment {
            reference: reference.clone(),
            sender: tx.sender.clone(),
            recipient: self.config.treasury.clone(),
            asset: self.config.coin_type.clone(),
            amount: paid,
            checkpoint: tx.checkpoint,
            timestamp_ms: tx.timestamp_ms,
        })
    }

    /// Record `payment` as redeemed for `resource`.
    ///
    /// Returns `Ok(false)` if another redeem consumed it first; the caller
    /// must then refuse the grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumed record cannot be written. The
    /// payment stays unconsumed and no grant may be issued.
    pub async fn consume(&self, resource: &str, payment: &VerifiedPayment) -> Result<bool> {
        let won = self.consumed.try_consume(resource, &payment.reference).await?;
        if !won {
            warn!(resource, reference = %payment.reference, "Lost race to consume payment");
        }
        Ok(won)
    }

    /// Get cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The treasury payments must reach.
    #[must_use]
    pub fn treasury(&self) -> &str {
        &self.config.treasury
    }
}

/// Sui addresses are hex; compare without regard to case.
fn same_address(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
