//! Client-triggered withdrawal confirmation.
//!
//! A client may report a withdrawal before the listener reaches the matching
//! event. The report carries only a digest and an account; the amount is
//! read from the transaction's own withdrawal event.

use crate::balance::BalanceStore;
use crate::error::Result;
use crate::ledger::{EventKind, LedgerClient};
use crate::payment::TransactionReference;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a withdrawal confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WithdrawalOutcome {
    /// The debit was applied (or had already been applied).
    Confirmed {
        /// Amount debited, from the ledger.
        amount: Decimal,
        /// False if the debit had been applied before.
        applied: bool,
    },
    /// The transaction is not visible yet.
    Pending,
    /// The transaction does not prove a withdrawal for this account.
    Rejected {
        /// Why.
        reason: String,
    },
}

/// Confirms withdrawals against the ledger before debiting.
pub struct WithdrawalConfirmer {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<BalanceStore>,
}

impl WithdrawalConfirmer {
    /// Create a confirmer.
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<BalanceStore>) -> Self {
        Self { ledger, store }
    }

    /// Confirm that `digest` withdrew funds for `account` and debit them.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger is unreachable.
    pub async fn confirm(&self, digest: &str, account: &str) -> Result<WithdrawalOutcome> {
        let reference = match TransactionReference::parse(digest) {
            Ok(reference) => reference,
            Err(e) => {
                return Ok(WithdrawalOutcome::Rejected {
                    reason: e.to_string(),
                })
            }
        };

        let Some(tx) = self.ledger.get_transaction(reference.as_str()).await? else {
            return Ok(WithdrawalOutcome::Pending);
        };

        if !tx.succeeded() {
            return Ok(reject(&reference, "withdrawal transaction failed"));
        }
        if !tx.sender.eq_ignore_ascii_case(account.trim()) {
            return Ok(reject(&reference, "account did not sign the withdrawal"));
        }

        let amount: Decimal = tx
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Withdrawal && e.account.eq_ignore_ascii_case(account.trim()))
            .map(|e| e.amount)
            .sum();
        if amount <= Decimal::ZERO {
            return Ok(reject(&reference, "no withdrawal event for this account"));
        }

        let applied = self
            .store
            .apply_verified_withdrawal(account, amount, reference.as_str())
            .await?;
        info!(reference = %reference, account, %amount, applied, "Withdrawal confirmed");
        Ok(WithdrawalOutcome::Confirmed { amount, applied })
    }
}

fn reject(reference: &TransactionReference, reason: &str) -> WithdrawalOutcome {
    warn!(reference = %reference, reason, "Withdrawal not confirmed");
    WithdrawalOutcome::Rejected {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryLedger, LedgerEvent, LedgerTransaction};
    use rust_decimal_macros::dec;

    fn digest(fill: char) -> String {
        fill.to_string().repeat(64)
    }

    fn setup() -> (Arc<InMemoryLedger>, Arc<BalanceStore>, WithdrawalConfirmer) {
        let ledger = Arc::new(InMemoryLedger::new());
        let store = Arc::new(BalanceStore::in_memory());
        let confirmer = WithdrawalConfirmer::new(ledger.clone(), store.clone());
        (ledger, store, confirmer)
    }

    fn withdrawal_tx(fill: char, account: &str, amount: Decimal) -> LedgerTransaction {
        LedgerTransaction::new(digest(fill), account).with_event(LedgerEvent::new(
            digest(fill),
            0,
            EventKind::Withdrawal,
            account,
            amount,
        ))
    }

    #[tokio::test]
    async fn test_amount_comes_from_ledger() {
        let (ledger, store, confirmer) = setup();
        store
            .apply_event(&LedgerEvent::new("d1", 0, EventKind::Deposit, "0xalice", dec!(10)))
            .unwrap();
        ledger.insert_transaction(withdrawal_tx('a', "0xalice", dec!(4)));

        let outcome = confirmer.confirm(&digest('a'), "0xalice").await.unwrap();
        assert_eq!(
            outcome,
            WithdrawalOutcome::Confirmed {
                amount: dec!(4),
                applied: true
            }
        );
        assert_eq!(store.get_balance("0xalice"), dec!(6));

        let again = confirmer.confirm(&digest('a'), "0xalice").await.unwrap();
        assert_eq!(
            again,
            WithdrawalOutcome::Confirmed {
                amount: dec!(4),
                applied: false
            }
        );
        assert_eq!(store.get_balance("0xalice"), dec!(6));
    }

    #[tokio::test]
    async fn test_pending_and_rejections() {
        let (ledger, store, confirmer) = setup();
        ledger.insert_unindexed(withdrawal_tx('b', "0xalice", dec!(1)));
        ledger.insert_transaction(withdrawal_tx('c', "0xalice", dec!(1)).failed("abort"));
        ledger.insert_transaction(withdrawal_tx('d', "0xalice", dec!(1)));
        ledger.insert_transaction(LedgerTransaction::new(digest('e'), "0xbob"));

        assert_eq!(
            confirmer.confirm(&digest('b'), "0xalice").await.unwrap(),
            WithdrawalOutcome::Pending
        );
        for (fill, account) in [('c', "0xalice"), ('d', "0xbob"), ('e', "0xbob")] {
            let outcome = confirmer.confirm(&digest(fill), account).await.unwrap();
            assert!(matches!(outcome, WithdrawalOutcome::Rejected { .. }), "{fill}: {outcome:?}");
        }
        assert!(matches!(
            confirmer.confirm("nope", "0xalice").await.unwrap(),
            WithdrawalOutcome::Rejected { .. }
        ));
        assert!(store.record("0xalice").is_none());
    }
}
