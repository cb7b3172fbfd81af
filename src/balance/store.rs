//! Authoritative off-chain balances.
//!
//! Balances change only through [`BalanceStore::apply_event`] (ledger
//! events, fed by the listener) and [`BalanceStore::apply_verified_withdrawal`]
//! (withdrawals confirmed against the ledger). Both are idempotent: an event
//! id or transaction reference seen once is never applied again, whichever
//! path delivered it first.
//!
//! A debit that arrives before the credits covering it is parked in
//! `pending_debit` and settled by later credits, so a stored balance is
//! never negative and the final balance equals in-order replay.

use crate::error::{Error, Result};
use crate::ledger::{EventId, EventKind, LedgerEvent};
use crate::snapshot;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Balance of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRecord {
    /// Account address.
    pub account: String,
    /// Spendable balance; never negative.
    pub balance: Decimal,
    /// Debits recorded ahead of the credits that cover them.
    pub pending_debit: Decimal,
    /// Id (or reference) of the last change applied.
    pub last_applied_event: Option<String>,
}

impl BalanceRecord {
    fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
            balance: Decimal::ZERO,
            pending_debit: Decimal::ZERO,
            last_applied_event: None,
        }
    }

    fn credit(&mut self, amount: Decimal) {
        let settled = amount.min(self.pending_debit);
        self.pending_debit -= settled;
        self.balance += amount - settled;
    }

    fn debit(&mut self, amount: Decimal) {
        if amount <= self.balance {
            self.balance -= amount;
        } else {
            self.pending_debit += amount - self.balance;
            self.balance = Decimal::ZERO;
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    balances: HashMap<String, BalanceRecord>,
    applied_events: HashSet<EventId>,
    applied_references: HashSet<String>,
    cursor: Option<EventId>,
}

/// Balance store with optional snapshot persistence.
pub struct BalanceStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
    // Serializes snapshot writes so an older state never lands last.
    writer: tokio::sync::Mutex<()>,
}

impl BalanceStore {
    /// A store that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            path: None,
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a persisted store, resuming from its snapshot if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read.
    pub fn open(path: &Path) -> Result<Self> {
        let state: StoreState = snapshot::load(path)?.unwrap_or_default();
        info!(
            path = %path.display(),
            accounts = state.balances.len(),
            cursor = ?state.cursor.as_ref().map(ToString::to_string),
            "Balance store opened"
        );
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path.to_path_buf()),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Apply a ledger event.
    ///
    /// Returns `Ok(false)` without changing anything if the event id or its
    /// transaction reference was already applied. The cursor advances in
    /// both cases.
    ///
    /// # Errors
    ///
    /// Returns `Error::Balance` for a negative amount.
    pub fn apply_event(&self, event: &LedgerEvent) -> Result<bool> {
        if event.amount.is_sign_negative() {
            return Err(Error::Balance(format!(
                "event {} carries negative amount {}",
                event.id, event.amount
            )));
        }

        let mut state = self.state.write();
        state.cursor = Some(event.id.clone());

        if state.applied_events.contains(&event.id)
            || state.applied_references.contains(&event.reference)
        {
            debug!(event_id = %event.id, "Event already applied");
            return Ok(false);
        }

        state.applied_events.insert(event.id.clone());
        state.applied_references.insert(event.reference.clone());

        let key = normalize(&event.account);
        let record = state
            .balances
            .entry(key.clone())
            .or_insert_with(|| BalanceRecord::new(&key));
        match event.kind {
            EventKind::Deposit => record.credit(event.amount),
            EventKind::Withdrawal => record.debit(event.amount),
        }
        record.last_applied_event = Some(event.id.to_string());

        debug!(
            event_id = %event.id,
            account = %key,
            kind = ?event.kind,
            amount = %event.amount,
            balance = %record.balance,
            "Event applied"
        );
        Ok(true)
    }

    /// Debit a withdrawal confirmed against the ledger.
    ///
    /// Guarded by `reference` exactly like [`Self::apply_event`]. The snapshot
    /// is written right away; a failed write is logged and the debit stands,
    /// to be captured by the next successful snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive amount.
    pub async fn apply_verified_withdrawal(
        &self,
        account: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<bool> {
        if amount <= Decimal::ZERO {
            return Err(Error::Balance(format!(
                "withdrawal {reference} has non-positive amount {amount}"
            )));
        }

        {
            let mut state = self.state.write();
            if !state.applied_references.insert(reference.to_string()) {
                debug!(reference, "Withdrawal already applied");
                return Ok(false);
            }
            let key = normalize(account);
            let record = state
                .balances
                .entry(key.clone())
                .or_insert_with(|| BalanceRecord::new(&key));
            record.debit(amount);
            record.last_applied_event = Some(reference.to_string());
            info!(account = %key, %amount, reference, "Withdrawal applied");
        }

        if let Err(e) = self.persist().await {
            warn!(error = %e, reference, "Failed to persist withdrawal; kept in memory");
        }
        Ok(true)
    }

    /// Current balance of `account` (zero if unknown).
    #[must_use]
    pub fn get_balance(&self, account: &str) -> Decimal {
        self.state
            .read()
            .balances
            .get(&normalize(account))
            .map_or(Decimal::ZERO, |r| r.balance)
    }

    /// Full record of `account`.
    #[must_use]
    pub fn record(&self, account: &str) -> Option<BalanceRecord> {
        self.state.read().balances.get(&normalize(account)).cloned()
    }

    /// Last event the store has seen.
    #[must_use]
    pub fn cursor(&self) -> Option<EventId> {
        self.state.read().cursor.clone()
    }

    /// Number of distinct ledger events applied.
    #[must_use]
    pub fn applied_events(&self) -> usize {
        self.state.read().applied_events.len()
    }

    /// Write the snapshot, if this store is persisted.
    ///
    /// The state is encoded under the read lock, so no half-applied change is
    /// captured; the file write runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _writer = self.writer.lock().await;
        let bytes = snapshot::encode(&*self.state.read())?;
        snapshot::write_off_thread(path.clone(), bytes).await
    }
}

fn normalize(account: &str) -> String {
    account.trim().to_ascii_lowercase()
}
