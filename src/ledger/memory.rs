//! In-process ledger for local development and tests.
//!
//! Transactions can be inserted "unindexed" to reproduce the lag between
//! submission and queryability, and transient failures can be injected to
//! exercise retry paths.

use crate::ledger::{
    EventFilter, EventId, EventPage, LedgerClient, LedgerError, LedgerEvent, LedgerTransaction,
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct MemoryState {
    transactions: HashMap<String, LedgerTransaction>,
    unindexed: HashSet<String>,
    events: Vec<LedgerEvent>,
    balances: HashMap<(String, String), Decimal>,
    failures_remaining: u32,
    schema_fault: Option<String>,
}

/// A ledger held entirely in memory.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<MemoryState>,
    transaction_queries: AtomicU64,
    event_queries: AtomicU64,
    balance_queries: AtomicU64,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction and make it immediately queryable.
    pub fn insert_transaction(&self, tx: LedgerTransaction) {
        let mut state = self.state.lock();
        state.unindexed.remove(&tx.digest);
        state.transactions.insert(tx.digest.clone(), tx);
    }

    /// Record a transaction that is not queryable until [`Self::index`].
    pub fn insert_unindexed(&self, tx: LedgerTransaction) {
        let mut state = self.state.lock();
        state.unindexed.insert(tx.digest.clone());
        state.transactions.insert(tx.digest.clone(), tx);
    }

    /// Make a previously unindexed transaction queryable.
    pub fn index(&self, digest: &str) {
        self.state.lock().unindexed.remove(digest);
    }

    /// Append an event to the treasury event stream.
    pub fn push_event(&self, event: LedgerEvent) {
        self.state.lock().events.push(event);
    }

    /// Set the balance of `coin_type` held by `account`.
    pub fn set_balance(&self, account: &str, coin_type: &str, amount: Decimal) {
        self.state
            .lock()
            .balances
            .insert((account.to_string(), coin_type.to_string()), amount);
    }

    /// Fail the next `count` requests with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures_remaining = count;
    }

    /// Make event queries fail with a schema error until cleared.
    pub fn set_schema_fault(&self, fault: Option<&str>) {
        self.state.lock().schema_fault = fault.map(str::to_string);
    }

    /// Number of `get_transaction` calls served so far.
    #[must_use]
    pub fn transaction_queries(&self) -> u64 {
        self.transaction_queries.load(Ordering::SeqCst)
    }

    /// Number of `get_events` calls served so far.
    #[must_use]
    pub fn event_queries(&self) -> u64 {
        self.event_queries.load(Ordering::SeqCst)
    }

    /// Number of `get_account_balance` calls served so far.
    #[must_use]
    pub fn balance_queries(&self) -> u64 {
        self.balance_queries.load(Ordering::SeqCst)
    }

    fn take_failure(state: &mut MemoryState) -> Result<(), LedgerError> {
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(LedgerError::Transient("injected failure".to_string()));
        }
        Ok(())
    }
}

impl LedgerClient for InMemoryLedger {
    fn get_transaction<'a>(
        &'a self,
        digest: &'a str,
    ) -> BoxFuture<'a, Result<Option<LedgerTransaction>, LedgerError>> {
        self.transaction_queries.fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut state = self.state.lock();
            Self::take_failure(&mut state).map(|()| {
                if state.unindexed.contains(digest) {
                    None
                } else {
                    state.transactions.get(digest).cloned()
                }
            })
        };
        Box::pin(async move { result })
    }

    fn get_events<'a>(
        &'a self,
        _filter: &'a EventFilter,
        since: Option<&'a EventId>,
        limit: usize,
    ) -> BoxFuture<'a, Result<EventPage, LedgerError>> {
        self.event_queries.fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut state = self.state.lock();
            Self::take_failure(&mut state).and_then(|()| {
                if let Some(fault) = &state.schema_fault {
                    return Err(LedgerError::Schema(fault.clone()));
                }
                let start = match since {
                    None => 0,
                    Some(cursor) => state
                        .events
                        .iter()
                        .position(|e| &e.id == cursor)
                        .map(|i| i + 1)
                        .ok_or_else(|| LedgerError::Rpc {
                            code: -32602,
                            message: format!("unknown event cursor {cursor}"),
                        })?,
                };
                let events: Vec<LedgerEvent> = state
                    .events
                    .iter()
                    .skip(start)
                    .take(limit.max(1))
                    .cloned()
                    .collect();
                let has_next_page = start + events.len() < state.events.len();
                let next_cursor = events
                    .last()
                    .map(|e| e.id.clone())
                    .or_else(|| since.cloned());
                Ok(EventPage {
                    events,
                    next_cursor,
                    has_next_page,
                })
            })
        };
        Box::pin(async move { result })
    }

    fn get_account_balance<'a>(
        &'a self,
        account: &'a str,
        coin_type: &'a str,
    ) -> BoxFuture<'a, Result<Decimal, LedgerError>> {
        self.balance_queries.fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut state = self.state.lock();
            Self::take_failure(&mut state).map(|()| {
                state
                    .balances
                    .get(&(account.to_string(), coin_type.to_string()))
                    .copied()
                    .unwrap_or(Decimal::ZERO)
            })
        };
        Box::pin(async move { result })
    }
}
