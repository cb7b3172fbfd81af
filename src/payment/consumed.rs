//! Record of payment references already redeemed, per resource.
//!
//! This record is the single source of truth for "one payment, one grant":
//! [`ConsumedReferences::try_consume`] is an atomic test-and-insert, so of two
//! concurrent redeems of the same reference exactly one wins. For a persisted
//! record the insert only counts once it is on disk; a failed write is rolled
//! back and reported.

use crate::error::Result;
use crate::payment::TransactionReference;
use crate::snapshot;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

type Ledger = BTreeMap<String, BTreeSet<String>>;

/// Consumed `(resource, reference)` pairs, optionally persisted.
pub struct ConsumedReferences {
    inner: Mutex<Ledger>,
    path: Option<PathBuf>,
    // Held from insert until the snapshot is written, so snapshots land in
    // order and a rollback never races a newer write.
    writer: tokio::sync::Mutex<()>,
}

impl ConsumedReferences {
    /// An in-memory record (lost on restart).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Ledger::new()),
            path: None,
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a persisted record, loading any previous snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read.
    pub fn open(path: &Path) -> Result<Self> {
        let loaded: Ledger = snapshot::load(path)?.unwrap_or_default();
        debug!(
            path = %path.display(),
            resources = loaded.len(),
            "Loaded consumed payment references"
        );
        Ok(Self {
            inner: Mutex::new(loaded),
            path: Some(path.to_path_buf()),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Returns true if `reference` was already redeemed for `resource`.
    pub fn is_consumed(&self, resource: &str, reference: &TransactionReference) -> bool {
        self.inner
            .lock()
            .get(resource)
            .is_some_and(|refs| refs.contains(reference.as_str()))
    }

    /// Mark `reference` as redeemed for `resource`.
    ///
    /// Returns `Ok(false)` if it was already consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written; the reference is
    /// then left unconsumed.
    pub async fn try_consume(
        &self,
        resource: &str,
        reference: &TransactionReference,
    ) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(insert(&mut self.inner.lock(), resource, reference));
        };
        let _writer = self.writer.lock().await;

        let encoded = {
            let mut inner = self.inner.lock();
            if !insert(&mut inner, resource, reference) {
                return Ok(false);
            }
            snapshot::encode(&*inner)
        };
        let written = match encoded {
            Ok(bytes) => snapshot::write_off_thread(path.clone(), bytes).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            error!(
                resource,
                reference = %reference,
                error = %e,
                "Failed to record consumed reference; rolling back"
            );
            if let Some(refs) = self.inner.lock().get_mut(resource) {
                refs.remove(reference.as_str());
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Total consumed references across all resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().values().map(BTreeSet::len).sum()
    }

    /// Returns true if nothing has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn insert(ledger: &mut Ledger, resource: &str, reference: &TransactionReference) -> bool {
    ledger
        .entry(resource.to_string())
        .or_default()
        .insert(reference.as_str().to_string())
}
