//! LRU cache for verified ledger transactions.
//!
//! Finalized transactions never change, so once a successful transaction has
//! been fetched it can be served locally. Repeated presentations of the same
//! proof (a retry after `ActiveGrant`, the same payment shown to a second
//! resource) then skip the ledger round-trip.

use crate::ledger::LedgerTransaction;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Lookup counters, read through [`VerifiedCache::stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to go to the ledger.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served locally, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

struct Inner {
    entries: LruCache<String, LedgerTransaction>,
    stats: CacheStats,
}

/// Successful transactions keyed by digest.
pub struct VerifiedCache {
    inner: Mutex<Inner>,
}

impl VerifiedCache {
    /// Cache holding up to `capacity` transactions (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up a transaction by digest.
    pub fn get(&self, digest: &str) -> Option<LedgerTransaction> {
        let mut inner = self.inner.lock();
        let found = inner.entries.get(digest).cloned();
        if found.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        found
    }

    /// Remember `tx` if it executed successfully.
    pub fn insert(&self, tx: LedgerTransaction) {
        if !tx.succeeded() {
            return;
        }
        let mut inner = self.inner.lock();
        let digest = tx.digest.clone();
        if let Some((evicted, _)) = inner.entries.push(digest.clone(), tx) {
            if evicted != digest {
                inner.stats.evictions += 1;
            }
        }
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Number of cached transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_insert() {
        let cache = VerifiedCache::with_capacity(8);
        assert!(cache.is_empty());
        assert!(cache.get("D1").is_none());

        cache.insert(LedgerTransaction::new("D1", "0xalice"));
        assert_eq!(cache.get("D1").unwrap().sender, "0xalice");
        assert_eq!(cache.len(), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_transactions_are_not_cached() {
        let cache = VerifiedCache::with_capacity(8);
        cache.insert(LedgerTransaction::new("D1", "0xalice").failed("MoveAbort"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_least_recent_is_evicted() {
        let cache = VerifiedCache::with_capacity(2);
        cache.insert(LedgerTransaction::new("D1", "0xa"));
        cache.insert(LedgerTransaction::new("D2", "0xb"));
        assert!(cache.get("D1").is_some());
        cache.insert(LedgerTransaction::new("D3", "0xc"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("D2").is_none());
        assert!(cache.get("D1").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_reinsert_is_not_an_eviction() {
        let cache = VerifiedCache::with_capacity(1);
        cache.insert(LedgerTransaction::new("D1", "0xa"));
        cache.insert(LedgerTransaction::new("D1", "0xa"));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = VerifiedCache::with_capacity(0);
        cache.insert(LedgerTransaction::new("D1", "0xa"));
        assert_eq!(cache.len(), 1);
    }
}
