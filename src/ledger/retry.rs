//! Bounded exponential backoff for ledger queries.

use crate::ledger::LedgerError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry schedule for ledger requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub(crate) fn jittered(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let quarter = u64::try_from(backoff.as_millis() / 4).unwrap_or(u64::MAX);
        if quarter == 0 {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(0..=quarter);
        backoff.saturating_add(Duration::from_millis(jitter))
    }

    /// Run `op`, retrying transient errors.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or the last transient error
    /// once all attempts are used.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.jittered(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Ledger request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run a lookup, treating "not found" as retryable indexing lag.
    ///
    /// Returns `Ok(None)` when the last attempt was a miss. A miss is never
    /// reported as an error.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or the last transient error
    /// when the final attempt failed that way.
    pub async fn lookup<T, F, Fut>(
        &self,
        operation: &str,
        mut op: F,
    ) -> Result<Option<T>, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, LedgerError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let outcome = op().await;
            let last = attempt + 1 >= attempts;
            match outcome {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) if last => return Ok(None),
                Err(e) if !e.is_transient() || last => return Err(e),
                Ok(None) => debug!(operation, attempt = attempt + 1, "Not indexed yet"),
                Err(e) => warn!(operation, attempt = attempt + 1, error = %e, "Lookup failed"),
            }
            tokio::time::sleep(self.jittered(attempt)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_run_recovers_from_transient() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(3)
            .run("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(LedgerError::Transient("reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast(3)
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Timeout(Duration::from_secs(1)))
            })
            .await;
        assert!(matches!(result, Err(LedgerError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_rpc_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast(5)
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Rpc {
                    code: -32602,
                    message: "bad params".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_miss_is_not_an_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Option<u8> = fast(4)
            .lookup("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_lookup_finds_after_indexing_lag() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(4)
            .lookup("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(None)
                } else {
                    Ok(Some("tx"))
                }
            })
            .await
            .unwrap();
        assert_eq!(result, Some("tx"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
