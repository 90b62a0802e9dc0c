//! Bounded exponential-backoff retry.
//!
//! One policy object replaces the ad hoc timer-based retries the domain
//! hooks used to carry individually. Only failures classified retryable are
//! retried; everything else propagates on the first attempt.
//!
//! Operations run under retry must be idempotent: executing them more than
//! once must produce the same effective outcome. Updates and deletes are;
//! plain inserts are not, which is why keyed domains insert through upsert
//! and unkeyed inserts run with `RetryPolicy::none`.

use crate::error::{SyncError, SyncResult};
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use vita_types::{RemoteError, RemoteResult};

/// Retry configuration for one operation class.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// A policy that never retries (single attempt).
    #[must_use]
    pub const fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Runs `operation`, retrying transient failures per the backend error
    /// taxonomy.
    pub async fn run<T, F, Fut>(&self, operation: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        self.run_classified(operation, RemoteError::is_retryable).await
    }

    /// Runs `operation` with a custom retryable/fatal classifier.
    ///
    /// Fatal failures propagate immediately. Retryable failures back off
    /// `base_delay * 2^n` between attempts; when attempts are exhausted the
    /// final failure is returned annotated as `RetriesExhausted`.
    pub async fn run_classified<T, F, Fut, C>(
        &self,
        mut operation: F,
        classify: C,
    ) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
        C: Fn(&RemoteError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if !classify(&err) => return Err(SyncError::Remote(err)),
                Err(err) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(SyncError::RetriesExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
