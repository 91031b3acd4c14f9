//! Bounded retry-with-backoff policy for contended store writes.
//!
//! Storage-level write contention (two subsystems flushing at once) is
//! expected and transient. Mutating operations run through [`with_retry`],
//! which retries `Contended` failures with a linearly increasing delay and
//! surfaces `RetryExhausted` once the attempt budget runs out. Every other
//! error propagates immediately.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{StoreError, StoreResult};

/// Retry policy for contended store mutations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts before giving up
    pub max_attempts: u32,
    /// Base backoff delay; attempt N sleeps `backoff_base * N`
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, after `attempt` failures (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

/// Run a store operation, retrying on lock contention.
///
/// The operation is re-invoked from scratch on each attempt, so it must be
/// safe to repeat (contended attempts never partially apply). Non-contention
/// errors are returned unchanged on the first occurrence.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(StoreError::Contended) if attempt < policy.max_attempts => {
                let delay = policy.backoff_for(attempt);
                log::warn!(
                    "store contended on attempt {}/{}, retrying in {:?}",
                    attempt,
                    policy.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(StoreError::Contended) => {
                log::error!(
                    "store still contended after {} attempts, giving up",
                    policy.max_attempts
                );
                return Err(StoreError::RetryExhausted {
                    attempts: policy.max_attempts,
                    source: Box::new(StoreError::Contended),
                });
            }
            Err(other) => return Err(other),
        }
    }
}
