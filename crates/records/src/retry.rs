//! Bounded retry for optimistic transactions.
//!
//! [`with_conflict_retry`] re-runs a closure that builds and commits a
//! transaction whenever the commit loses a compare-and-set race. Any other
//! error is returned immediately.

use std::{future::Future, time::Duration};

use expedientes_storage::{StorageError, StorageResult};
use rand::Rng;

use crate::config::ConflictRetryConfig;

/// Executes `operation`, retrying on [`StorageError::Conflict`] up to
/// `config.max_retries` times.
///
/// Each retry sleeps `base_delay` plus up to `base_delay` of random jitter
/// so that racing writers spread out.
///
/// # Errors
///
/// The last [`StorageError::Conflict`] once retries are exhausted, or the
/// first non-conflict error.
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub(crate) async fn with_conflict_retry<F, Fut, T>(
    config: &ConflictRetryConfig,
    operation_name: &str,
    mut operation: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(operation = operation_name, attempt = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            },
            Err(StorageError::Conflict) if attempt < config.max_retries => {
                let delay = jittered(config.base_delay);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "conflict, retrying after jitter",
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(StorageError::Conflict) => {
                tracing::warn!(operation = operation_name, attempts = attempt + 1, "conflict retries exhausted");
                return Err(StorageError::Conflict);
            },
            Err(e) => return Err(e),
        }
    }
}

fn jittered(base: Duration) -> Duration {
    let range = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    if range == 0 {
        return Duration::ZERO;
    }
    base + Duration::from_millis(rand::rng().random_range(0..=range))
}
