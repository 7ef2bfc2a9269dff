//! Database Retry Logic
//!
//! Bounded retry with exponential backoff for read-modify-write operations
//! that lost a race with another writer.

use payview_common::{Error, Result};
use rand::Rng;
use std::time::{Duration, Instant};

/// Initial backoff before the second attempt
const INITIAL_BACKOFF_MS: u64 = 10;

/// Backoff ceiling
const MAX_BACKOFF_MS: u64 = 500;

/// Retry `operation` while it fails with a retryable conflict
///
/// **Algorithm:**
/// 1. Attempt operation (the closure must re-read everything it writes)
/// 2. If successful, return result
/// 3. If SQLite reports the database locked or busy:
///    a. If time elapsed < `max_lock_wait`: log WARN, backoff with jitter, retry
///    b. Otherwise: log ERROR, return the lock error
/// 4. If the error is an optimistic version conflict:
///    a. If attempts remain: log WARN, backoff with jitter, retry
///    b. Otherwise: log ERROR, return the conflict
/// 5. Any other error is returned immediately
pub async fn retry_on_conflict<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    max_lock_wait: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;
    let mut version_conflicts = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after conflict retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_retryable_conflict() => return Err(err),
            Err(err) => {
                let exhausted = if err.is_database_locked() {
                    start_time.elapsed() >= max_lock_wait
                } else {
                    version_conflicts += 1;
                    version_conflicts >= max_attempts
                };

                if exhausted {
                    // Frequent exhaustion points at a serialization bug, not load
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Conflict retries exhausted"
                    );
                    return Err(match err {
                        Error::Conflict(msg) => Error::Conflict(format!(
                            "{} after {} attempts: {}",
                            operation_name, attempt, msg
                        )),
                        other => other,
                    });
                }

                let jitter = rand::thread_rng().gen_range(0..=backoff_ms / 2);
                let sleep_ms = backoff_ms + jitter;

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = sleep_ms,
                    error = %err,
                    "Write conflict, retrying with fresh reads"
                );

                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}
