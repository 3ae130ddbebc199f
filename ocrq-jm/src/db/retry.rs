//! Database retry logic
//!
//! SQLite serializes writers; under concurrent workers a transaction can
//! fail with "database is locked". Those failures are retried with
//! exponential backoff until a bounded wait elapses. Any other error is
//! returned immediately.

use std::time::{Duration, Instant};

use ocrq_common::{Error, Result};

/// Maximum total time spent retrying one operation.
const MAX_LOCK_WAIT_MS: u64 = 5_000;

/// Retry a database operation while it fails with a lock error.
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "attach_file")
/// * `operation` - Async closure performing the transaction; re-invoked
///   from scratch on every attempt (the failed transaction has already
///   rolled back)
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(MAX_LOCK_WAIT_MS);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let is_lock_error = match &err {
                    Error::Database(db_err) => db_err.to_string().contains("database is locked"),
                    _ => false,
                };

                if !is_lock_error {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(250);
            }
        }
    }
}
