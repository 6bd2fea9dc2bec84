//! Bounded retry around statement execution.
//!
//! Every pooled operation funnels through [`run_retriable`]:
//!
//! 1. Unhealthy pool: probe and reconnect before touching the database.
//! 2. Run the operation against the current pool.
//! 3. Connection-level failure: mark the pool unhealthy, wait linearly
//!    (`attempt * step`), and go back to 1.
//! 4. Anything else propagates immediately through the caller's mapper.
//!
//! Attempts are counted across both the health path and the operation path,
//! so a flapping link cannot loop forever.

use crate::backoff;
use crate::config::RetryOptions;
use crate::db::pool::{DbPool, PoolManager};
use crate::error::{self, DbError, DbResult};
use std::time::Duration;
use tracing::warn;

/// Retry tuning lifted out of [`RetryOptions`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) step: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_config(retry: &RetryOptions) -> Self {
        Self {
            max_attempts: retry.statement_retries_or_default(),
            step: retry.retry_step_or_default(),
        }
    }
}

/// Run `op` with health-gated, bounded retry.
///
/// `map_fatal` turns the final driver error into the caller's taxonomy with
/// whatever statement context the caller holds.
pub(crate) async fn run_retriable<T, F, Fut>(
    manager: &PoolManager,
    policy: &RetryPolicy,
    operation: &str,
    map_fatal: impl Fn(sqlx::Error) -> DbError,
    op: F,
) -> DbResult<T>
where
    F: Fn(DbPool) -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    manager.ensure_open().await?;

    let mut attempt: u32 = 0;
    loop {
        if !manager.is_healthy() && !manager.check_connection().await {
            attempt += 1;
            if attempt >= policy.max_attempts {
                return Err(DbError::connection_failure(
                    attempt,
                    format!("{operation}: connection could not be restored"),
                ));
            }
            let wait = backoff::retry_delay(policy.step, attempt);
            warn!(
                operation,
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Connection unhealthy; retrying"
            );
            tokio::time::sleep(wait).await;
            continue;
        }

        let Some(pool) = manager.current_pool().await else {
            // close() raced us between the health gate and checkout
            return Err(DbError::NotConnected);
        };

        match op(pool).await {
            Ok(value) => return Ok(value),
            Err(e) if error::is_transient(&e) => {
                manager.mark_unhealthy();
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(map_fatal(e));
                }
                let wait = backoff::retry_delay(policy.step, attempt);
                warn!(
                    operation,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "Transient failure; retrying"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(map_fatal(e)),
        }
    }
}
