//! Batched row streaming.
//!
//! Large result sets are delivered as batches over a bounded channel instead
//! of being collected in memory. A producer task runs the statement and pushes
//! decoded batches; the [`RowStream`] handle pulls them. The channel bound
//! applies backpressure: a slow consumer stalls the producer rather than
//! letting batches pile up.
//!
//! Delivery is at-least-once. A transient failure mid-stream restarts the
//! statement from the top on the retry path, so rows already delivered in the
//! broken pass are delivered again. Within one pass, rows arrive in statement
//! order.

use crate::backoff;
use crate::db::params::{bind_mysql_param, bind_sqlite_param};
use crate::db::pool::{DbPool, PoolManager};
use crate::db::retry::RetryPolicy;
use crate::db::types::{self, DecodeRow};
use crate::error::{self, DbError, DbResult};
use crate::models::{Row, Statement};
use futures_util::{Stream, TryStreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Batches buffered between producer and consumer.
const CHANNEL_BATCHES: usize = 2;

/// Consumer handle for a streamed result set.
///
/// Yields `Ok` batches until the result set is exhausted, then ends. A failed
/// stream yields one final `Err` item and ends; connection-level failures are
/// retried internally before that happens, and a retry replays the statement
/// from the start (rows may repeat). Dropping the handle cancels the producer.
#[derive(Debug)]
pub struct RowStream {
    rx: mpsc::Receiver<DbResult<Vec<Row>>>,
    producer: JoinHandle<()>,
}

impl RowStream {
    /// Pull the next batch, or `None` when the stream has ended.
    pub async fn next_batch(&mut self) -> Option<DbResult<Vec<Row>>> {
        self.rx.recv().await
    }
}

impl Stream for RowStream {
    type Item = DbResult<Vec<Row>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        // Without this a producer stuck in reconnect backoff would keep
        // dialing long after anyone could observe the result.
        self.producer.abort();
    }
}

/// Start a producer task for `statement` and hand back the consumer side.
pub(crate) fn spawn(
    manager: Arc<PoolManager>,
    policy: RetryPolicy,
    statement: Statement,
    batch_size: usize,
) -> RowStream {
    let (tx, rx) = mpsc::channel(CHANNEL_BATCHES);
    let producer = tokio::spawn(produce(manager, policy, statement, batch_size.max(1), tx));
    RowStream { rx, producer }
}

enum PassOutcome {
    /// Result set exhausted and every batch delivered.
    Complete,
    /// Consumer dropped the stream; stop silently.
    ConsumerGone,
    Failed(sqlx::Error),
}

/// One step of a pass: either the row source or the channel resolved.
enum Step<R> {
    Row(R),
    Finished,
    Failed(sqlx::Error),
    ConsumerGone,
}

async fn produce(
    manager: Arc<PoolManager>,
    policy: RetryPolicy,
    statement: Statement,
    batch_size: usize,
    tx: mpsc::Sender<DbResult<Vec<Row>>>,
) {
    if let Err(e) = manager.ensure_open().await {
        let _ = tx.send(Err(e)).await;
        return;
    }
    debug!(sql = %statement.sql, batch_size, "Starting row stream");

    let acquire_timeout = manager.config().pool.acquire_timeout_or_default();
    let mut attempt: u32 = 0;
    loop {
        if !manager.is_healthy() && !manager.check_connection().await {
            attempt += 1;
            if attempt >= policy.max_attempts {
                let _ = tx
                    .send(Err(DbError::connection_failure(
                        attempt,
                        "stream: connection could not be restored",
                    )))
                    .await;
                return;
            }
            let wait = backoff::retry_delay(policy.step, attempt);
            warn!(
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Connection unhealthy; retrying stream"
            );
            tokio::time::sleep(wait).await;
            continue;
        }

        let Some(pool) = manager.current_pool().await else {
            let _ = tx.send(Err(DbError::NotConnected)).await;
            return;
        };

        // Only an explicit per-statement timeout bounds a pass; the configured
        // statement default is not applied to streams, which are long-lived.
        let outcome = match statement.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, run_pass(&pool, &statement, batch_size, &tx))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let _ = tx.send(Err(DbError::timeout("stream", limit))).await;
                        return;
                    }
                }
            }
            None => run_pass(&pool, &statement, batch_size, &tx).await,
        };

        match outcome {
            PassOutcome::Complete | PassOutcome::ConsumerGone => return,
            PassOutcome::Failed(e) if error::is_transient(&e) => {
                manager.mark_unhealthy();
                attempt += 1;
                if attempt >= policy.max_attempts {
                    let _ = tx
                        .send(Err(DbError::fatal_query(e, &statement, acquire_timeout)))
                        .await;
                    return;
                }
                let wait = backoff::retry_delay(policy.step, attempt);
                warn!(
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "Stream pass failed; restarting statement"
                );
                tokio::time::sleep(wait).await;
            }
            PassOutcome::Failed(e) => {
                let _ = tx
                    .send(Err(DbError::fatal_query(e, &statement, acquire_timeout)))
                    .await;
                return;
            }
        }
    }
}

/// Run the statement once, delivering batches as rows come in.
async fn run_pass(
    pool: &DbPool,
    statement: &Statement,
    batch_size: usize,
    tx: &mpsc::Sender<DbResult<Vec<Row>>>,
) -> PassOutcome {
    match pool {
        DbPool::MySql(p) => {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_mysql_param(query, param);
            }
            drain(query.fetch(p), batch_size, tx).await
        }
        DbPool::Sqlite(p) => {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_sqlite_param(query, param);
            }
            drain(query.fetch(p), batch_size, tx).await
        }
    }
}

/// Pull rows from the driver and push full batches to the consumer.
///
/// Watches the channel's close signal alongside the row source so a dropped
/// consumer stops the pass even while the driver is quiet.
async fn drain<R, S>(
    mut rows: S,
    batch_size: usize,
    tx: &mpsc::Sender<DbResult<Vec<Row>>>,
) -> PassOutcome
where
    R: DecodeRow,
    S: Stream<Item = Result<R, sqlx::Error>> + Unpin,
{
    let mut header: Option<Arc<[String]>> = None;
    let mut batch: Vec<Row> = Vec::with_capacity(batch_size);

    loop {
        let step = tokio::select! {
            item = rows.try_next() => match item {
                Ok(Some(row)) => Step::Row(row),
                Ok(None) => Step::Finished,
                Err(e) => Step::Failed(e),
            },
            () = tx.closed() => Step::ConsumerGone,
        };

        match step {
            Step::Row(row) => {
                let columns = header.get_or_insert_with(|| row.column_names().into());
                batch.push(types::row_from(&row, columns));
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if tx.send(Ok(full)).await.is_err() {
                        return PassOutcome::ConsumerGone;
                    }
                }
            }
            Step::Finished => {
                if !batch.is_empty() && tx.send(Ok(batch)).await.is_err() {
                    return PassOutcome::ConsumerGone;
                }
                return PassOutcome::Complete;
            }
            Step::Failed(e) => return PassOutcome::Failed(e),
            Step::ConsumerGone => return PassOutcome::ConsumerGone,
        }
    }
}
