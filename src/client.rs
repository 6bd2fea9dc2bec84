//! Public client facade.
//!
//! [`DbClient`] ties the pieces together: configuration, the pool manager,
//! the retry path, streaming, and transactions. One client owns one pool;
//! it is cheap to clone and share across tasks.
//!
//! Every statement-running operation is bounded by a deadline, either the
//! statement's own [`timeout`](crate::models::Statement::timeout) or the
//! configured default. Hitting the deadline aborts the in-flight attempt,
//! returns its connection to the pool, and surfaces [`DbError::Timeout`]
//! without further retries. Dropping a returned future cancels the same way.

use crate::config::{ConfigError, DbConfig};
use crate::db::executor;
use crate::db::pool::{PoolManager, PoolStatus};
use crate::db::retry::{self, RetryPolicy};
use crate::db::stream::{self, RowStream};
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_STREAM_BATCH_SIZE, QueryParam, Row, Statement};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Resilient database client over a managed connection pool.
#[derive(Debug, Clone)]
pub struct DbClient {
    manager: Arc<PoolManager>,
    policy: RetryPolicy,
}

impl DbClient {
    pub fn new(config: DbConfig) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        Self {
            manager: Arc::new(PoolManager::new(config)),
            policy,
        }
    }

    /// Build a client from a connection URL, including pool and retry
    /// options from the query string.
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(DbConfig::from_url(url)?))
    }

    pub fn config(&self) -> &DbConfig {
        self.manager.config()
    }

    /// Establish the pool, retrying with exponential backoff.
    ///
    /// Idempotent while connected; concurrent callers observe the in-flight
    /// attempt instead of re-dialing.
    pub async fn connect(&self) -> DbResult<()> {
        self.manager.connect().await
    }

    /// Close the pool. Fails with [`DbError::NotConnected`] when there is
    /// nothing to close; afterwards every operation fails the same way until
    /// the next explicit [`connect`](Self::connect).
    pub async fn close(&self) -> DbResult<()> {
        self.manager.close().await
    }

    /// Probe the connection, reconnecting if the probe fails. Returns whether
    /// a usable pool is in place afterwards.
    pub async fn check_connection(&self) -> bool {
        self.manager.check_connection().await
    }

    /// Point-in-time pool health and sizing snapshot.
    pub async fn status(&self) -> PoolStatus {
        self.manager.status().await
    }

    /// Run a read statement and return every row.
    pub async fn execute_read(&self, statement: &Statement) -> DbResult<Vec<Row>> {
        debug!(sql = %statement.sql, "Executing read statement");
        let limit = self.statement_limit(statement);
        let acquire = self.acquire_timeout();
        self.bounded(
            "execute_read",
            limit,
            retry::run_retriable(
                &self.manager,
                &self.policy,
                "execute_read",
                |e| DbError::fatal_query(e, statement, acquire),
                async |pool| executor::fetch_all(&pool, &statement.sql, &statement.params).await,
            ),
        )
        .await
    }

    /// Run a write statement in auto-commit mode and return the affected-row
    /// count.
    pub async fn execute_write(&self, statement: &Statement) -> DbResult<u64> {
        debug!(sql = %statement.sql, "Executing write statement");
        let limit = self.statement_limit(statement);
        let acquire = self.acquire_timeout();
        self.bounded(
            "execute_write",
            limit,
            retry::run_retriable(
                &self.manager,
                &self.policy,
                "execute_write",
                |e| DbError::fatal_query(e, statement, acquire),
                async |pool| executor::execute_write(&pool, &statement.sql, &statement.params).await,
            ),
        )
        .await
    }

    /// Run a write statement that may also produce rows.
    ///
    /// Rows are `Some` only when the driver reported a result set with at
    /// least one row; a plain write returns `None`.
    pub async fn execute_write_returning(
        &self,
        statement: &Statement,
    ) -> DbResult<(u64, Option<Vec<Row>>)> {
        debug!(sql = %statement.sql, "Executing write statement with returning");
        let limit = self.statement_limit(statement);
        let acquire = self.acquire_timeout();
        self.bounded(
            "execute_write_returning",
            limit,
            retry::run_retriable(
                &self.manager,
                &self.policy,
                "execute_write_returning",
                |e| DbError::fatal_query(e, statement, acquire),
                async |pool| {
                    executor::execute_returning(&pool, &statement.sql, &statement.params).await
                },
            ),
        )
        .await
    }

    /// Run one statement once per parameter set, committing all sets together.
    ///
    /// The statement's own `params` are ignored; each set in `param_sets`
    /// binds one execution. All sets run on one connection inside a single
    /// driver transaction, so a failure rolls the whole batch back and a
    /// transient-failure retry cannot double-apply the early sets. Failure
    /// surfaces as [`DbError::BatchFailure`] naming the set that broke.
    pub async fn execute_batch(
        &self,
        statement: &Statement,
        param_sets: &[Vec<QueryParam>],
    ) -> DbResult<u64> {
        debug!(sql = %statement.sql, sets = param_sets.len(), "Executing batch");
        let limit = self.statement_limit(statement);
        let acquire = self.acquire_timeout();
        let sets = param_sets.len();
        let progress = AtomicUsize::new(0);
        self.bounded(
            "execute_batch",
            limit,
            retry::run_retriable(
                &self.manager,
                &self.policy,
                "execute_batch",
                |e| {
                    DbError::fatal_batch(
                        e,
                        &statement.sql,
                        progress.load(Ordering::Relaxed),
                        sets,
                        acquire,
                    )
                },
                async |pool| {
                    executor::execute_batch(&pool, &statement.sql, param_sets, &progress).await
                },
            ),
        )
        .await
    }

    /// Stream a result set in batches of [`DEFAULT_STREAM_BATCH_SIZE`] rows.
    ///
    /// See [`RowStream`] for delivery semantics; dropping the stream cancels
    /// the work and releases its connection.
    pub fn stream(&self, statement: Statement) -> RowStream {
        self.stream_with_batch_size(statement, DEFAULT_STREAM_BATCH_SIZE)
    }

    /// Stream a result set in batches of `batch_size` rows.
    pub fn stream_with_batch_size(&self, statement: Statement, batch_size: usize) -> RowStream {
        stream::spawn(
            Arc::clone(&self.manager),
            self.policy,
            statement,
            batch_size,
        )
    }

    /// Create a transaction handle. No connection is pinned until
    /// [`Transaction::begin`].
    pub fn transaction(&self) -> Transaction {
        Transaction::new(
            Arc::clone(&self.manager),
            self.config().retry.statement_timeout_or_default(),
        )
    }

    fn statement_limit(&self, statement: &Statement) -> Duration {
        statement
            .timeout
            .unwrap_or_else(|| self.config().retry.statement_timeout_or_default())
    }

    fn acquire_timeout(&self) -> Duration {
        self.config().pool.acquire_timeout_or_default()
    }

    /// Bound `work` by `limit`, including any retries and backoff waits it
    /// performs internally.
    async fn bounded<T>(
        &self,
        operation: &str,
        limit: Duration,
        work: impl Future<Output = DbResult<T>>,
    ) -> DbResult<T> {
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(operation, limit)),
        }
    }
}
