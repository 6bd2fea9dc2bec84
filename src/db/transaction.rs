//! Explicit transactions pinned to one connection.
//!
//! A [`Transaction`] borrows a single connection from the pool for its whole
//! lifetime and runs every statement on it, in submission order. Nothing in
//! here goes through the retry path: replaying a statement after a
//! mid-transaction connection loss could re-apply part of the unit of work,
//! so every failure surfaces immediately as [`DbError::TransactionFailure`].

use crate::db::executor;
use crate::db::pool::{DbPool, PoolManager};
use crate::error::{DbError, DbResult};
use crate::models::{Row, Statement};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Driver transaction handle, one variant per backend.
enum DbTransaction {
    MySql(sqlx::Transaction<'static, sqlx::MySql>),
    Sqlite(sqlx::Transaction<'static, sqlx::Sqlite>),
}

enum TxState {
    /// No pinned connection: before `begin`, or after commit/rollback/close.
    Idle,
    Active(DbTransaction),
}

fn new_tx_id() -> String {
    format!("tx_{}", Uuid::new_v4().simple())
}

/// A scoped unit of work on one pinned connection.
///
/// Lifecycle: [`begin`](Self::begin), any number of
/// [`execute`](Self::execute) calls, then [`commit`](Self::commit) or
/// [`rollback`](Self::rollback). [`close`](Self::close) releases the
/// connection unconditionally and may be called at any point, any number of
/// times. After a terminal state the same object can `begin` again, which
/// starts a fresh transaction under a new id.
///
/// Dropping an active `Transaction` rolls it back; the connection returns to
/// the pool either way.
pub struct Transaction {
    manager: Arc<PoolManager>,
    state: TxState,
    id: String,
    begun_at: Option<DateTime<Utc>>,
    default_timeout: Duration,
}

impl Transaction {
    pub(crate) fn new(manager: Arc<PoolManager>, default_timeout: Duration) -> Self {
        Self {
            manager,
            state: TxState::Idle,
            id: new_tx_id(),
            begun_at: None,
            default_timeout,
        }
    }

    /// Identifier of the current (or most recent) transaction, for log
    /// correlation.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TxState::Active(_))
    }

    /// When the current (or most recent) transaction was begun.
    pub fn begun_at(&self) -> Option<DateTime<Utc>> {
        self.begun_at
    }

    /// Pin a connection and issue the begin command.
    ///
    /// Fails with [`DbError::NotConnected`] when the pool was never
    /// established or was closed, and with [`DbError::TransactionFailure`]
    /// when the begin command itself fails; the connection is returned to the
    /// pool in that case.
    pub async fn begin(&mut self) -> DbResult<()> {
        if self.is_active() {
            return Err(DbError::transaction_failure(
                "transaction already active",
                &self.id,
            ));
        }
        self.manager.ensure_open().await?;
        let Some(pool) = self.manager.current_pool().await else {
            return Err(DbError::NotConnected);
        };

        let id = new_tx_id();
        let begun = match &pool {
            DbPool::MySql(p) => p.begin().await.map(DbTransaction::MySql),
            DbPool::Sqlite(p) => p.begin().await.map(DbTransaction::Sqlite),
        };
        match begun {
            Ok(tx) => {
                self.id = id;
                self.begun_at = Some(Utc::now());
                self.state = TxState::Active(tx);
                debug!(transaction = %self.id, "Transaction begun");
                Ok(())
            }
            Err(sqlx::Error::PoolTimedOut) => Err(DbError::timeout(
                "transaction begin",
                self.manager.config().pool.acquire_timeout_or_default(),
            )),
            Err(e) => Err(DbError::transaction_failure(e.to_string(), &id)),
        }
    }

    /// Run one statement on the pinned connection.
    ///
    /// Returns the affected-row count and any rows the driver produced
    /// (`None` when the statement returned no result set). Fails with
    /// [`DbError::NoActiveTransaction`] outside an active transaction. A
    /// failed statement leaves the transaction active so the caller can
    /// still roll back; after a timeout the connection state is unknown and
    /// the transaction should be closed.
    pub async fn execute(
        &mut self,
        statement: &Statement,
    ) -> DbResult<(u64, Option<Vec<Row>>)> {
        let TxState::Active(tx) = &mut self.state else {
            return Err(DbError::NoActiveTransaction);
        };
        debug!(transaction = %self.id, sql = %statement.sql, "Executing in transaction");

        let limit = statement.timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(limit, run_on(tx, statement)).await {
            Err(_) => Err(DbError::timeout("transaction execute", limit)),
            Ok(Err(e)) => Err(DbError::transaction_failure(
                format!("{e} (statement: {})", statement.sql),
                &self.id,
            )),
            Ok(Ok((affected, rows))) => Ok((affected, (!rows.is_empty()).then_some(rows))),
        }
    }

    /// Commit and release the pinned connection.
    pub async fn commit(&mut self) -> DbResult<()> {
        match std::mem::replace(&mut self.state, TxState::Idle) {
            TxState::Idle => Err(DbError::NoActiveTransaction),
            TxState::Active(tx) => {
                let result = match tx {
                    DbTransaction::MySql(tx) => tx.commit().await,
                    DbTransaction::Sqlite(tx) => tx.commit().await,
                };
                result.map_err(|e| DbError::transaction_failure(e.to_string(), &self.id))?;
                debug!(transaction = %self.id, "Transaction committed");
                Ok(())
            }
        }
    }

    /// Roll back and release the pinned connection.
    pub async fn rollback(&mut self) -> DbResult<()> {
        match std::mem::replace(&mut self.state, TxState::Idle) {
            TxState::Idle => Err(DbError::NoActiveTransaction),
            TxState::Active(tx) => {
                let result = match tx {
                    DbTransaction::MySql(tx) => tx.rollback().await,
                    DbTransaction::Sqlite(tx) => tx.rollback().await,
                };
                result.map_err(|e| DbError::transaction_failure(e.to_string(), &self.id))?;
                debug!(transaction = %self.id, "Transaction rolled back");
                Ok(())
            }
        }
    }

    /// Release the pinned connection unconditionally.
    ///
    /// A still-active transaction is rolled back; teardown errors are logged
    /// and swallowed. Calling `close` on an already-closed transaction is a
    /// no-op.
    pub async fn close(&mut self) {
        if let TxState::Active(tx) = std::mem::replace(&mut self.state, TxState::Idle) {
            let result = match tx {
                DbTransaction::MySql(tx) => tx.rollback().await,
                DbTransaction::Sqlite(tx) => tx.rollback().await,
            };
            if let Err(e) = result {
                warn!(transaction = %self.id, error = %e, "Rollback during close failed");
            }
            debug!(transaction = %self.id, "Transaction closed");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

async fn run_on(
    tx: &mut DbTransaction,
    statement: &Statement,
) -> Result<(u64, Vec<Row>), sqlx::Error> {
    match tx {
        DbTransaction::MySql(tx) => {
            executor::mysql::fetch_returning(&mut **tx, &statement.sql, &statement.params).await
        }
        DbTransaction::Sqlite(tx) => {
            executor::sqlite::fetch_returning(&mut **tx, &statement.sql, &statement.params).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::models::QueryParam;

    const TIMEOUT: Duration = Duration::from_secs(30);

    async fn seeded_manager() -> Arc<PoolManager> {
        let manager = Arc::new(PoolManager::new(DbConfig::sqlite_in_memory()));
        manager.connect().await.unwrap();
        let pool = manager.current_pool().await.unwrap();
        executor::execute_write(
            &pool,
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER)",
            &[],
        )
        .await
        .unwrap();
        manager
    }

    async fn count_accounts(manager: &PoolManager) -> i64 {
        let pool = manager.current_pool().await.unwrap();
        let rows = executor::fetch_all(&pool, "SELECT count(*) AS c FROM accounts", &[])
            .await
            .unwrap();
        rows[0].get_i64("c").unwrap()
    }

    #[tokio::test]
    async fn test_execute_before_begin_fails() {
        let manager = seeded_manager().await;
        let mut tx = Transaction::new(manager, TIMEOUT);
        let result = tx.execute(&Statement::new("SELECT 1")).await;
        assert!(matches!(result, Err(DbError::NoActiveTransaction)));
    }

    #[tokio::test]
    async fn test_execute_after_close_fails() {
        let manager = seeded_manager().await;
        let mut tx = Transaction::new(manager, TIMEOUT);
        tx.begin().await.unwrap();
        tx.close().await;
        let result = tx.execute(&Statement::new("SELECT 1")).await;
        assert!(matches!(result, Err(DbError::NoActiveTransaction)));
    }

    #[tokio::test]
    async fn test_commit_without_begin_fails() {
        let manager = seeded_manager().await;
        let mut tx = Transaction::new(manager, TIMEOUT);
        assert!(matches!(tx.commit().await, Err(DbError::NoActiveTransaction)));
        assert!(matches!(tx.rollback().await, Err(DbError::NoActiveTransaction)));
    }

    #[tokio::test]
    async fn test_begin_without_pool_fails_not_connected() {
        let manager = Arc::new(PoolManager::new(DbConfig::sqlite_in_memory()));
        let mut tx = Transaction::new(manager, TIMEOUT);
        assert!(matches!(tx.begin().await, Err(DbError::NotConnected)));
    }

    #[tokio::test]
    async fn test_begin_after_close_fails_not_connected() {
        let manager = seeded_manager().await;
        manager.close().await.unwrap();
        let mut tx = Transaction::new(manager, TIMEOUT);
        assert!(matches!(tx.begin().await, Err(DbError::NotConnected)));
    }

    #[tokio::test]
    async fn test_commit_persists_writes() {
        let manager = seeded_manager().await;
        let mut tx = Transaction::new(Arc::clone(&manager), TIMEOUT);
        assert!(tx.begun_at().is_none());
        tx.begin().await.unwrap();
        assert!(tx.begun_at().is_some());
        let (affected, rows) = tx
            .execute(
                &Statement::new("INSERT INTO accounts (id, balance) VALUES (?, ?)")
                    .bind(1i64)
                    .bind(100i64),
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert!(rows.is_none());
        tx.commit().await.unwrap();

        assert_eq!(count_accounts(&manager).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let manager = seeded_manager().await;
        let mut tx = Transaction::new(Arc::clone(&manager), TIMEOUT);
        tx.begin().await.unwrap();
        tx.execute(
            &Statement::new("INSERT INTO accounts (id, balance) VALUES (?, ?)")
                .bind(1i64)
                .bind(100i64),
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(count_accounts(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_close_rolls_back_and_releases_connection() {
        let manager = seeded_manager().await;
        let mut tx = Transaction::new(Arc::clone(&manager), TIMEOUT);
        tx.begin().await.unwrap();
        tx.execute(
            &Statement::new("INSERT INTO accounts (id, balance) VALUES (?, ?)")
                .bind(1i64)
                .bind(100i64),
        )
        .await
        .unwrap();
        tx.close().await;
        tx.close().await; // idempotent

        // The single pooled connection is free again and the write is gone.
        assert_eq!(count_accounts(&manager).await, 0);
    }

    #[tokio::test]
    async fn test_transaction_reads_its_own_writes() {
        let manager = seeded_manager().await;
        let mut tx = Transaction::new(Arc::clone(&manager), TIMEOUT);
        tx.begin().await.unwrap();
        tx.execute(
            &Statement::new("INSERT INTO accounts (id, balance) VALUES (?, ?)")
                .bind(7i64)
                .bind(250i64),
        )
        .await
        .unwrap();
        let (_, rows) = tx
            .execute(&Statement::new("SELECT balance FROM accounts WHERE id = ?").bind(7i64))
            .await
            .unwrap();
        let rows = rows.unwrap();
        assert_eq!(rows[0].get_i64("balance"), Some(250));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_statement_leaves_transaction_active() {
        let manager = seeded_manager().await;
        let mut tx = Transaction::new(Arc::clone(&manager), TIMEOUT);
        tx.begin().await.unwrap();
        let result = tx.execute(&Statement::new("SELECT * FROM no_such_table")).await;
        match result {
            Err(DbError::TransactionFailure { transaction_id, .. }) => {
                assert_eq!(transaction_id, tx.id());
            }
            other => panic!("expected transaction failure, got {other:?}"),
        }
        assert!(tx.is_active());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_re_begin_starts_fresh_transaction() {
        let manager = seeded_manager().await;
        let mut tx = Transaction::new(Arc::clone(&manager), TIMEOUT);
        tx.begin().await.unwrap();
        let first_id = tx.id().to_string();
        tx.commit().await.unwrap();

        tx.begin().await.unwrap();
        assert_ne!(tx.id(), first_id);
        assert!(tx.is_active());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_while_active_fails() {
        let manager = seeded_manager().await;
        let mut tx = Transaction::new(Arc::clone(&manager), TIMEOUT);
        tx.begin().await.unwrap();
        assert!(matches!(
            tx.begin().await,
            Err(DbError::TransactionFailure { .. })
        ));
        assert!(tx.is_active());
        tx.close().await;
    }
}
