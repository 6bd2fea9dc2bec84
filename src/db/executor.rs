//! Statement execution engine.
//!
//! This module runs individual statements against a pool:
//! - `fetch_all`: reads, returning every decoded row
//! - `execute_write`: writes, returning the affected-row count
//! - `execute_returning`: writes that may also produce rows
//! - `execute_batch`: one statement over many parameter sets, atomically
//!
//! # Architecture
//!
//! Database-specific implementations live in submodules (`mysql`, `sqlite`),
//! each providing identical functionality adapted to that database's driver.
//! All functions return raw `sqlx::Error` so the retry layer can classify
//! failures before they are mapped into the crate's taxonomy.

use crate::db::pool::DbPool;
use crate::db::types;
use crate::models::{QueryParam, Row};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Run a read statement and decode every row.
pub(crate) async fn fetch_all(
    pool: &DbPool,
    sql: &str,
    params: &[QueryParam],
) -> Result<Vec<Row>, sqlx::Error> {
    match pool {
        DbPool::MySql(p) => mysql::fetch_all(p, sql, params).await,
        DbPool::Sqlite(p) => sqlite::fetch_all(p, sql, params).await,
    }
}

/// Run a write statement in autocommit mode and report affected rows.
pub(crate) async fn execute_write(
    pool: &DbPool,
    sql: &str,
    params: &[QueryParam],
) -> Result<u64, sqlx::Error> {
    match pool {
        DbPool::MySql(p) => mysql::execute_write(p, sql, params).await,
        DbPool::Sqlite(p) => sqlite::execute_write(p, sql, params).await,
    }
}

/// Run a write statement, capturing any rows the driver hands back.
///
/// Rows are `Some` only when the statement actually produced at least one;
/// a plain write and an empty result set both report `None`.
pub(crate) async fn execute_returning(
    pool: &DbPool,
    sql: &str,
    params: &[QueryParam],
) -> Result<(u64, Option<Vec<Row>>), sqlx::Error> {
    let (affected, rows) = match pool {
        DbPool::MySql(p) => mysql::fetch_returning(p, sql, params).await?,
        DbPool::Sqlite(p) => sqlite::fetch_returning(p, sql, params).await?,
    };
    Ok((affected, (!rows.is_empty()).then_some(rows)))
}

/// Run one statement over many parameter sets inside a single transaction.
///
/// All sets commit together or not at all, which keeps a retried batch from
/// double-applying its early sets. `progress` tracks the set being executed
/// so a failure can name it.
pub(crate) async fn execute_batch(
    pool: &DbPool,
    sql: &str,
    param_sets: &[Vec<QueryParam>],
    progress: &AtomicUsize,
) -> Result<u64, sqlx::Error> {
    if param_sets.is_empty() {
        return Ok(0);
    }
    match pool {
        DbPool::MySql(p) => mysql::execute_batch(p, sql, param_sets, progress).await,
        DbPool::Sqlite(p) => sqlite::execute_batch(p, sql, param_sets, progress).await,
    }
}

// ============================================================================
// MySQL implementation
// ============================================================================

pub(crate) mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use futures_util::TryStreamExt;
    use sqlx::mysql::MySqlRow;
    use sqlx::{Either, Executor, MySql, MySqlPool};

    pub async fn fetch_all(
        pool: &MySqlPool,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<Row>, sqlx::Error> {
        let rows: Vec<MySqlRow> = if params.is_empty() {
            // Text protocol; some statements refuse to be prepared
            pool.fetch(sql).try_collect().await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.fetch(pool).try_collect().await?
        };
        Ok(types::rows_from(&rows))
    }

    pub async fn execute_write(
        pool: &MySqlPool,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<u64, sqlx::Error> {
        let result = if params.is_empty() {
            pool.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.execute(pool).await?
        };
        Ok(result.rows_affected())
    }

    /// Collect both the affected count and any returned rows, against any
    /// executor (pool or transaction connection).
    pub async fn fetch_returning<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<(u64, Vec<Row>), sqlx::Error>
    where
        E: Executor<'c, Database = MySql>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql_param(query, param);
        }
        let mut stream = query.fetch_many(executor);
        let mut affected: u64 = 0;
        let mut rows: Vec<MySqlRow> = Vec::new();
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(result) => affected += result.rows_affected(),
                Either::Right(row) => rows.push(row),
            }
        }
        Ok((affected, types::rows_from(&rows)))
    }

    pub async fn execute_batch(
        pool: &MySqlPool,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
        progress: &AtomicUsize,
    ) -> Result<u64, sqlx::Error> {
        // Dropping the transaction on error rolls every set back
        let mut tx = pool.begin().await?;
        let mut affected: u64 = 0;
        for (index, set) in param_sets.iter().enumerate() {
            progress.store(index, Ordering::Relaxed);
            let mut query = sqlx::query(sql);
            for param in set {
                query = bind_mysql_param(query, param);
            }
            affected += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }
}

// ============================================================================
// SQLite implementation
// ============================================================================

pub(crate) mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use futures_util::TryStreamExt;
    use sqlx::sqlite::SqliteRow;
    use sqlx::{Either, Executor, Sqlite, SqlitePool};

    pub async fn fetch_all(
        pool: &SqlitePool,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<Row>, sqlx::Error> {
        let rows: Vec<SqliteRow> = if params.is_empty() {
            pool.fetch(sql).try_collect().await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch(pool).try_collect().await?
        };
        Ok(types::rows_from(&rows))
    }

    pub async fn execute_write(
        pool: &SqlitePool,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<u64, sqlx::Error> {
        let result = if params.is_empty() {
            pool.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.execute(pool).await?
        };
        Ok(result.rows_affected())
    }

    pub async fn fetch_returning<'c, E>(
        executor: E,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<(u64, Vec<Row>), sqlx::Error>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        let mut stream = query.fetch_many(executor);
        let mut affected: u64 = 0;
        let mut rows: Vec<SqliteRow> = Vec::new();
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(result) => affected += result.rows_affected(),
                Either::Right(row) => rows.push(row),
            }
        }
        Ok((affected, types::rows_from(&rows)))
    }

    pub async fn execute_batch(
        pool: &SqlitePool,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
        progress: &AtomicUsize,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut affected: u64 = 0;
        for (index, set) in param_sets.iter().enumerate() {
            progress.store(index, Ordering::Relaxed);
            let mut query = sqlx::query(sql);
            for param in set {
                query = bind_sqlite_param(query, param);
            }
            affected += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn memory_pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(SqliteConnectOptions::new().filename(":memory:"))
            .await
            .unwrap();
        DbPool::Sqlite(pool)
    }

    async fn seeded_pool() -> DbPool {
        let pool = memory_pool().await;
        execute_write(
            &pool,
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)",
            &[],
        )
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_fetch_all_decodes_rows() {
        let pool = seeded_pool().await;
        execute_write(
            &pool,
            "INSERT INTO items (id, name) VALUES (?, ?)",
            &[QueryParam::Int(1), QueryParam::String("alpha".into())],
        )
        .await
        .unwrap();

        let rows = fetch_all(&pool, "SELECT id, name FROM items", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64("id"), Some(1));
        assert_eq!(rows[0].get_str("name"), Some("alpha"));
    }

    #[tokio::test]
    async fn test_execute_write_reports_affected() {
        let pool = seeded_pool().await;
        for id in 1..=3i64 {
            execute_write(
                &pool,
                "INSERT INTO items (id, name) VALUES (?, ?)",
                &[QueryParam::Int(id), QueryParam::String("x".into())],
            )
            .await
            .unwrap();
        }
        let affected = execute_write(&pool, "UPDATE items SET name = 'y'", &[]).await.unwrap();
        assert_eq!(affected, 3);
    }

    #[tokio::test]
    async fn test_execute_returning_shapes() {
        let pool = seeded_pool().await;

        // Plain write: no result set
        let (affected, rows) = execute_returning(
            &pool,
            "INSERT INTO items (id, name) VALUES (?, ?)",
            &[QueryParam::Int(1), QueryParam::String("a".into())],
        )
        .await
        .unwrap();
        assert_eq!(affected, 1);
        assert!(rows.is_none());

        // Read with rows
        let (_, rows) = execute_returning(&pool, "SELECT id FROM items", &[]).await.unwrap();
        assert_eq!(rows.unwrap().len(), 1);

        // Read with zero rows still reports none
        let (_, rows) = execute_returning(
            &pool,
            "SELECT id FROM items WHERE id = ?",
            &[QueryParam::Int(999)],
        )
        .await
        .unwrap();
        assert!(rows.is_none());
    }

    #[tokio::test]
    async fn test_execute_batch_commits_all_sets() {
        let pool = seeded_pool().await;
        let progress = AtomicUsize::new(0);
        let sets: Vec<Vec<QueryParam>> = (1..=3i64)
            .map(|id| vec![QueryParam::Int(id), QueryParam::String(format!("n{id}"))])
            .collect();
        let affected = execute_batch(
            &pool,
            "INSERT INTO items (id, name) VALUES (?, ?)",
            &sets,
            &progress,
        )
        .await
        .unwrap();
        assert_eq!(affected, 3);
        let rows = fetch_all(&pool, "SELECT count(*) AS n FROM items", &[]).await.unwrap();
        assert_eq!(rows[0].get_i64("n"), Some(3));
    }

    #[tokio::test]
    async fn test_execute_batch_rolls_back_on_failure() {
        let pool = seeded_pool().await;
        let progress = AtomicUsize::new(0);
        // Third set violates the primary key
        let sets = vec![
            vec![QueryParam::Int(1), QueryParam::String("a".into())],
            vec![QueryParam::Int(2), QueryParam::String("b".into())],
            vec![QueryParam::Int(1), QueryParam::String("dup".into())],
        ];
        let result = execute_batch(
            &pool,
            "INSERT INTO items (id, name) VALUES (?, ?)",
            &sets,
            &progress,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(progress.load(Ordering::Relaxed), 2);

        let rows = fetch_all(&pool, "SELECT count(*) AS n FROM items", &[]).await.unwrap();
        assert_eq!(rows[0].get_i64("n"), Some(0));
    }

    #[tokio::test]
    async fn test_execute_batch_empty_is_noop() {
        let pool = seeded_pool().await;
        let progress = AtomicUsize::new(0);
        let affected = execute_batch(&pool, "INSERT INTO items (id) VALUES (?)", &[], &progress)
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }
}
