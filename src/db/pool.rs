//! Connection pool lifecycle and health tracking.
//!
//! This module owns the single pool slot behind the client. Establishment
//! retries with exponential backoff, every handed-out pool has passed a
//! liveness probe, and health state steers the statement retry path.
//!
//! # Concurrency
//!
//! - The pool slot sits behind an `RwLock`; operations clone the pool handle
//!   out and never hold the lock across an await on database work.
//! - A `Mutex` gate serializes `connect` and `close`. A caller that queues
//!   behind an in-flight `connect` observes its result instead of re-dialing.
//! - Health flags are atomics, readable from any task without locking.

use crate::backoff;
use crate::config::{DbConfig, DbTarget};
use crate::error::{DbError, DbResult};
use serde::Serialize;
use sqlx::{
    MySqlPool, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Sqlite(pool) => pool.close().await,
        }
    }

    /// Total connections currently open.
    pub fn size(&self) -> u32 {
        match self {
            DbPool::MySql(pool) => pool.size(),
            DbPool::Sqlite(pool) => pool.size(),
        }
    }

    /// Connections sitting idle in the pool.
    pub fn num_idle(&self) -> usize {
        match self {
            DbPool::MySql(pool) => pool.num_idle(),
            DbPool::Sqlite(pool) => pool.num_idle(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            DbPool::MySql(_) => "mysql",
            DbPool::Sqlite(_) => "sqlite",
        }
    }

    /// Round-trip liveness probe.
    pub(crate) async fn probe(&self) -> Result<(), sqlx::Error> {
        match self {
            DbPool::MySql(pool) => {
                sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await?;
            }
            DbPool::Sqlite(pool) => {
                sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await?;
            }
        }
        Ok(())
    }
}

/// Point-in-time pool observability snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatus {
    pub healthy: bool,
    /// Attempts burned by the most recent establishment loop; zero after a
    /// successful connect.
    pub connect_attempts: u32,
    /// Backoff applied after the most recent failed attempt.
    pub last_backoff: Option<Duration>,
    pub size: u32,
    pub idle: usize,
}

#[derive(Debug, Default)]
struct HealthState {
    healthy: AtomicBool,
    connect_attempts: AtomicU32,
    last_backoff_ms: AtomicU64,
}

impl HealthState {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::Release);
        self.connect_attempts.store(0, Ordering::Release);
        self.last_backoff_ms.store(0, Ordering::Release);
    }

    fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
    }

    fn record_failed_attempt(&self, wait: Duration) {
        self.healthy.store(false, Ordering::Release);
        self.connect_attempts.fetch_add(1, Ordering::AcqRel);
        self.last_backoff_ms
            .store(wait.as_millis() as u64, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct PoolSlot {
    pool: Option<DbPool>,
    /// Set by `close`; cleared by the next successful `connect`. While set,
    /// operations fail with `NotConnected` instead of auto-reconnecting.
    closed: bool,
}

/// Owns the pool and its health state.
///
/// All client operations go through this manager. It is cheap to share behind
/// an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct PoolManager {
    config: DbConfig,
    slot: RwLock<PoolSlot>,
    health: HealthState,
    /// Serializes establishment and teardown.
    connect_gate: Mutex<()>,
}

impl PoolManager {
    pub fn new(config: DbConfig) -> Self {
        Self {
            config,
            slot: RwLock::new(PoolSlot::default()),
            health: HealthState::default(),
            connect_gate: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub(crate) fn mark_unhealthy(&self) {
        self.health.mark_unhealthy();
    }

    /// Current pool handle, if one is established.
    pub(crate) async fn current_pool(&self) -> Option<DbPool> {
        self.slot.read().await.pool.clone()
    }

    /// Fail fast when the manager was explicitly closed.
    pub(crate) async fn ensure_open(&self) -> DbResult<()> {
        if self.slot.read().await.closed {
            return Err(DbError::NotConnected);
        }
        Ok(())
    }

    /// Establish the pool, retrying with exponential backoff.
    ///
    /// Already connected and healthy is a no-op. Concurrent callers queue on
    /// the gate and see the in-flight attempt's outcome. After the configured
    /// attempts are exhausted the error carries the attempt count; a backoff
    /// wait runs after every failed attempt, the last one included.
    pub async fn connect(&self) -> DbResult<()> {
        let _gate = self.connect_gate.lock().await;

        {
            let slot = self.slot.read().await;
            if slot.pool.is_some() && self.health.is_healthy() {
                debug!(target = %self.config.target, "Already connected; skipping establishment");
                return Ok(());
            }
        }

        self.establish_gated().await
    }

    /// Establishment loop. Caller must hold the connect gate.
    async fn establish_gated(&self) -> DbResult<()> {
        let attempts = self.config.retry.connect_attempts_or_default();
        let base = self.config.retry.connect_backoff_base_or_default();
        let cap = self.config.retry.connect_backoff_cap_or_default();
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=attempts {
            // A pool left over from a previous life is torn down first.
            // Teardown errors are swallowed; the old pool is dead weight.
            let stale = { self.slot.write().await.pool.take() };
            if let Some(pool) = stale {
                pool.close().await;
            }

            match self.try_establish().await {
                Ok(pool) => {
                    info!(
                        target = %self.config.target,
                        backend = pool.backend_name(),
                        attempt,
                        "Database pool established"
                    );
                    {
                        let mut slot = self.slot.write().await;
                        slot.pool = Some(pool);
                        slot.closed = false;
                    }
                    self.health.mark_healthy();
                    return Ok(());
                }
                Err(e) => {
                    let wait = backoff::reconnect_delay(base, cap, attempt);
                    last_error = e.to_string();
                    self.health.record_failed_attempt(wait);
                    warn!(
                        target = %self.config.target,
                        attempt,
                        max_attempts = attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Connection attempt failed"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Err(DbError::connection_failure(attempts, last_error))
    }

    /// Build a pool and probe it; only a probed pool is handed out.
    async fn try_establish(&self) -> Result<DbPool, sqlx::Error> {
        let pool = self.build_pool().await?;
        if let Err(e) = pool.probe().await {
            pool.close().await;
            return Err(e);
        }
        Ok(pool)
    }

    async fn build_pool(&self) -> Result<DbPool, sqlx::Error> {
        let options = &self.config.pool;
        let is_sqlite = self.config.target.is_sqlite();

        match &self.config.target {
            DbTarget::MySql(target) => {
                let connect = MySqlConnectOptions::new()
                    .host(&target.host)
                    .port(target.port)
                    .username(&target.user)
                    .password(&target.password)
                    .database(&target.database)
                    .charset("utf8mb4");
                let pool = MySqlPoolOptions::new()
                    .max_connections(options.max_connections_or_default(is_sqlite))
                    .min_connections(options.min_connections_or_default())
                    .acquire_timeout(options.acquire_timeout_or_default())
                    .idle_timeout(Some(options.idle_timeout_or_default()))
                    .test_before_acquire(options.test_before_acquire_or_default())
                    .connect_with(connect)
                    .await?;
                Ok(DbPool::MySql(pool))
            }
            DbTarget::Sqlite(target) => {
                let connect = SqliteConnectOptions::new()
                    .filename(&target.path)
                    .create_if_missing(target.create_if_missing)
                    .busy_timeout(Duration::from_secs(5));
                let pool = SqlitePoolOptions::new()
                    .max_connections(options.max_connections_or_default(is_sqlite))
                    .min_connections(options.min_connections_or_default())
                    .acquire_timeout(options.acquire_timeout_or_default())
                    .idle_timeout(Some(options.idle_timeout_or_default()))
                    .test_before_acquire(options.test_before_acquire_or_default())
                    .connect_with(connect)
                    .await?;
                Ok(DbPool::Sqlite(pool))
            }
        }
    }

    /// Probe the connection, reconnecting when the probe fails.
    ///
    /// Returns true when a usable pool is in place afterwards. Never connected
    /// delegates to [`connect`](Self::connect); explicitly closed returns
    /// false without reviving the pool.
    pub async fn check_connection(&self) -> bool {
        let (pool, closed) = {
            let slot = self.slot.read().await;
            (slot.pool.clone(), slot.closed)
        };
        if closed {
            return false;
        }

        match pool {
            None => self.connect().await.is_ok(),
            Some(pool) => match pool.probe().await {
                Ok(()) => {
                    self.health.mark_healthy();
                    true
                }
                Err(e) => {
                    warn!(
                        target = %self.config.target,
                        error = %e,
                        "Liveness probe failed; reconnecting"
                    );
                    self.health.mark_unhealthy();
                    self.reconnect_if_open().await
                }
            },
        }
    }

    /// Reconnect behind the gate unless `close` won the race meanwhile.
    ///
    /// Only an explicit [`connect`](Self::connect) may revive a closed
    /// manager; the internal probe-failure path must not.
    async fn reconnect_if_open(&self) -> bool {
        let _gate = self.connect_gate.lock().await;
        {
            let slot = self.slot.read().await;
            if slot.closed {
                return false;
            }
            if slot.pool.is_some() && self.health.is_healthy() {
                return true;
            }
        }
        self.establish_gated().await.is_ok()
    }

    /// Close the pool and render the manager unusable until the next
    /// explicit [`connect`](Self::connect).
    pub async fn close(&self) -> DbResult<()> {
        let _gate = self.connect_gate.lock().await;

        let pool = {
            let mut slot = self.slot.write().await;
            match slot.pool.take() {
                None => return Err(DbError::NotConnected),
                Some(pool) => {
                    slot.closed = true;
                    pool
                }
            }
        };
        self.health.mark_unhealthy();
        pool.close().await;
        info!(target = %self.config.target, "Database pool closed");
        Ok(())
    }

    /// Observability snapshot.
    pub async fn status(&self) -> PoolStatus {
        let slot = self.slot.read().await;
        let (size, idle) = match &slot.pool {
            Some(pool) => (pool.size(), pool.num_idle()),
            None => (0, 0),
        };
        let backoff_ms = self.health.last_backoff_ms.load(Ordering::Acquire);
        PoolStatus {
            healthy: self.health.is_healthy(),
            connect_attempts: self.health.connect_attempts.load(Ordering::Acquire),
            last_backoff: (backoff_ms > 0).then(|| Duration::from_millis(backoff_ms)),
            size,
            idle,
        }
    }
}
