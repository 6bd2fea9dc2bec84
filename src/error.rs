//! Error types for the database access layer.
//!
//! This module defines all error types using `thiserror`. Failed statements
//! carry their SQL text and bound parameters so callers can log or replay them
//! without keeping their own copies.

use crate::models::{QueryParam, Statement};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed after {attempts} attempt(s): {message}")]
    ConnectionFailure { attempts: u32, message: String },

    #[error("Query failed: {message} (statement: {statement}, params: {params:?})")]
    QueryFailure {
        message: String,
        statement: String,
        params: Vec<QueryParam>,
    },

    #[error("Batch failed at parameter set {index} of {sets}: {message} (statement: {statement})")]
    BatchFailure {
        message: String,
        statement: String,
        /// Zero-based index of the parameter set that was executing when the
        /// batch failed. No set in the batch is committed.
        index: usize,
        sets: usize,
    },

    #[error("Transaction failed: {message} (transaction: {transaction_id})")]
    TransactionFailure {
        message: String,
        transaction_id: String,
    },

    #[error("Timeout: {operation} exceeded {limit:?}")]
    Timeout { operation: String, limit: Duration },

    #[error("Not connected: the pool is closed or was never established")]
    NotConnected,

    #[error("No active transaction")]
    NoActiveTransaction,
}

impl DbError {
    /// Create a connection failure carrying the attempt count that exhausted.
    pub fn connection_failure(attempts: u32, message: impl Into<String>) -> Self {
        Self::ConnectionFailure {
            attempts,
            message: message.into(),
        }
    }

    /// Create a query failure with statement context.
    pub fn query_failure(
        message: impl Into<String>,
        statement: impl Into<String>,
        params: &[QueryParam],
    ) -> Self {
        Self::QueryFailure {
            message: message.into(),
            statement: statement.into(),
            params: params.to_vec(),
        }
    }

    /// Create a batch failure pointing at the parameter set that broke it.
    pub fn batch_failure(
        message: impl Into<String>,
        statement: impl Into<String>,
        index: usize,
        sets: usize,
    ) -> Self {
        Self::BatchFailure {
            message: message.into(),
            statement: statement.into(),
            index,
            sets,
        }
    }

    /// Create a transaction failure.
    pub fn transaction_failure(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::TransactionFailure {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    /// Check if this error may clear up on its own (worth retrying later).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure { .. } | Self::Timeout { .. }
        )
    }

    /// Map a non-transient driver error raised while running a statement.
    ///
    /// Pool acquisition timeouts become [`DbError::Timeout`]; everything else
    /// becomes a [`DbError::QueryFailure`] carrying the statement context.
    pub(crate) fn fatal_query(
        err: sqlx::Error,
        statement: &Statement,
        acquire_timeout: Duration,
    ) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::timeout("connection acquire", acquire_timeout),
            e => Self::query_failure(e.to_string(), &statement.sql, &statement.params),
        }
    }

    /// Map a non-transient driver error raised while running a batch.
    pub(crate) fn fatal_batch(
        err: sqlx::Error,
        statement: &str,
        index: usize,
        sets: usize,
        acquire_timeout: Duration,
    ) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::timeout("connection acquire", acquire_timeout),
            e => Self::batch_failure(e.to_string(), statement, index, sets),
        }
    }
}

/// Classify a driver error as connection-level.
///
/// Transient errors mark the pool unhealthy and trigger the retry path.
/// `PoolTimedOut` is excluded: an exhausted pool means the link is saturated,
/// not dead, and retrying would only pile on more waiters.
pub fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
