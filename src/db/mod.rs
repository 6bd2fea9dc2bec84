//! Database access layer.
//!
//! This module provides the moving parts behind the client:
//! - Connection pool lifecycle and health tracking
//! - Statement execution against MySQL and SQLite
//! - Bounded retry of connection-level failures
//! - Batched row streaming
//! - Explicit transactions pinned to one connection

pub mod executor;
pub mod params;
pub mod pool;
pub mod retry;
pub mod stream;
pub mod transaction;
pub mod types;

pub use pool::{DbPool, PoolManager, PoolStatus};
pub use stream::RowStream;
pub use transaction::Transaction;
