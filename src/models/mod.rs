//! Data models for the database access layer.
//!
//! This module re-exports the statement and row types used throughout the crate.

pub mod row;
pub mod statement;

// Re-export commonly used types
pub use row::Row;
pub use statement::{DEFAULT_STREAM_BATCH_SIZE, QueryParam, Statement};
