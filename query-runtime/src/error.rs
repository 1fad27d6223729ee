//! FILENAME: query-runtime/src/error.rs

use thiserror::Error;

/// A single remote call failed. Partition-scoped: one month failing does
/// not abort the months still in flight.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("remote query failed: {0}")]
    Remote(String),

    #[error("remote query timed out")]
    Timeout,

    #[error("query executor is no longer running")]
    ExecutorStopped,
}

/// Surfaced by `ExecutionCoordinator::run`. Partial coverage is reported
/// as success; only a request with no usable partition at all errors.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("could not execute query {query_id}: all {requested} requested partitions failed")]
    AllPartitionsFailed { query_id: String, requested: usize },

    #[error(transparent)]
    Fetch(#[from] FetchError),
}
