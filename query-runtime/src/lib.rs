//! FILENAME: query-runtime/src/lib.rs
//! Deduplicated query execution over the local result cache.
//!
//! The coordinator decides per request whether to serve from cache, fetch
//! the missing calendar months, or coalesce into an identical in-flight
//! execution. Remote calls run on a background execution unit reached only
//! via message passing; the caller never blocks on the network directly.

pub mod coordinator;
pub mod error;
pub mod months;
pub mod service;
pub mod worker;

pub use coordinator::{ExecutionCoordinator, ExecutionOutcome, ExecutionReport};
pub use error::{ExecutionError, FetchError};
pub use months::{MonthRange, YearMonth};
pub use service::{QueryVariables, RemoteQueryService, StalenessMarker};
pub use worker::QueryExecutor;
