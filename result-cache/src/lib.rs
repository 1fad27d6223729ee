//! FILENAME: result-cache/src/lib.rs
//! Durable local cache for remote query results.
//!
//! Each query identity owns a namespace of named stores, optionally
//! partitioned by calendar-month key. Schema growth (new stores appearing
//! over time) is recorded in an append-only version log; staleness markers
//! detect upstream change without re-reading row data.
//!
//! Persistence is best effort: a disk failure degrades the cache to
//! in-memory operation with a logged warning, never an error to callers.
//! Missing stores and partitions read as empty, never as errors.

pub mod error;
pub mod schema;
pub mod staleness;
pub mod store;

pub use error::CacheError;
pub use schema::{SchemaEvent, SchemaLog};
pub use staleness::{StalenessCallback, StalenessChange, StalenessRecord};
pub use store::{LocalResultCache, ResultShape, StoreRecord, DEFAULT_PARTITION};
