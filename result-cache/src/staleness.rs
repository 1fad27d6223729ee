//! FILENAME: result-cache/src/staleness.rs
//! Staleness markers - opaque values used to detect upstream change
//! without re-reading row data.
//!
//! Markers compare by value equality; a write only happens (and the
//! registered change callback only fires) when the incoming marker
//! actually differs. An absent incoming marker never overwrites a stored
//! one, so a failed freshness probe keeps the last known good marker.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use table_model::Value;

/// Stored staleness state for one query identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StalenessRecord {
    /// The whole-query updatedAt marker.
    pub marker: Option<Value>,
    /// Optional finer-grained markers per partition key.
    pub per_partition: BTreeMap<String, Value>,
}

/// Passed to a registered callback when a query's marker changes.
#[derive(Debug, Clone)]
pub struct StalenessChange {
    pub query_id: String,
    pub previous: Option<Value>,
    pub current: Value,
    pub written_at: DateTime<Utc>,
}

/// Registered per query id via `LocalResultCache::register_staleness_callback`.
pub type StalenessCallback = Arc<dyn Fn(&StalenessChange) + Send + Sync>;
