//! FILENAME: result-cache/src/schema.rs
//! Append-only schema-version log.
//!
//! A namespace's store set only ever grows, and every growth event is
//! recorded: which partition it belongs to, which store names appeared, and
//! a monotonically increasing version. Replaying the log reproduces the
//! full store set, so migrations keep already-written stores intact.

use serde::{Deserialize, Serialize};

/// One schema growth event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaEvent {
    /// The log version after this event was applied (1-based).
    pub version: u64,
    /// Partition the new stores belong to (`"__default__"` when flat).
    pub partition: String,
    /// Fully prefixed store names created by this event.
    pub stores: Vec<String>,
    /// RFC 3339 timestamp of the growth.
    pub recorded_at: String,
}

/// The per-namespace log. `version` equals the number of growth events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaLog {
    pub version: u64,
    pub events: Vec<SchemaEvent>,
}

impl SchemaLog {
    /// Replays the log into the complete set of store names.
    pub fn store_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for event in &self.events {
            for store in &event.stores {
                if !names.iter().any(|n| n == store) {
                    names.push(store.clone());
                }
            }
        }
        names
    }

    pub fn contains_store(&self, name: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.stores.iter().any(|s| s == name))
    }

    /// The partition a store was created under, if it exists.
    pub fn partition_of(&self, store: &str) -> Option<&str> {
        self.events
            .iter()
            .find(|e| e.stores.iter().any(|s| s == store))
            .map(|e| e.partition.as_str())
    }

    pub fn has_partition(&self, partition: &str) -> bool {
        self.events.iter().any(|e| e.partition == partition)
    }

    /// Records a growth event for store names not yet in the log.
    /// Additive only; returns false when every name already exists.
    pub fn record(&mut self, partition: &str, stores: Vec<String>) -> bool {
        let new_stores: Vec<String> = stores
            .into_iter()
            .filter(|s| !self.contains_store(s))
            .collect();
        if new_stores.is_empty() {
            return false;
        }
        self.version += 1;
        self.events.push(SchemaEvent {
            version: self.version,
            partition: partition.to_string(),
            stores: new_stores,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_is_additive_and_versioned() {
        let mut log = SchemaLog::default();
        assert!(log.record("__default__", vec!["rows".to_string()]));
        assert!(log.record("2024-01", vec!["2024-01_rows".to_string()]));
        assert_eq!(log.version, 2);
        assert_eq!(log.store_names(), vec!["rows", "2024-01_rows"]);
        assert_eq!(log.partition_of("2024-01_rows"), Some("2024-01"));
    }

    #[test]
    fn recording_existing_stores_is_a_no_op() {
        let mut log = SchemaLog::default();
        log.record("__default__", vec!["rows".to_string()]);
        assert!(!log.record("__default__", vec!["rows".to_string()]));
        assert_eq!(log.version, 1);
        assert_eq!(log.events.len(), 1);
    }
}
