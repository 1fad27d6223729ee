//! FILENAME: result-cache/src/store.rs
//! The local result cache.
//!
//! Layout per query namespace (on disk under `<root>/<dir>/`):
//! - `namespace.json`: query id, schema-version log, staleness record
//! - `stores/<store>.json`: the store's records, one atomic file per store
//!
//! Store names are `"{YYYY-MM}_{key}"` for partitioned data and the bare
//! logical key otherwise. A store write replaces the whole record list
//! under the namespace lock, so readers never observe a half-written store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use table_model::{Row, Value};

use crate::error::CacheError;
use crate::schema::SchemaLog;
use crate::staleness::{StalenessCallback, StalenessChange, StalenessRecord};

/// Partition key for non-time-partitioned namespaces.
pub const DEFAULT_PARTITION: &str = "__default__";

/// A query result: logical key -> ordered rows.
pub type ResultShape = BTreeMap<String, Vec<Row>>;

// ============================================================================
// RECORDS
// ============================================================================

/// One persisted row with its stable write-order index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRecord {
    pub index: u64,
    pub data: Row,
}

/// On-disk shape of `namespace.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceFile {
    query_id: String,
    schema: SchemaLog,
    staleness: StalenessRecord,
}

#[derive(Debug, Default)]
struct QueryNamespace {
    schema: SchemaLog,
    stores: FxHashMap<String, Vec<StoreRecord>>,
    staleness: StalenessRecord,
}

// ============================================================================
// CACHE
// ============================================================================

/// Durable per-query-identity result cache with dynamically created,
/// optionally month-partitioned stores.
pub struct LocalResultCache {
    /// None runs the cache purely in memory (also the degraded mode after
    /// a persistence failure at open time).
    root: Option<PathBuf>,
    inner: RwLock<FxHashMap<String, QueryNamespace>>,
    callbacks: Mutex<FxHashMap<String, StalenessCallback>>,
}

impl LocalResultCache {
    /// An in-memory cache with no persistence.
    pub fn in_memory() -> Self {
        LocalResultCache {
            root: None,
            inner: RwLock::new(FxHashMap::default()),
            callbacks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Opens (or creates) a cache rooted at `root`, loading any namespaces
    /// persisted by earlier sessions. Load failures are logged and skipped.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let cache = LocalResultCache {
            root: Some(root.clone()),
            inner: RwLock::new(FxHashMap::default()),
            callbacks: Mutex::new(FxHashMap::default()),
        };
        if let Err(err) = cache.load_all(&root) {
            log::warn!("result cache load failed, starting empty: {}", err);
        }
        cache
    }

    /// The fully prefixed store name for a logical key.
    pub fn store_name(partition: Option<&str>, key: &str) -> String {
        match partition {
            Some(p) => format!("{}_{}", p, key),
            None => key.to_string(),
        }
    }

    // ========================================================================
    // STALENESS
    // ========================================================================

    pub fn register_staleness_callback(&self, query_id: &str, callback: StalenessCallback) {
        self.callbacks
            .lock()
            .expect("callback registry poisoned")
            .insert(query_id.to_string(), callback);
    }

    pub fn unregister_staleness_callback(&self, query_id: &str) {
        self.callbacks
            .lock()
            .expect("callback registry poisoned")
            .remove(query_id);
    }

    /// Reads the stored marker. No side effects.
    pub fn get_staleness(&self, query_id: &str) -> Option<Value> {
        self.inner
            .read()
            .expect("cache lock poisoned")
            .get(query_id)
            .and_then(|ns| ns.staleness.marker.clone())
    }

    /// Writes `marker` only when it differs by value from the stored one.
    /// Returns whether a write happened. A `None` marker never overwrites
    /// an existing marker. The registered change callback runs after the
    /// write completes, outside the cache lock.
    pub fn put_staleness(&self, query_id: &str, marker: Option<Value>) -> bool {
        let incoming = match marker {
            Some(m) => m,
            None => return false,
        };

        let change = {
            let mut inner = self.inner.write().expect("cache lock poisoned");
            let ns = inner.entry(query_id.to_string()).or_default();
            if ns.staleness.marker.as_ref() == Some(&incoming) {
                return false;
            }
            let previous = ns.staleness.marker.replace(incoming.clone());
            self.persist_namespace(query_id, ns);
            StalenessChange {
                query_id: query_id.to_string(),
                previous,
                current: incoming,
                written_at: chrono::Utc::now(),
            }
        };

        let callback = self
            .callbacks
            .lock()
            .expect("callback registry poisoned")
            .get(query_id)
            .cloned();
        if let Some(callback) = callback {
            callback(&change);
        }
        true
    }

    // ========================================================================
    // SCHEMA GROWTH
    // ========================================================================

    /// Creates a store for every array-valued key of `shape` that does not
    /// exist yet, under the given partition. Additive only: existing stores
    /// and their data are untouched.
    pub fn ensure_stores(&self, query_id: &str, shape: &ResultShape, partition: Option<&str>) {
        let partition_key = partition.unwrap_or(DEFAULT_PARTITION);
        let names: Vec<String> = shape
            .keys()
            .map(|key| Self::store_name(partition, key))
            .collect();

        let mut inner = self.inner.write().expect("cache lock poisoned");
        let ns = inner.entry(query_id.to_string()).or_default();
        if ns.schema.record(partition_key, names.clone()) {
            // Migration: replay keeps existing stores, then adds the new
            // ones as empty.
            for name in ns.schema.store_names() {
                ns.stores.entry(name).or_default();
            }
            self.persist_namespace(query_id, ns);
        }
    }

    // ========================================================================
    // READ / WRITE
    // ========================================================================

    /// Replaces the store's contents with `rows`, assigning each row a
    /// stable ascending index. The replace is atomic under the cache lock.
    pub fn write_entries(&self, query_id: &str, store: &str, rows: Vec<Row>) {
        let records: Vec<StoreRecord> = rows
            .into_iter()
            .enumerate()
            .map(|(i, data)| StoreRecord {
                index: i as u64,
                data,
            })
            .collect();

        let mut inner = self.inner.write().expect("cache lock poisoned");
        let ns = inner.entry(query_id.to_string()).or_default();
        ns.stores.insert(store.to_string(), records);
        self.persist_store(query_id, store, ns);
    }

    /// Reads a store's rows in index order. Missing stores read as empty.
    pub fn read_entries(&self, query_id: &str, store: &str) -> Vec<Row> {
        let inner = self.inner.read().expect("cache lock poisoned");
        let records = match inner.get(query_id).and_then(|ns| ns.stores.get(store)) {
            Some(r) => r,
            None => return Vec::new(),
        };
        let mut ordered: Vec<&StoreRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.index);
        ordered.into_iter().map(|r| r.data.clone()).collect()
    }

    /// Reads every store of the requested partition (or the unpartitioned
    /// stores when `partition` is None), strips the partition prefix, and
    /// returns the union as a result shape. Optionally restricted to the
    /// given logical keys. Missing anything reads as empty.
    pub fn reconstruct(
        &self,
        query_id: &str,
        store_keys: Option<&[String]>,
        partition: Option<&str>,
    ) -> ResultShape {
        let partition_key = partition.unwrap_or(DEFAULT_PARTITION);
        let prefix = partition.map(|p| format!("{}_", p));

        let inner = self.inner.read().expect("cache lock poisoned");
        let ns = match inner.get(query_id) {
            Some(ns) => ns,
            None => return ResultShape::new(),
        };

        let mut shape = ResultShape::new();
        for store in ns.schema.store_names() {
            if ns.schema.partition_of(&store) != Some(partition_key) {
                continue;
            }
            let logical = match &prefix {
                Some(p) => match store.strip_prefix(p.as_str()) {
                    Some(rest) => rest.to_string(),
                    None => continue,
                },
                None => store.clone(),
            };
            if let Some(keys) = store_keys {
                if !keys.iter().any(|k| k == &logical) {
                    continue;
                }
            }
            let mut records: Vec<&StoreRecord> = ns
                .stores
                .get(&store)
                .map(|r| r.iter().collect())
                .unwrap_or_default();
            records.sort_by_key(|r| r.index);
            shape
                .entry(logical)
                .or_insert_with(Vec::new)
                .extend(records.into_iter().map(|r| r.data.clone()));
        }
        shape
    }

    /// Reads the union of several partitions into one shape, partitions in
    /// the order given.
    pub fn reconstruct_partitions(&self, query_id: &str, partitions: &[String]) -> ResultShape {
        let mut shape = ResultShape::new();
        for partition in partitions {
            for (key, rows) in self.reconstruct(query_id, None, Some(partition)) {
                shape.entry(key).or_insert_with(Vec::new).extend(rows);
            }
        }
        shape
    }

    /// Which of `candidates` already have cached data for this query.
    pub fn cached_partitions(&self, query_id: &str, candidates: &[String]) -> Vec<String> {
        let inner = self.inner.read().expect("cache lock poisoned");
        let ns = match inner.get(query_id) {
            Some(ns) => ns,
            None => return Vec::new(),
        };
        candidates
            .iter()
            .filter(|p| ns.schema.has_partition(p))
            .cloned()
            .collect()
    }

    /// Drops a query's namespace entirely (the only destructive operation).
    pub fn clear(&self, query_id: &str) {
        let mut inner = self.inner.write().expect("cache lock poisoned");
        inner.remove(query_id);
        if let Some(root) = &self.root {
            let dir = root.join(sanitize(query_id));
            if dir.exists() {
                if let Err(err) = fs::remove_dir_all(&dir) {
                    log::warn!("failed to remove cache dir {:?}: {}", dir, err);
                }
            }
        }
    }

    // ========================================================================
    // PERSISTENCE (best effort)
    // ========================================================================

    fn persist_namespace(&self, query_id: &str, ns: &QueryNamespace) {
        let root = match &self.root {
            Some(r) => r,
            None => return,
        };
        let file = NamespaceFile {
            query_id: query_id.to_string(),
            schema: ns.schema.clone(),
            staleness: ns.staleness.clone(),
        };
        let path = root.join(sanitize(query_id)).join("namespace.json");
        if let Err(err) = write_json(&path, &file) {
            log::warn!("cache namespace persist failed for {}: {}", query_id, err);
        }
    }

    fn persist_store(&self, query_id: &str, store: &str, ns: &QueryNamespace) {
        let root = match &self.root {
            Some(r) => r,
            None => return,
        };
        let records = match ns.stores.get(store) {
            Some(r) => r,
            None => return,
        };
        let path = root
            .join(sanitize(query_id))
            .join("stores")
            .join(format!("{}.json", sanitize(store)));
        if let Err(err) = write_json(&path, records) {
            log::warn!(
                "cache store persist failed for {}/{}: {}",
                query_id,
                store,
                err
            );
        }
    }

    fn load_all(&self, root: &Path) -> Result<(), CacheError> {
        if !root.exists() {
            fs::create_dir_all(root)?;
            return Ok(());
        }
        let mut inner = self.inner.write().expect("cache lock poisoned");
        for entry in fs::read_dir(root)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            match load_namespace(&dir) {
                Ok(Some((query_id, ns))) => {
                    inner.insert(query_id, ns);
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!("skipping unreadable cache dir {:?}: {}", dir, err);
                }
            }
        }
        Ok(())
    }
}

fn load_namespace(dir: &Path) -> Result<Option<(String, QueryNamespace)>, CacheError> {
    let meta_path = dir.join("namespace.json");
    if !meta_path.exists() {
        return Ok(None);
    }
    let meta: NamespaceFile = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
    if meta.query_id.is_empty() {
        return Err(CacheError::InvalidLayout(format!(
            "{} names no query id",
            meta_path.display()
        )));
    }

    let mut ns = QueryNamespace {
        schema: meta.schema,
        stores: FxHashMap::default(),
        staleness: meta.staleness,
    };
    // Replay the schema log so every known store exists, then fill in
    // whatever record files survive on disk.
    for store in ns.schema.store_names() {
        let path = dir.join("stores").join(format!("{}.json", sanitize(&store)));
        let records = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        ns.stores.insert(store, records);
    }
    Ok(Some((meta.query_id, ns)))
}

/// Serializes to a sibling temp file and renames over the target, so a
/// crash mid-write leaves the previous file intact.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}
