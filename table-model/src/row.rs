//! FILENAME: table-model/src/row.rs
//! Row - an insertion-ordered mapping from column name to cell value.
//!
//! Rows preserve the column order they were built in (important for column
//! resolution and derived-column splicing), serialize as plain JSON objects,
//! and reserve a `"__"` key prefix for engine metadata (group markers,
//! synthetic edit keys) so metadata can never collide with real columns.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::Value;

// ============================================================================
// RESERVED KEYS
// ============================================================================

/// Prefix reserved for engine metadata. Data columns must never start with it.
pub const RESERVED_PREFIX: &str = "__";

/// The group-by value a GroupNode row represents.
pub const GROUP_KEY_KEY: &str = "__group_key";
/// The field the GroupNode row was grouped on.
pub const GROUP_FIELD_KEY: &str = "__group_field";
/// Zero-based nesting level of a GroupNode row.
pub const GROUP_LEVEL_KEY: &str = "__group_level";
/// Number of direct children under a GroupNode row.
pub const GROUP_CHILD_COUNT_KEY: &str = "__group_child_count";
/// Group-key path from the root down to a GroupNode row.
pub const GROUP_PATH_KEY: &str = "__group_path";

// ============================================================================
// ROW
// ============================================================================

/// One row of table data. Lookup is linear, which is fine for the column
/// counts tables actually have; what matters is stable iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Row { entries: Vec::new() }
    }

    /// Builds a row from (column, value) pairs, keeping their order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut row = Row::new();
        for (k, v) in pairs {
            row.set(k.into(), v.into());
        }
        row
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    /// Sets a column value, replacing in place if the column exists
    /// (preserving its position) and appending otherwise.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(name, _)| *name == column) {
            entry.1 = value;
        } else {
            self.entries.push((column, value));
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(name, _)| name == column)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == column)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Column names excluding reserved metadata keys.
    pub fn data_columns(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| !k.starts_with(RESERVED_PREFIX))
    }

    /// Whether this row is a synthetic GroupNode row.
    pub fn is_group_row(&self) -> bool {
        self.contains(GROUP_KEY_KEY)
    }

    /// Resolves a dotted field path (`"a.b"` descends into nested rows;
    /// a nested table resolves through its first row). Missing segments
    /// resolve to Null.
    pub fn get_path(&self, path: &str) -> Value {
        let mut segments = path.split('.');
        let first = match segments.next() {
            Some(s) => s,
            None => return Value::Null,
        };
        let mut current = match self.get(first) {
            Some(v) => v.clone(),
            None => return Value::Null,
        };
        for segment in segments {
            current = match current {
                Value::Rows(rows) => rows
                    .first()
                    .and_then(|r| r.get(segment).cloned())
                    .unwrap_or(Value::Null),
                _ => return Value::Null,
            };
        }
        current
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct RowVisitor;

impl<'de> Visitor<'de> for RowVisitor {
    type Value = Row;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a map of column names to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Row, A::Error> {
        let mut row = Row::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            row.set(key, value);
        }
        Ok(row)
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Row, D::Error> {
        deserializer.deserialize_map(RowVisitor)
    }
}
