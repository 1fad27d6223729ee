//! FILENAME: transform-engine/src/sort.rs
//! Type-aware sorting.
//!
//! Sort keys are extracted once per (field, data generation) and reused
//! across re-sorts; comparisons are total so sorting never panics.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use table_model::column_meta::parse_date;
use table_model::{ColumnType, Row, Value};

// ============================================================================
// SORT SPEC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl Default for SortDirection {
    fn default() -> Self {
        SortDirection::Ascending
    }
}

/// One requested sort: a field and a direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        SortSpec {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortSpec {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

// ============================================================================
// SORT KEYS
// ============================================================================

/// A cell value reduced to its comparable form for one column type.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Null,
    Bool(bool),
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

/// Extracts the sort key for a cell under the column's inferred type.
/// Cells that do not fit the type sort as Null (first in ascending order).
pub fn sort_key(value: &Value, column_type: ColumnType) -> SortKey {
    if value.is_null() {
        return SortKey::Null;
    }
    match column_type {
        ColumnType::Number => match value.as_number() {
            Some(n) => SortKey::Number(n),
            None => SortKey::Null,
        },
        ColumnType::Date => match value {
            Value::Text(s) => parse_date(s).map(SortKey::Date).unwrap_or(SortKey::Null),
            _ => SortKey::Null,
        },
        ColumnType::Boolean => match value {
            Value::Bool(b) => SortKey::Bool(*b),
            _ => match value.as_number() {
                Some(n) => SortKey::Bool(n != 0.0),
                None => SortKey::Null,
            },
        },
        ColumnType::Text => SortKey::Text(value.to_display_string().to_lowercase()),
    }
}

/// Total ordering over sort keys: Null first, then by value.
pub fn compare_keys(a: &SortKey, b: &SortKey) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (SortKey::Null, SortKey::Null) => Ordering::Equal,
        (SortKey::Null, _) => Ordering::Less,
        (_, SortKey::Null) => Ordering::Greater,
        (SortKey::Bool(x), SortKey::Bool(y)) => x.cmp(y),
        (SortKey::Number(x), SortKey::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (SortKey::Date(x), SortKey::Date(y)) => x.cmp(y),
        (SortKey::Text(x), SortKey::Text(y)) => x.cmp(y),
        // Mixed keys only appear when a column's type was re-inferred
        // mid-sort; bucket order keeps the sort total.
        (SortKey::Bool(_), _) => Ordering::Less,
        (_, SortKey::Bool(_)) => Ordering::Greater,
        (SortKey::Number(_), _) => Ordering::Less,
        (_, SortKey::Number(_)) => Ordering::Greater,
        (SortKey::Date(_), _) => Ordering::Less,
        (_, SortKey::Date(_)) => Ordering::Greater,
    }
}

// ============================================================================
// SORTING
// ============================================================================

/// Stable multi-column sort. `resolve` maps (row, field) to the cell value
/// (ratio columns resolve to their computed ratio here), `type_of` supplies
/// the column's inferred type.
pub fn sort_rows(
    rows: &mut [Row],
    specs: &[SortSpec],
    resolve: impl Fn(&Row, &str) -> Value,
    type_of: impl Fn(&str) -> ColumnType,
) {
    if specs.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for spec in specs {
            let column_type = type_of(&spec.field);
            let ka = sort_key(&resolve(a, &spec.field), column_type);
            let kb = sort_key(&resolve(b, &spec.field), column_type);
            let ord = match spec.direction {
                SortDirection::Ascending => compare_keys(&ka, &kb),
                SortDirection::Descending => compare_keys(&kb, &ka),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

// ============================================================================
// SORT KEY CACHE
// ============================================================================

/// Caches extracted `(row, sort key)` pairs for the pre-group sort so large
/// datasets are not re-scanned on every re-sort. Invalidated when the field
/// or the data generation changes.
#[derive(Debug, Default)]
pub struct SortKeyCache {
    field: String,
    generation: u64,
    keys: Vec<SortKey>,
}

impl SortKeyCache {
    /// Returns cached keys for (field, generation), extracting them on miss.
    pub fn keys_for(
        &mut self,
        rows: &[Row],
        field: &str,
        column_type: ColumnType,
        generation: u64,
    ) -> &[SortKey] {
        if self.field != field || self.generation != generation || self.keys.len() != rows.len() {
            self.field = field.to_string();
            self.generation = generation;
            self.keys = rows
                .iter()
                .map(|row| sort_key(row.get(field).unwrap_or(&Value::Null), column_type))
                .collect();
        }
        &self.keys
    }
}

/// Sorts by precomputed keys, returning the permuted rows. Stable.
pub fn sort_by_keys(rows: Vec<Row>, keys: &[SortKey], direction: SortDirection) -> Vec<Row> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| {
        let ord = compare_keys(&keys[a], &keys[b]);
        match direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
    let mut slots: Vec<Option<Row>> = rows.into_iter().map(Some).collect();
    order
        .into_iter()
        .map(|i| slots[i].take().expect("each index used once"))
        .collect()
}
