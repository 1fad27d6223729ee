//! FILENAME: table-model/src/column_meta.rs
//! Column metadata resolution - infers per-column types and filter behavior
//! from a sample of the dataset.
//!
//! The resolver is recomputed whenever the sampled data, the type overrides,
//! or the derived/ratio configuration change; it is pure and holds no state.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::row::Row;
use crate::value::Value;

/// How many rows of the dataset are inspected for inference.
const SAMPLE_LIMIT: usize = 64;

/// A text column with at most this many distinct values filters as
/// multi-select; above it, free-text.
const MULTI_SELECT_MAX_DISTINCT: usize = 24;

// ============================================================================
// COLUMN TYPE
// ============================================================================

/// Inferred value type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
}

impl Default for ColumnType {
    fn default() -> Self {
        ColumnType::Text
    }
}

/// Date formats the engine recognizes. Kept deliberately small.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    // RFC 3339 timestamps reduce to their date component.
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.date_naive())
}

// ============================================================================
// COLUMN META
// ============================================================================

/// Filter/aggregation metadata for one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    pub name: String,
    pub column_type: ColumnType,
    /// Low-cardinality text columns filter via a value picker.
    pub is_multi_select: bool,
    /// Declared by a DerivedColumnSpec rather than present in source data.
    pub is_derived: bool,
    /// Declared by a RatioColumnSpec; always numeric for filter/sort.
    pub is_ratio: bool,
}

impl ColumnMeta {
    fn data(name: &str, column_type: ColumnType, is_multi_select: bool) -> Self {
        ColumnMeta {
            name: name.to_string(),
            column_type,
            is_multi_select,
            is_derived: false,
            is_ratio: false,
        }
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Stateless resolver turning a data sample plus configuration into a
/// `ColumnMeta` list (one entry per column, in first-seen column order).
pub struct ColumnMetaResolver<'a> {
    /// Explicit per-column type overrides win over inference.
    pub type_overrides: &'a HashMap<String, ColumnType>,
    /// Names of declared derived columns and their declared types.
    pub derived_columns: &'a [(String, ColumnType)],
    /// Names of declared ratio columns.
    pub ratio_columns: &'a [String],
}

impl<'a> ColumnMetaResolver<'a> {
    pub fn resolve(&self, rows: &[Row]) -> Vec<ColumnMeta> {
        let sample = &rows[..rows.len().min(SAMPLE_LIMIT)];

        // First-seen column order across the sample.
        let mut order: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for row in sample {
            for col in row.data_columns() {
                if seen.insert(col.to_string()) {
                    order.push(col.to_string());
                }
            }
        }

        let derived_names: HashSet<&str> =
            self.derived_columns.iter().map(|(n, _)| n.as_str()).collect();
        let ratio_names: HashSet<&str> =
            self.ratio_columns.iter().map(|s| s.as_str()).collect();

        let mut metas: Vec<ColumnMeta> = order
            .iter()
            .map(|name| {
                let column_type = self
                    .type_overrides
                    .get(name)
                    .copied()
                    .unwrap_or_else(|| infer_type(sample, name));
                let is_multi_select =
                    column_type == ColumnType::Text && is_low_cardinality(sample, name);
                let mut meta = ColumnMeta::data(name, column_type, is_multi_select);
                if derived_names.contains(name.as_str()) {
                    meta.is_derived = true;
                }
                if ratio_names.contains(name.as_str()) {
                    meta.is_ratio = true;
                    meta.column_type = ColumnType::Number;
                }
                meta
            })
            .collect();

        // Declared derived/ratio columns that never appeared in the sample
        // still get metadata so filters can target them.
        for (name, column_type) in self.derived_columns {
            if !seen.contains(name) {
                let mut meta = ColumnMeta::data(name, *column_type, false);
                meta.is_derived = true;
                metas.push(meta);
            }
        }
        for name in self.ratio_columns {
            if !seen.contains(name) && !metas.iter().any(|m| &m.name == name) {
                let mut meta = ColumnMeta::data(name, ColumnType::Number, false);
                meta.is_ratio = true;
                metas.push(meta);
            }
        }

        metas
    }
}

/// Majority-vote type inference over non-null sample values.
fn infer_type(sample: &[Row], column: &str) -> ColumnType {
    let mut numbers = 0usize;
    let mut dates = 0usize;
    let mut bools = 0usize;
    let mut total = 0usize;

    for row in sample {
        let value = match row.get(column) {
            Some(v) if !v.is_null() => v,
            _ => continue,
        };
        total += 1;
        match value {
            Value::Number(_) => numbers += 1,
            Value::Bool(_) => bools += 1,
            Value::Text(s) => {
                if parse_date(s).is_some() {
                    dates += 1;
                } else if s.trim().parse::<f64>().is_ok() {
                    numbers += 1;
                }
            }
            _ => {}
        }
    }

    if total == 0 {
        return ColumnType::Text;
    }
    // More than half of the non-null values decide the type.
    let half = total / 2;
    if numbers > half {
        ColumnType::Number
    } else if dates > half {
        ColumnType::Date
    } else if bools > half {
        ColumnType::Boolean
    } else {
        ColumnType::Text
    }
}

fn is_low_cardinality(sample: &[Row], column: &str) -> bool {
    let mut distinct: HashSet<String> = HashSet::new();
    for row in sample {
        if let Some(v) = row.get(column) {
            if !v.is_null() {
                distinct.insert(v.to_display_string());
                if distinct.len() > MULTI_SELECT_MAX_DISTINCT {
                    return false;
                }
            }
        }
    }
    !distinct.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(rows: &[Row]) -> Vec<ColumnMeta> {
        let overrides = HashMap::new();
        ColumnMetaResolver {
            type_overrides: &overrides,
            derived_columns: &[],
            ratio_columns: &[],
        }
        .resolve(rows)
    }

    #[test]
    fn infers_number_date_and_boolean_columns() {
        let rows: Vec<Row> = (0..4)
            .map(|i| {
                Row::from_pairs([
                    ("amt", Value::number(i as f64)),
                    ("day", Value::text("2024-03-01")),
                    ("ok", Value::Bool(i % 2 == 0)),
                    ("name", Value::text(format!("row {}", i))),
                ])
            })
            .collect();
        let metas = resolve(&rows);
        let by_name = |n: &str| metas.iter().find(|m| m.name == n).unwrap();
        assert_eq!(by_name("amt").column_type, ColumnType::Number);
        assert_eq!(by_name("day").column_type, ColumnType::Date);
        assert_eq!(by_name("ok").column_type, ColumnType::Boolean);
        assert_eq!(by_name("name").column_type, ColumnType::Text);
    }

    #[test]
    fn numeric_text_counts_as_number() {
        let rows: Vec<Row> = (0..3)
            .map(|i| Row::from_pairs([("n", Value::text(format!("{}", i * 10)))]))
            .collect();
        assert_eq!(resolve(&rows)[0].column_type, ColumnType::Number);
    }

    #[test]
    fn low_cardinality_text_is_multi_select() {
        let rows: Vec<Row> = (0..30)
            .map(|i| {
                Row::from_pairs([
                    ("team", Value::text(if i % 2 == 0 { "A" } else { "B" })),
                    ("note", Value::text(format!("unique note {}", i))),
                ])
            })
            .collect();
        let metas = resolve(&rows);
        assert!(metas.iter().find(|m| m.name == "team").unwrap().is_multi_select);
        assert!(!metas.iter().find(|m| m.name == "note").unwrap().is_multi_select);
    }

    #[test]
    fn overrides_and_declared_columns_are_applied() {
        let rows = vec![Row::from_pairs([("code", Value::number(7.0))])];
        let mut overrides = HashMap::new();
        overrides.insert("code".to_string(), ColumnType::Text);
        let derived = vec![("margin".to_string(), ColumnType::Number)];
        let ratio = vec!["pct".to_string()];
        let metas = ColumnMetaResolver {
            type_overrides: &overrides,
            derived_columns: &derived,
            ratio_columns: &ratio,
        }
        .resolve(&rows);

        assert_eq!(metas[0].column_type, ColumnType::Text);
        let margin = metas.iter().find(|m| m.name == "margin").unwrap();
        assert!(margin.is_derived);
        let pct = metas.iter().find(|m| m.name == "pct").unwrap();
        assert!(pct.is_ratio);
        assert_eq!(pct.column_type, ColumnType::Number);
    }
}
