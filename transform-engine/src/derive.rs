//! FILENAME: transform-engine/src/derive.rs
//! Derived and ratio ("percentage") columns.
//!
//! A derived column runs a user-supplied compute function per row; a ratio
//! column is `(valueField / targetField) * 100`. Both are scoped to where
//! they apply (main table, grouped report, nested sub-tables) and spliced
//! into the column order at a declared position.
//!
//! Compute failures are per-row-per-column: the cell becomes Null and row
//! processing continues.

use std::sync::Arc;

use table_model::{ColumnType, Row, Value};

// ============================================================================
// SCOPE
// ============================================================================

/// Where a derivation is being applied right now.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeriveScope {
    /// The flat main table.
    Main,
    /// A grouped report view.
    Report,
    /// A nested sub-table stored under the named field.
    Nested(String),
}

/// Which nested sub-tables a spec applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NestedFields {
    None,
    All,
    Fields(Vec<String>),
}

/// Declared applicability of a derived column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeSpec {
    pub main: bool,
    pub report: bool,
    pub nested: NestedFields,
}

impl Default for ScopeSpec {
    fn default() -> Self {
        ScopeSpec {
            main: true,
            report: true,
            nested: NestedFields::None,
        }
    }
}

impl ScopeSpec {
    pub fn matches(&self, scope: &DeriveScope) -> bool {
        match scope {
            DeriveScope::Main => self.main,
            DeriveScope::Report => self.report,
            DeriveScope::Nested(field) => match &self.nested {
                NestedFields::None => false,
                NestedFields::All => true,
                NestedFields::Fields(fields) => fields.iter().any(|f| f == field),
            },
        }
    }
}

// ============================================================================
// SPECS
// ============================================================================

/// Context handed to a compute function.
#[derive(Debug, Clone)]
pub struct DeriveContext {
    pub scope: DeriveScope,
    pub row_index: usize,
}

/// A user compute function. Errors become Null cells.
pub type ComputeFn = Arc<dyn Fn(&Row, &DeriveContext) -> Result<Value, String> + Send + Sync>;

/// A user-declared derived column.
#[derive(Clone)]
pub struct DerivedColumnSpec {
    pub name: String,
    pub compute: ComputeFn,
    pub scope: ScopeSpec,
    pub column_type: ColumnType,
    /// 0-based splice position in the column order; None appends.
    pub position: Option<usize>,
    /// Bump when the compute function changes, so memoized pipeline stages
    /// know to recompute.
    pub revision: u64,
}

impl std::fmt::Debug for DerivedColumnSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedColumnSpec")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("column_type", &self.column_type)
            .field("position", &self.position)
            .field("revision", &self.revision)
            .finish()
    }
}

impl DerivedColumnSpec {
    pub fn new(name: impl Into<String>, compute: ComputeFn) -> Self {
        DerivedColumnSpec {
            name: name.into(),
            compute,
            scope: ScopeSpec::default(),
            column_type: ColumnType::Number,
            position: None,
            revision: 0,
        }
    }
}

/// A user-declared ratio column: `(value_field / target_field) * 100`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RatioColumnSpec {
    pub name: String,
    pub value_field: String,
    pub target_field: String,
    /// Insert before this column in the column order; None appends.
    pub before_column: Option<String>,
}

impl RatioColumnSpec {
    /// Resolves the ratio for one row. Null when the target is zero or
    /// either side is non-numeric.
    pub fn resolve(&self, row: &Row) -> Value {
        let value = row.get(self.value_field.as_str()).and_then(|v| v.as_number());
        let target = row.get(self.target_field.as_str()).and_then(|v| v.as_number());
        match (value, target) {
            (Some(v), Some(t)) if t != 0.0 => Value::number(v / t * 100.0),
            _ => Value::Null,
        }
    }

    /// The group-level ratio: recomputed from summed numerator/denominator
    /// over the child rows, never averaged from per-row ratios.
    pub fn resolve_from_sums(&self, value_sum: f64, target_sum: f64) -> Value {
        if target_sum != 0.0 {
            Value::number(value_sum / target_sum * 100.0)
        } else {
            Value::Null
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Applies derived and ratio column specs to row sets.
pub struct DerivationEngine;

impl DerivationEngine {
    /// Computes every in-scope derived column onto a shallow copy of each
    /// row. Never mutates the input; idempotent for pure compute functions.
    pub fn apply_derived(
        rows: &[Row],
        specs: &[DerivedColumnSpec],
        scope: &DeriveScope,
    ) -> Vec<Row> {
        let active: Vec<&DerivedColumnSpec> =
            specs.iter().filter(|s| s.scope.matches(scope)).collect();
        if active.is_empty() {
            return rows.to_vec();
        }

        rows.iter()
            .enumerate()
            .map(|(row_index, row)| {
                let mut out = row.clone();
                let ctx = DeriveContext {
                    scope: scope.clone(),
                    row_index,
                };
                for spec in &active {
                    let value = (spec.compute)(row, &ctx).unwrap_or(Value::Null);
                    out.set(spec.name.clone(), value);
                }
                out
            })
            .collect()
    }

    /// Materializes ratio columns onto copies of the rows.
    /// Group rows keep the ratio already recomputed from sums by grouping.
    pub fn apply_ratio(rows: &[Row], specs: &[RatioColumnSpec]) -> Vec<Row> {
        if specs.is_empty() {
            return rows.to_vec();
        }
        rows.iter()
            .map(|row| {
                let mut out = row.clone();
                for spec in specs {
                    if row.is_group_row() && row.contains(spec.name.as_str()) {
                        continue;
                    }
                    out.set(spec.name.clone(), spec.resolve(row));
                }
                out
            })
            .collect()
    }
}

// ============================================================================
// COLUMN ORDERING
// ============================================================================

/// Splices derived/ratio columns into a base column order.
///
/// Positioned derived columns insert at their 0-based index, stable by
/// declaration order on ties; unpositioned ones append. Ratio columns insert
/// before their `before_column` when declared. Columns already present by
/// name are never duplicated.
pub fn ordered_columns(
    base: &[String],
    derived: &[DerivedColumnSpec],
    ratio: &[RatioColumnSpec],
) -> Vec<String> {
    let mut columns: Vec<String> = base
        .iter()
        .filter(|c| {
            !derived.iter().any(|d| &d.name == *c) && !ratio.iter().any(|r| &r.name == *c)
        })
        .cloned()
        .collect();

    let mut positioned: Vec<(usize, &str)> = Vec::new();
    for spec in derived {
        match spec.position {
            Some(pos) => positioned.push((pos, spec.name.as_str())),
            None => columns.push(spec.name.clone()),
        }
    }
    // Stable on equal positions: later declarations land after earlier ones.
    positioned.sort_by_key(|(pos, _)| *pos);
    for (pos, name) in positioned.into_iter().rev() {
        let at = pos.min(columns.len());
        columns.insert(at, name.to_string());
    }

    for spec in ratio {
        let at = spec
            .before_column
            .as_ref()
            .and_then(|before| columns.iter().position(|c| c == before))
            .unwrap_or(columns.len());
        columns.insert(at, spec.name.clone());
    }

    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, compute: ComputeFn) -> DerivedColumnSpec {
        DerivedColumnSpec::new(name, compute)
    }

    fn doubler() -> ComputeFn {
        Arc::new(|row, _ctx| {
            row.get("amt")
                .and_then(|v| v.as_number())
                .map(|n| Value::number(n * 2.0))
                .ok_or_else(|| "amt missing".to_string())
        })
    }

    #[test]
    fn derived_columns_do_not_mutate_input() {
        let rows = vec![Row::from_pairs([("amt", 10i64)])];
        let out = DerivationEngine::apply_derived(&rows, &[spec("dbl", doubler())], &DeriveScope::Main);
        assert_eq!(out[0].get("dbl"), Some(&Value::number(20.0)));
        assert!(!rows[0].contains("dbl"));
    }

    #[test]
    fn compute_failure_becomes_null_and_other_rows_continue() {
        let rows = vec![
            Row::from_pairs([("other", 1i64)]),
            Row::from_pairs([("amt", 10i64)]),
        ];
        let out = DerivationEngine::apply_derived(&rows, &[spec("dbl", doubler())], &DeriveScope::Main);
        assert_eq!(out[0].get("dbl"), Some(&Value::Null));
        assert_eq!(out[1].get("dbl"), Some(&Value::number(20.0)));
    }

    #[test]
    fn derivation_is_idempotent_for_pure_computes() {
        let rows = vec![Row::from_pairs([("amt", 7i64)])];
        let specs = [spec("dbl", doubler())];
        let once = DerivationEngine::apply_derived(&rows, &specs, &DeriveScope::Main);
        let twice = DerivationEngine::apply_derived(&once, &specs, &DeriveScope::Main);
        assert_eq!(once, twice);
    }

    #[test]
    fn scope_gating_skips_out_of_scope_specs() {
        let mut nested_only = spec("dbl", doubler());
        nested_only.scope = ScopeSpec {
            main: false,
            report: false,
            nested: NestedFields::Fields(vec!["items".to_string()]),
        };
        let rows = vec![Row::from_pairs([("amt", 1i64)])];
        let out = DerivationEngine::apply_derived(&rows, &[nested_only.clone()], &DeriveScope::Main);
        assert!(!out[0].contains("dbl"));
        let out = DerivationEngine::apply_derived(
            &rows,
            &[nested_only],
            &DeriveScope::Nested("items".to_string()),
        );
        assert!(out[0].contains("dbl"));
    }

    #[test]
    fn ratio_is_null_on_zero_target_or_non_numeric() {
        let spec = RatioColumnSpec {
            name: "pct".to_string(),
            value_field: "done".to_string(),
            target_field: "goal".to_string(),
            before_column: None,
        };
        let ok = Row::from_pairs([("done", 30i64), ("goal", 60i64)]);
        assert_eq!(spec.resolve(&ok), Value::number(50.0));
        let zero = Row::from_pairs([("done", 30i64), ("goal", 0i64)]);
        assert_eq!(spec.resolve(&zero), Value::Null);
        let text = Row::from_pairs([("done", Value::text("x")), ("goal", Value::number(10.0))]);
        assert_eq!(spec.resolve(&text), Value::Null);
    }

    #[test]
    fn column_order_splices_positions_and_before_columns() {
        let base = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut d1 = spec("d1", doubler());
        d1.position = Some(1);
        let mut d2 = spec("d2", doubler());
        d2.position = Some(1);
        let d3 = spec("d3", doubler());
        let ratio = RatioColumnSpec {
            name: "pct".to_string(),
            value_field: "a".to_string(),
            target_field: "b".to_string(),
            before_column: Some("c".to_string()),
        };
        let cols = ordered_columns(&base, &[d1, d2, d3], &[ratio]);
        assert_eq!(cols, vec!["a", "d1", "d2", "b", "pct", "c", "d3"]);
    }

    #[test]
    fn reordering_never_duplicates_existing_columns() {
        let base = vec!["a".to_string(), "dbl".to_string()];
        let cols = ordered_columns(&base, &[spec("dbl", doubler())], &[]);
        assert_eq!(cols, vec!["a", "dbl"]);
    }
}
