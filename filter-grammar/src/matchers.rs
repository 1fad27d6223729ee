//! FILENAME: filter-grammar/src/matchers.rs
//! Date-range, tri-state boolean, and multi-select matchers, plus the
//! `ColumnFilter` descriptor that ties a filter kind to a column.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use table_model::column_meta::parse_date;
use table_model::Value;

use crate::numeric::NumericFilter;

// ============================================================================
// DATE FILTER
// ============================================================================

/// A `[start, end]` date range; either side is optional.
/// A cell matches when its parsed date falls within
/// `[startOfDay(start), endOfDay(end)]`, or satisfies the one-sided bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateFilter {
    pub fn matches(&self, cell: &Value) -> bool {
        let date = match cell {
            Value::Text(s) => parse_date(s),
            _ => None,
        };
        let cell_dt = match date {
            Some(d) => match d.and_hms_opt(0, 0, 0) {
                Some(dt) => dt,
                None => return false,
            },
            None => return false,
        };
        if let Some(start) = self.start {
            let lower: NaiveDateTime = match start.and_hms_opt(0, 0, 0) {
                Some(dt) => dt,
                None => return false,
            };
            if cell_dt < lower {
                return false;
            }
        }
        if let Some(end) = self.end {
            let upper: NaiveDateTime = match end.and_hms_opt(23, 59, 59) {
                Some(dt) => dt,
                None => return false,
            };
            if cell_dt > upper {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// BOOLEAN FILTER
// ============================================================================

/// Tri-state boolean filter: `Some(true)` matches truthy-equivalent cells
/// (`true`, `1`, `"1"`), `Some(false)` matches falsy-equivalent cells
/// (`false`, `0`, `"0"`), `None` matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolFilter(pub Option<bool>);

impl BoolFilter {
    pub fn matches(&self, cell: &Value) -> bool {
        let wanted = match self.0 {
            Some(b) => b,
            None => return true,
        };
        let cell_bool = match cell {
            Value::Bool(b) => Some(*b),
            Value::Number(n) if n.as_f64() == 1.0 => Some(true),
            Value::Number(n) if n.as_f64() == 0.0 => Some(false),
            Value::Text(s) if s == "1" || s == "true" => Some(true),
            Value::Text(s) if s == "0" || s == "false" => Some(false),
            _ => None,
        };
        cell_bool == Some(wanted)
    }
}

// ============================================================================
// MULTI-SELECT FILTER
// ============================================================================

/// A cell matches when it equals (by value or string coercion) any entry in
/// the selected set. `Value::Null` in the set is the explicit sentinel for
/// null/absent cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiSelectFilter {
    pub selected: Vec<Value>,
}

impl MultiSelectFilter {
    pub fn new(selected: Vec<Value>) -> Self {
        MultiSelectFilter { selected }
    }

    pub fn matches(&self, cell: &Value) -> bool {
        if cell.is_null() {
            return self.selected.iter().any(|v| v.is_null());
        }
        self.selected.iter().any(|v| v.coerced_eq(cell))
    }
}

// ============================================================================
// COLUMN FILTER
// ============================================================================

/// One active filter on one column. The kind is chosen from the column's
/// resolved `ColumnMeta` type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ColumnFilter {
    /// Case-insensitive substring over the stringified cell.
    Text { term: String },
    Numeric { filter: NumericFilter },
    MultiSelect { filter: MultiSelectFilter },
    Boolean { filter: BoolFilter },
    DateRange { filter: DateFilter },
}

impl ColumnFilter {
    /// Parses a numeric filter field's raw text.
    pub fn numeric(text: &str) -> Self {
        ColumnFilter::Numeric {
            filter: NumericFilter::parse(text),
        }
    }

    pub fn matches(&self, cell: &Value) -> bool {
        match self {
            ColumnFilter::Text { term } => cell
                .to_display_string()
                .to_lowercase()
                .contains(&term.to_lowercase()),
            ColumnFilter::Numeric { filter } => filter.matches(cell),
            ColumnFilter::MultiSelect { filter } => filter.matches(cell),
            ColumnFilter::Boolean { filter } => filter.matches(cell),
            ColumnFilter::DateRange { filter } => filter.matches(cell),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_range_is_inclusive_of_both_day_bounds() {
        let f = DateFilter {
            start: Some(date(2024, 1, 10)),
            end: Some(date(2024, 1, 20)),
        };
        assert!(f.matches(&Value::text("2024-01-10")));
        assert!(f.matches(&Value::text("2024-01-20")));
        assert!(!f.matches(&Value::text("2024-01-09")));
        assert!(!f.matches(&Value::text("2024-01-21")));
        assert!(!f.matches(&Value::text("not a date")));
    }

    #[test]
    fn one_sided_date_bounds_work() {
        let from = DateFilter {
            start: Some(date(2024, 6, 1)),
            end: None,
        };
        assert!(from.matches(&Value::text("2025-01-01")));
        assert!(!from.matches(&Value::text("2024-05-31")));

        let until = DateFilter {
            start: None,
            end: Some(date(2024, 6, 1)),
        };
        assert!(until.matches(&Value::text("2024-06-01")));
        assert!(!until.matches(&Value::text("2024-06-02")));
    }

    #[test]
    fn bool_filter_is_tri_state() {
        let truthy = BoolFilter(Some(true));
        assert!(truthy.matches(&Value::Bool(true)));
        assert!(truthy.matches(&Value::number(1.0)));
        assert!(truthy.matches(&Value::text("1")));
        assert!(!truthy.matches(&Value::Bool(false)));
        assert!(!truthy.matches(&Value::text("yes")));

        let falsy = BoolFilter(Some(false));
        assert!(falsy.matches(&Value::number(0.0)));
        assert!(falsy.matches(&Value::text("0")));

        let any = BoolFilter(None);
        assert!(any.matches(&Value::text("whatever")));
        assert!(any.matches(&Value::Null));
    }

    #[test]
    fn multi_select_coerces_and_honors_null_sentinel() {
        let f = MultiSelectFilter::new(vec![Value::text("1"), Value::Null]);
        assert!(f.matches(&Value::number(1.0)));
        assert!(f.matches(&Value::Null));
        assert!(!f.matches(&Value::number(2.0)));

        let no_null = MultiSelectFilter::new(vec![Value::text("A")]);
        assert!(!no_null.matches(&Value::Null));
    }
}
