//! FILENAME: filter-grammar/src/lib.rs
//! Filter grammar for the interactive table's per-column filter fields.
//!
//! Layers:
//! - `numeric`: the text-based numeric expression parser (`<n`, `>=n`,
//!   `lo<>hi`, ...) and its evaluation against cell values
//! - `matchers`: date-range, tri-state boolean, and multi-select matchers,
//!   plus the `ColumnFilter` descriptor the pipeline evaluates
//!
//! Parsing never fails: anything the grammar does not recognize degrades to
//! a case-insensitive substring match.

pub mod matchers;
pub mod numeric;

pub use matchers::{BoolFilter, ColumnFilter, DateFilter, MultiSelectFilter};
pub use numeric::NumericFilter;
