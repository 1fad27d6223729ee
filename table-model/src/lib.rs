//! FILENAME: table-model/src/lib.rs
//! Shared data model for the query result cache-and-transform engine.
//!
//! This crate provides the types every other layer speaks in:
//! - `value`: the scalar/array/nested-table cell value and its total ordering
//! - `row`: an insertion-ordered column -> value mapping with reserved
//!   metadata keys
//! - `column_meta`: per-column type inference and filter/aggregation metadata
//!
//! It deliberately knows nothing about caching, execution, or transforms.

pub mod column_meta;
pub mod row;
pub mod value;

pub use column_meta::{ColumnMeta, ColumnMetaResolver, ColumnType};
pub use row::{Row, GROUP_CHILD_COUNT_KEY, GROUP_FIELD_KEY, GROUP_KEY_KEY, GROUP_LEVEL_KEY, GROUP_PATH_KEY, RESERVED_PREFIX};
pub use value::{OrderedFloat, Value};
