//! FILENAME: transform-engine/src/lib.rs
//! In-memory transform pipeline for the interactive table.
//!
//! This crate turns a raw cached dataset into a paginated view model:
//! authorization filter -> pre-filter -> search -> sort -> column filter ->
//! recursive group/aggregate -> final sort -> paginate.
//!
//! Layers:
//! - `derive`: user-declared derived and ratio ("percentage") columns
//! - `group`: recursive group/aggregate over a flat row arena
//! - `sort`: type-aware comparators with cached key extraction
//! - `config`: serializable-ish stage configuration (what the view WANTS)
//! - `pipeline`: the staged calculator with per-stage memoization (HOW)

pub mod config;
pub mod derive;
pub mod group;
pub mod pipeline;
pub mod sort;

pub use config::{
    AuthFilterConfig, GroupConfig, PageRequest, PreFilterRule, SearchConfig, TransformConfig,
};
pub use derive::{
    ordered_columns, DeriveContext, DeriveScope, DerivedColumnSpec, DerivationEngine,
    NestedFields, RatioColumnSpec, ScopeSpec,
};
pub use group::{group_rows, GroupNode, Grouping};
pub use pipeline::{TableView, TransformPipeline};
pub use sort::{SortDirection, SortKey, SortSpec};
