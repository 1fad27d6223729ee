//! FILENAME: transform-engine/src/config.rs
//! Transform configuration - an immutable snapshot of what the view wants.
//!
//! One `TransformConfig` describes every stage of a pipeline run. The
//! pipeline fingerprints each stage's slice of the config to decide what to
//! recompute.

use std::collections::HashMap;

use filter_grammar::ColumnFilter;
use serde::{Deserialize, Serialize};
use table_model::{ColumnType, Value};

use crate::derive::{DeriveScope, DerivedColumnSpec, RatioColumnSpec};
use crate::sort::SortSpec;

// ============================================================================
// STAGE CONFIGS
// ============================================================================

/// Stage 1: authorization filter over a designated "team" column, with a
/// dependent "sub-team" restriction when exactly one team is selected.
/// Enforcement only; the allow-lists are supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFilterConfig {
    /// Admin mode: the stage is skipped entirely.
    pub bypass: bool,
    /// Column holding the team value. Empty disables the stage.
    pub team_field: String,
    pub allowed_teams: Vec<String>,
    /// The team values currently selected in the view.
    pub selected_teams: Vec<String>,
    /// Dependent column, only consulted when exactly one team is selected.
    pub sub_team_field: String,
    pub allowed_sub_teams: Vec<String>,
}

/// Stage 2: a fixed field-path -> allowed-values rule. A row with a
/// null/missing field matches only if the set contains the Null sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreFilterRule {
    pub field_path: String,
    pub allowed: Vec<Value>,
}

/// Stage 3: free-text search across declared searchable field paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    pub enabled: bool,
    pub term: String,
    pub fields: Vec<String>,
}

/// Stage 6: ordered group-by fields, outermost first. Indefinite nesting.
pub type GroupConfig = Vec<String>;

/// Stage 7: the requested page slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub offset: usize,
    pub size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            offset: 0,
            size: 50,
        }
    }
}

// ============================================================================
// TRANSFORM CONFIG
// ============================================================================

/// Full configuration for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct TransformConfig {
    /// Which derivation scope this table is (main / report / nested field).
    pub scope: Option<DeriveScope>,
    pub derived: Vec<DerivedColumnSpec>,
    pub ratio: Vec<RatioColumnSpec>,
    /// Explicit per-column type overrides for inference.
    pub type_overrides: HashMap<String, ColumnType>,

    pub auth: AuthFilterConfig,
    pub pre_filters: Vec<PreFilterRule>,
    pub search: SearchConfig,

    /// Pre-group sort, applied only when its field is client-sortable.
    pub pre_sort: Option<SortSpec>,
    /// Fields the query declares client-side sort support for.
    pub client_sortable_fields: Vec<String>,

    /// Active per-column filters, combined with logical AND.
    pub filters: Vec<(String, ColumnFilter)>,

    pub group_by: GroupConfig,

    /// Interactive multi-column sort applied after grouping.
    pub final_sort: Vec<SortSpec>,
    pub page: PageRequest,
}

impl TransformConfig {
    pub fn scope(&self) -> DeriveScope {
        self.scope.clone().unwrap_or(DeriveScope::Main)
    }
}
