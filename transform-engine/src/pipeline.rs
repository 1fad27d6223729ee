//! FILENAME: transform-engine/src/pipeline.rs
//! The staged transform calculator.
//!
//! Stages run in a fixed order, each a pure function of (rows, config):
//!
//! 1. derive + authorization filter
//! 2. pre-filter (field path -> allowed set)
//! 3. search
//! 4. pre-group sort (client-sortable fields only)
//! 5. column filter (grammar filters, logical AND)
//! 6. recursive group + aggregate
//! 7. final sort + paginate
//!
//! Stage outputs 1-6 are memoized keyed by a fingerprint of the data
//! generation and that stage's slice of the config, chained through the
//! upstream stage's fingerprint, so a filter change recomputes stages 5-7
//! but reuses 1-4. Stage 7 is recomputed every run.
//!
//! Stages never raise: malformed configuration degrades to passing rows
//! through unchanged.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};
use serde::Serialize;
use table_model::{ColumnMeta, ColumnMetaResolver, ColumnType, Row, Value};

use filter_grammar::ColumnFilter;

use crate::config::{AuthFilterConfig, PreFilterRule, SearchConfig, TransformConfig};
use crate::derive::{ordered_columns, DerivationEngine, RatioColumnSpec};
use crate::group::{group_rows, Grouping};
use crate::sort::{sort_by_keys, sort_rows, SortKeyCache};

/// Number of memoized stage slots (stages 1 through 6).
const STAGE_COUNT: usize = 6;

// ============================================================================
// TABLE VIEW
// ============================================================================

/// The paginated view model produced by a pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    /// The page slice, ratio columns materialized.
    pub rows: Vec<Row>,
    /// Row count before pagination (group rows count as one each).
    pub total_rows: usize,
    pub offset: usize,
    /// Display column order with derived/ratio columns spliced in.
    pub columns: Vec<String>,
    pub metas: Vec<ColumnMeta>,
}

// ============================================================================
// PIPELINE
// ============================================================================

struct StageSlot {
    hash: u64,
    rows: Vec<Row>,
}

/// Holds the dataset plus per-stage memoized outputs.
pub struct TransformPipeline {
    data: Vec<Row>,
    generation: u64,
    slots: Vec<Option<StageSlot>>,
    sort_cache: SortKeyCache,
    grouping: Option<Grouping>,
    recomputes: u64,
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipeline {
    pub fn new() -> Self {
        TransformPipeline {
            data: Vec::new(),
            generation: 0,
            slots: (0..STAGE_COUNT).map(|_| None).collect(),
            sort_cache: SortKeyCache::default(),
            grouping: None,
            recomputes: 0,
        }
    }

    /// Replaces the dataset and bumps the generation, invalidating every
    /// memoized stage.
    pub fn set_data(&mut self, rows: Vec<Row>) {
        self.data = rows;
        self.generation += 1;
    }

    /// The grouping produced by the most recent run, for drill-down.
    pub fn grouping(&self) -> Option<&Grouping> {
        self.grouping.as_ref()
    }

    /// How many stage computations have run in total (memoized reuses do
    /// not count).
    pub fn recompute_count(&self) -> u64 {
        self.recomputes
    }

    /// Executes the pipeline for `config` over the current dataset.
    pub fn run(&mut self, config: &TransformConfig) -> TableView {
        let metas = self.resolve_metas(config);
        let mut types: FxHashMap<String, ColumnType> = FxHashMap::default();
        for meta in &metas {
            types.insert(meta.name.clone(), meta.column_type);
        }
        let type_of = |field: &str| types.get(field).copied().unwrap_or(ColumnType::Text);

        let scope = config.scope();

        // Stage 1: derive + auth filter.
        let h1 = fingerprint(self.generation, &(&scope, &config.derived, &config.auth));
        if !self.slot_current(0, h1) {
            let derived = DerivationEngine::apply_derived(&self.data, &config.derived, &scope);
            let authed = apply_auth(&derived, &config.auth);
            self.store(0, h1, authed);
        }

        // Stage 2: pre-filter.
        let h2 = fingerprint(h1, &config.pre_filters);
        if !self.slot_current(1, h2) {
            let out = apply_pre_filters(self.rows(0), &config.pre_filters);
            self.store(1, h2, out);
        }

        // Stage 3: search.
        let h3 = fingerprint(h2, &config.search);
        if !self.slot_current(2, h3) {
            let out = apply_search(self.rows(1), &config.search);
            self.store(2, h3, out);
        }

        // Stage 4: pre-group sort. The sort-key cache is keyed by the
        // upstream fingerprint, so re-sorting the same rows on the same
        // field skips key extraction.
        let h4 = fingerprint(h3, &(&config.pre_sort, &config.client_sortable_fields));
        if !self.slot_current(3, h4) {
            let rows = self.rows(2).to_vec();
            let out = match &config.pre_sort {
                Some(spec) if config.client_sortable_fields.contains(&spec.field) => {
                    let column_type = type_of(&spec.field);
                    let keys = self
                        .sort_cache
                        .keys_for(&rows, &spec.field, column_type, h3)
                        .to_vec();
                    sort_by_keys(rows, &keys, spec.direction)
                }
                _ => rows,
            };
            self.store(3, h4, out);
        }

        // Stage 5: column filters (AND).
        let h5 = fingerprint(h4, &(&config.filters, &config.ratio));
        if !self.slot_current(4, h5) {
            let out = apply_column_filters(self.rows(3), &config.filters, &config.ratio);
            self.store(4, h5, out);
        }

        // Stage 6: recursive group + aggregate.
        let h6 = fingerprint(h5, &(&config.group_by, &config.ratio));
        if !self.slot_current(5, h6) {
            let grouping = group_rows(
                self.rows(4).to_vec(),
                &config.group_by,
                &config.ratio,
                &|column| {
                    types
                        .get(column)
                        .map(|t| *t == ColumnType::Number)
                        .unwrap_or(false)
                },
            );
            let rows = if grouping.is_grouped() {
                grouping.root_rows()
            } else {
                grouping.arena.clone()
            };
            self.grouping = Some(grouping);
            self.store(5, h6, rows);
        }

        // Stage 7: final sort + paginate, recomputed every run.
        let mut rows = self.rows(5).to_vec();
        let total_rows = rows.len();
        sort_rows(
            &mut rows,
            &config.final_sort,
            |row, field| resolve_cell(row, field, &config.ratio),
            type_of,
        );
        let offset = config.page.offset.min(rows.len());
        let end = offset.saturating_add(config.page.size).min(rows.len());
        let page: Vec<Row> = rows[offset..end].to_vec();
        let page = DerivationEngine::apply_ratio(&page, &config.ratio);

        let base: Vec<String> = metas
            .iter()
            .filter(|m| !m.is_derived && !m.is_ratio)
            .map(|m| m.name.clone())
            .collect();
        let columns = ordered_columns(&base, &config.derived, &config.ratio);

        TableView {
            rows: page,
            total_rows,
            offset,
            columns,
            metas,
        }
    }

    fn resolve_metas(&self, config: &TransformConfig) -> Vec<ColumnMeta> {
        let derived: Vec<(String, ColumnType)> = config
            .derived
            .iter()
            .map(|d| (d.name.clone(), d.column_type))
            .collect();
        let ratio: Vec<String> = config.ratio.iter().map(|r| r.name.clone()).collect();
        ColumnMetaResolver {
            type_overrides: &config.type_overrides,
            derived_columns: &derived,
            ratio_columns: &ratio,
        }
        .resolve(&self.data)
    }

    fn slot_current(&self, idx: usize, hash: u64) -> bool {
        matches!(&self.slots[idx], Some(slot) if slot.hash == hash)
    }

    fn store(&mut self, idx: usize, hash: u64, rows: Vec<Row>) {
        self.recomputes += 1;
        self.slots[idx] = Some(StageSlot { hash, rows });
    }

    fn rows(&self, idx: usize) -> &[Row] {
        self.slots[idx]
            .as_ref()
            .map(|slot| slot.rows.as_slice())
            .unwrap_or(&[])
    }
}

/// Fingerprints a stage's config slice chained through the upstream hash.
/// Uses the Debug rendering, which covers every config field including the
/// non-hashable float-bearing filter descriptors.
fn fingerprint(upstream: u64, part: &impl std::fmt::Debug) -> u64 {
    let mut hasher = FxHasher::default();
    upstream.hash(&mut hasher);
    format!("{:?}", part).hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// STAGES
// ============================================================================

/// Stage 1b: team allow-list, then the dependent sub-team allow-list when
/// exactly one team is selected. Bypass or a missing team field passes
/// everything through.
fn apply_auth(rows: &[Row], auth: &AuthFilterConfig) -> Vec<Row> {
    if auth.bypass || auth.team_field.is_empty() {
        return rows.to_vec();
    }
    let single_team = auth.selected_teams.len() == 1 && !auth.sub_team_field.is_empty();
    rows.iter()
        .filter(|row| {
            let team = row.get_path(&auth.team_field).to_display_string();
            if !auth.allowed_teams.iter().any(|t| t == &team) {
                return false;
            }
            if single_team {
                let sub = row.get_path(&auth.sub_team_field).to_display_string();
                if !auth.allowed_sub_teams.iter().any(|s| s == &sub) {
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect()
}

/// Stage 2: every rule must admit the row.
fn apply_pre_filters(rows: &[Row], rules: &[PreFilterRule]) -> Vec<Row> {
    if rules.is_empty() {
        return rows.to_vec();
    }
    rows.iter()
        .filter(|row| {
            rules.iter().all(|rule| {
                let cell = row.get_path(&rule.field_path);
                if cell.is_null() {
                    rule.allowed.iter().any(|v| v.is_null())
                } else {
                    rule.allowed.iter().any(|v| v.coerced_eq(&cell))
                }
            })
        })
        .cloned()
        .collect()
}

/// Stage 3: case-insensitive substring over the searchable field paths.
fn apply_search(rows: &[Row], search: &SearchConfig) -> Vec<Row> {
    if !search.enabled || search.term.trim().is_empty() || search.fields.is_empty() {
        return rows.to_vec();
    }
    let term = search.term.trim().to_lowercase();
    rows.iter()
        .filter(|row| {
            search.fields.iter().any(|field| {
                row.get_path(field)
                    .to_display_string()
                    .to_lowercase()
                    .contains(&term)
            })
        })
        .cloned()
        .collect()
}

/// Stage 5: a row passes only when all active filters pass.
fn apply_column_filters(
    rows: &[Row],
    filters: &[(String, ColumnFilter)],
    ratio_specs: &[RatioColumnSpec],
) -> Vec<Row> {
    if filters.is_empty() {
        return rows.to_vec();
    }
    rows.iter()
        .filter(|row| {
            filters.iter().all(|(column, filter)| {
                let cell = resolve_cell(row, column, ratio_specs);
                filter.matches(&cell)
            })
        })
        .cloned()
        .collect()
}

/// Resolves the cell a filter or sort sees: ratio columns resolve to their
/// computed ratio (already materialized on group rows), everything else to
/// the field-path value.
fn resolve_cell(row: &Row, field: &str, ratio_specs: &[RatioColumnSpec]) -> Value {
    if let Some(spec) = ratio_specs.iter().find(|r| r.name == field) {
        if let Some(existing) = row.get(field) {
            return existing.clone();
        }
        return spec.resolve(row);
    }
    row.get_path(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageRequest;
    use crate::sort::{SortDirection, SortSpec};
    use table_model::{GROUP_CHILD_COUNT_KEY, GROUP_KEY_KEY};

    fn dataset() -> Vec<Row> {
        vec![
            Row::from_pairs([("team", Value::text("A")), ("amt", Value::number(10.0))]),
            Row::from_pairs([("team", Value::text("A")), ("amt", Value::number(20.0))]),
            Row::from_pairs([("team", Value::text("B")), ("amt", Value::number(5.0))]),
        ]
    }

    fn pipeline_with(rows: Vec<Row>) -> TransformPipeline {
        let mut p = TransformPipeline::new();
        p.set_data(rows);
        p
    }

    #[test]
    fn grouping_produces_summed_group_rows() {
        let mut p = pipeline_with(dataset());
        let mut config = TransformConfig::default();
        config.group_by = vec!["team".to_string()];
        let view = p.run(&config);

        assert_eq!(view.total_rows, 2);
        let a = &view.rows[0];
        assert_eq!(a.get(GROUP_KEY_KEY), Some(&Value::text("A")));
        assert_eq!(a.get("amt"), Some(&Value::number(30.0)));
        assert_eq!(a.get(GROUP_CHILD_COUNT_KEY), Some(&Value::number(2.0)));
        let b = &view.rows[1];
        assert_eq!(b.get("amt"), Some(&Value::number(5.0)));
        assert_eq!(b.get(GROUP_CHILD_COUNT_KEY), Some(&Value::number(1.0)));
    }

    #[test]
    fn pre_group_filter_removes_groups_with_no_surviving_rows() {
        let mut p = pipeline_with(dataset());
        let mut config = TransformConfig::default();
        config.filters = vec![("amt".to_string(), ColumnFilter::numeric(">=10"))];
        config.group_by = vec!["team".to_string()];
        let view = p.run(&config);

        // The B row is excluded before grouping, so group B must not appear.
        assert_eq!(view.total_rows, 1);
        assert_eq!(view.rows[0].get("team"), Some(&Value::text("A")));
        assert_eq!(view.rows[0].get("amt"), Some(&Value::number(30.0)));
    }

    #[test]
    fn auth_filter_enforces_team_and_sub_team_allow_lists() {
        let rows = vec![
            Row::from_pairs([("team", Value::text("A")), ("squad", Value::text("a1"))]),
            Row::from_pairs([("team", Value::text("A")), ("squad", Value::text("a2"))]),
            Row::from_pairs([("team", Value::text("B")), ("squad", Value::text("b1"))]),
        ];
        let mut p = pipeline_with(rows);
        let mut config = TransformConfig::default();
        config.auth = AuthFilterConfig {
            bypass: false,
            team_field: "team".to_string(),
            allowed_teams: vec!["A".to_string()],
            selected_teams: vec!["A".to_string()],
            sub_team_field: "squad".to_string(),
            allowed_sub_teams: vec!["a1".to_string()],
        };
        let view = p.run(&config);
        assert_eq!(view.total_rows, 1);
        assert_eq!(view.rows[0].get("squad"), Some(&Value::text("a1")));

        // Bypass mode skips the stage entirely.
        config.auth.bypass = true;
        let view = p.run(&config);
        assert_eq!(view.total_rows, 3);
    }

    #[test]
    fn sub_team_restriction_requires_exactly_one_selected_team() {
        let rows = vec![
            Row::from_pairs([("team", Value::text("A")), ("squad", Value::text("a2"))]),
            Row::from_pairs([("team", Value::text("B")), ("squad", Value::text("b1"))]),
        ];
        let mut p = pipeline_with(rows);
        let mut config = TransformConfig::default();
        config.auth = AuthFilterConfig {
            bypass: false,
            team_field: "team".to_string(),
            allowed_teams: vec!["A".to_string(), "B".to_string()],
            selected_teams: vec!["A".to_string(), "B".to_string()],
            sub_team_field: "squad".to_string(),
            allowed_sub_teams: vec!["a1".to_string()],
        };
        // Two teams selected: the sub-team allow-list is not consulted.
        let view = p.run(&config);
        assert_eq!(view.total_rows, 2);
    }

    #[test]
    fn search_and_pre_filter_stages_narrow_rows() {
        let rows = vec![
            Row::from_pairs([("name", Value::text("Alpha build")), ("env", Value::text("prod"))]),
            Row::from_pairs([("name", Value::text("Beta build")), ("env", Value::text("dev"))]),
            Row::from_pairs([("name", Value::text("Alpha test")), ("env", Value::text("dev"))]),
        ];
        let mut p = pipeline_with(rows);
        let mut config = TransformConfig::default();
        config.pre_filters = vec![PreFilterRule {
            field_path: "env".to_string(),
            allowed: vec![Value::text("dev")],
        }];
        config.search = SearchConfig {
            enabled: true,
            term: "alpha".to_string(),
            fields: vec!["name".to_string()],
        };
        let view = p.run(&config);
        assert_eq!(view.total_rows, 1);
        assert_eq!(view.rows[0].get("name"), Some(&Value::text("Alpha test")));
    }

    #[test]
    fn final_sort_and_pagination_slice_the_view() {
        let rows: Vec<Row> = (0..10)
            .map(|i| Row::from_pairs([("n", Value::number(i as f64))]))
            .collect();
        let mut p = pipeline_with(rows);
        let mut config = TransformConfig::default();
        config.final_sort = vec![SortSpec {
            field: "n".to_string(),
            direction: SortDirection::Descending,
        }];
        config.page = PageRequest { offset: 2, size: 3 };
        let view = p.run(&config);
        assert_eq!(view.total_rows, 10);
        let ns: Vec<f64> = view
            .rows
            .iter()
            .map(|r| r.get("n").unwrap().as_number().unwrap())
            .collect();
        assert_eq!(ns, vec![7.0, 6.0, 5.0]);

        // Offset past the end yields an empty page, not an error.
        config.page = PageRequest { offset: 99, size: 3 };
        assert!(p.run(&config).rows.is_empty());
    }

    #[test]
    fn ratio_columns_filter_on_their_computed_value() {
        let rows = vec![
            Row::from_pairs([("done", Value::number(50.0)), ("goal", Value::number(100.0))]),
            Row::from_pairs([("done", Value::number(90.0)), ("goal", Value::number(100.0))]),
        ];
        let mut p = pipeline_with(rows);
        let mut config = TransformConfig::default();
        config.ratio = vec![RatioColumnSpec {
            name: "pct".to_string(),
            value_field: "done".to_string(),
            target_field: "goal".to_string(),
            before_column: None,
        }];
        config.filters = vec![("pct".to_string(), ColumnFilter::numeric(">=75"))];
        let view = p.run(&config);
        assert_eq!(view.total_rows, 1);
        assert_eq!(view.rows[0].get("pct"), Some(&Value::number(90.0)));
        assert!(view.columns.contains(&"pct".to_string()));
    }

    #[test]
    fn unchanged_config_reuses_memoized_stages() {
        let mut p = pipeline_with(dataset());
        let mut config = TransformConfig::default();
        config.group_by = vec!["team".to_string()];
        p.run(&config);
        let after_first = p.recompute_count();
        p.run(&config);
        assert_eq!(p.recompute_count(), after_first);

        // A filter change recomputes the filter stage and downstream, but
        // not the upstream stages.
        config.filters = vec![("amt".to_string(), ColumnFilter::numeric(">0"))];
        p.run(&config);
        assert_eq!(p.recompute_count(), after_first + 2);

        // New data invalidates everything.
        p.set_data(dataset());
        p.run(&config);
        assert_eq!(p.recompute_count(), after_first + 2 + 6);
    }

    #[test]
    fn derived_columns_flow_through_grouping() {
        use crate::derive::DerivedColumnSpec;
        use std::sync::Arc;

        let mut p = pipeline_with(dataset());
        let mut config = TransformConfig::default();
        config.derived = vec![DerivedColumnSpec::new(
            "double",
            Arc::new(|row: &Row, _ctx: &crate::derive::DeriveContext| {
                row.get("amt")
                    .and_then(|v| v.as_number())
                    .map(|n| Value::number(n * 2.0))
                    .ok_or_else(|| "no amt".to_string())
            }),
        )];
        config.group_by = vec!["team".to_string()];
        let view = p.run(&config);
        // Derived before grouping; numeric derived columns sum like any
        // other numeric column.
        assert_eq!(view.rows[0].get("double"), Some(&Value::number(60.0)));
    }
}
