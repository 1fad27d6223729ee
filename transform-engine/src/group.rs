//! FILENAME: transform-engine/src/group.rs
//! Recursive group/aggregate over a flat row arena.
//!
//! Rows live once in an arena; every GroupNode references its descendant
//! leaf rows by integer index (no embedded row trees, no deep copies), so
//! arbitrarily deep nesting stays flat in memory.
//!
//! Aggregation rules per column:
//! - the grouping field itself carries the group key
//! - fields of deeper, not-yet-expanded levels are Null
//! - ratio columns recompute from summed numerator/denominator
//! - numeric columns sum over the node's leaf rows
//! - everything else takes the first non-null child value

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use table_model::{
    Row, Value, GROUP_CHILD_COUNT_KEY, GROUP_FIELD_KEY, GROUP_KEY_KEY, GROUP_LEVEL_KEY,
    GROUP_PATH_KEY,
};

use crate::derive::RatioColumnSpec;

// ============================================================================
// GROUP NODE
// ============================================================================

/// A synthetic aggregated row for one value of a group-by field.
#[derive(Debug, Clone)]
pub struct GroupNode {
    /// The group-by value this node represents (Null groups null cells).
    pub key: Value,
    /// The field grouped on at this level.
    pub field: String,
    /// Zero-based nesting level.
    pub level: usize,
    /// Descendant leaf rows, as indices into `Grouping::arena`.
    pub child_rows: Vec<u32>,
    /// Direct subgroups, as indices into `Grouping::groups`.
    pub child_groups: Vec<u32>,
    /// Group-key path from the root down to (and including) this node.
    pub path: SmallVec<[Value; 4]>,
    /// The aggregate row rendered for this node (includes reserved keys).
    pub aggregate: Row,
}

/// The result of grouping: the row arena plus a flat node store.
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    pub arena: Vec<Row>,
    pub groups: Vec<GroupNode>,
    /// Top-level node indices, in first-seen partition order.
    pub roots: Vec<u32>,
}

impl Grouping {
    pub fn is_grouped(&self) -> bool {
        !self.groups.is_empty()
    }

    /// The aggregate rows of the top-level nodes, for display/pagination.
    pub fn root_rows(&self) -> Vec<Row> {
        self.roots
            .iter()
            .map(|&i| self.groups[i as usize].aggregate.clone())
            .collect()
    }
}

// ============================================================================
// GROUPING
// ============================================================================

/// Groups `rows` by `fields[0]`, recursing into each partition with the
/// remaining fields. `is_numeric` decides which columns sum.
pub fn group_rows(
    rows: Vec<Row>,
    fields: &[String],
    ratio_specs: &[RatioColumnSpec],
    is_numeric: &dyn Fn(&str) -> bool,
) -> Grouping {
    let mut grouping = Grouping {
        arena: rows,
        groups: Vec::new(),
        roots: Vec::new(),
    };
    if fields.is_empty() || grouping.arena.is_empty() {
        return grouping;
    }

    let all: Vec<u32> = (0..grouping.arena.len() as u32).collect();
    let roots = build_level(
        &mut grouping,
        all,
        fields,
        0,
        &SmallVec::new(),
        ratio_specs,
        is_numeric,
    );
    grouping.roots = roots;
    grouping
}

fn build_level(
    grouping: &mut Grouping,
    indices: Vec<u32>,
    fields: &[String],
    level: usize,
    path: &SmallVec<[Value; 4]>,
    ratio_specs: &[RatioColumnSpec],
    is_numeric: &dyn Fn(&str) -> bool,
) -> Vec<u32> {
    let field = &fields[level];

    // Partition null-safely, preserving first-seen order.
    let mut partitions: FxHashMap<Value, Vec<u32>> = FxHashMap::default();
    let mut order: Vec<Value> = Vec::new();
    for &i in &indices {
        let key = grouping.arena[i as usize]
            .get(field)
            .cloned()
            .unwrap_or(Value::Null);
        partitions
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(i);
    }

    let mut node_indices = Vec::with_capacity(order.len());
    for key in order {
        let members = partitions.remove(&key).unwrap_or_default();

        let mut node_path = path.clone();
        node_path.push(key.clone());

        let is_leaf = level + 1 >= fields.len();
        let child_groups = if is_leaf {
            Vec::new()
        } else {
            build_level(
                grouping,
                members.clone(),
                fields,
                level + 1,
                &node_path,
                ratio_specs,
                is_numeric,
            )
        };

        let direct_children = if is_leaf {
            members.len()
        } else {
            child_groups.len()
        };
        let aggregate = build_aggregate(
            &grouping.arena,
            &members,
            fields,
            level,
            &key,
            &node_path,
            direct_children,
            ratio_specs,
            is_numeric,
        );

        let node = GroupNode {
            key,
            field: field.clone(),
            level,
            child_rows: members,
            child_groups,
            path: node_path,
            aggregate,
        };
        let idx = grouping.groups.len() as u32;
        grouping.groups.push(node);
        node_indices.push(idx);
    }

    node_indices
}

#[allow(clippy::too_many_arguments)]
fn build_aggregate(
    arena: &[Row],
    members: &[u32],
    fields: &[String],
    level: usize,
    key: &Value,
    path: &SmallVec<[Value; 4]>,
    direct_children: usize,
    ratio_specs: &[RatioColumnSpec],
    is_numeric: &dyn Fn(&str) -> bool,
) -> Row {
    // Ordered union of data columns across the member rows.
    let mut columns: Vec<String> = Vec::new();
    for &i in members {
        for col in arena[i as usize].data_columns() {
            if !columns.iter().any(|c| c == col) {
                columns.push(col.to_string());
            }
        }
    }

    let deeper = &fields[level + 1..];
    let mut aggregate = Row::new();

    for column in &columns {
        if column == &fields[level] {
            aggregate.set(column.clone(), key.clone());
            continue;
        }
        if deeper.iter().any(|f| f == column) {
            aggregate.set(column.clone(), Value::Null);
            continue;
        }
        if let Some(spec) = ratio_specs.iter().find(|r| &r.name == column) {
            aggregate.set(column.clone(), ratio_from_sums(arena, members, spec));
            continue;
        }
        if is_numeric(column) {
            aggregate.set(column.clone(), sum_column(arena, members, column));
            continue;
        }
        let first_non_null = members
            .iter()
            .filter_map(|&i| arena[i as usize].get(column))
            .find(|v| !v.is_null())
            .cloned();
        let fallback = members
            .first()
            .and_then(|&i| arena[i as usize].get(column))
            .cloned()
            .unwrap_or(Value::Null);
        aggregate.set(column.clone(), first_non_null.unwrap_or(fallback));
    }

    // Ratio columns declared but not present on the member rows still get
    // their group-level value.
    for spec in ratio_specs {
        if !aggregate.contains(spec.name.as_str()) {
            aggregate.set(spec.name.clone(), ratio_from_sums(arena, members, spec));
        }
    }

    aggregate.set(GROUP_KEY_KEY, key.clone());
    aggregate.set(GROUP_FIELD_KEY, Value::text(fields[level].clone()));
    aggregate.set(GROUP_LEVEL_KEY, Value::number(level as f64));
    aggregate.set(GROUP_CHILD_COUNT_KEY, Value::number(direct_children as f64));
    aggregate.set(GROUP_PATH_KEY, Value::Array(path.to_vec()));

    aggregate
}

fn sum_column(arena: &[Row], members: &[u32], column: &str) -> Value {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &i in members {
        if let Some(n) = arena[i as usize].get(column).and_then(|v| v.as_number()) {
            sum += n;
            count += 1;
        }
    }
    if count == 0 {
        Value::Null
    } else {
        Value::number(sum)
    }
}

fn ratio_from_sums(arena: &[Row], members: &[u32], spec: &RatioColumnSpec) -> Value {
    let mut value_sum = 0.0;
    let mut target_sum = 0.0;
    for &i in members {
        let row = &arena[i as usize];
        if let Some(v) = row.get(spec.value_field.as_str()).and_then(|v| v.as_number()) {
            value_sum += v;
        }
        if let Some(t) = row.get(spec.target_field.as_str()).and_then(|v| v.as_number()) {
            target_sum += t;
        }
    }
    spec.resolve_from_sums(value_sum, target_sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_numeric_amt(col: &str) -> bool {
        col == "amt" || col == "done" || col == "goal"
    }

    fn sample() -> Vec<Row> {
        vec![
            Row::from_pairs([("team", "A"), ("region", "N")]).with_num("amt", 10.0),
            Row::from_pairs([("team", "A"), ("region", "S")]).with_num("amt", 20.0),
            Row::from_pairs([("team", "B"), ("region", "N")]).with_num("amt", 5.0),
        ]
    }

    trait WithNum {
        fn with_num(self, col: &str, n: f64) -> Row;
    }
    impl WithNum for Row {
        fn with_num(mut self, col: &str, n: f64) -> Row {
            self.set(col, Value::number(n));
            self
        }
    }

    #[test]
    fn single_level_grouping_sums_numeric_columns() {
        let g = group_rows(
            sample(),
            &["team".to_string()],
            &[],
            &is_numeric_amt,
        );
        assert_eq!(g.roots.len(), 2);
        let a = &g.groups[g.roots[0] as usize];
        assert_eq!(a.key, Value::text("A"));
        assert_eq!(a.child_rows.len(), 2);
        assert_eq!(a.aggregate.get("amt"), Some(&Value::number(30.0)));
        assert_eq!(a.aggregate.get("team"), Some(&Value::text("A")));
        let b = &g.groups[g.roots[1] as usize];
        assert_eq!(b.aggregate.get("amt"), Some(&Value::number(5.0)));
        assert_eq!(b.child_rows.len(), 1);
    }

    #[test]
    fn group_sums_equal_child_sums_at_every_level() {
        let g = group_rows(
            sample(),
            &["team".to_string(), "region".to_string()],
            &[],
            &is_numeric_amt,
        );
        for node in &g.groups {
            let expected: f64 = node
                .child_rows
                .iter()
                .filter_map(|&i| g.arena[i as usize].get("amt").and_then(|v| v.as_number()))
                .sum();
            assert_eq!(node.aggregate.get("amt"), Some(&Value::number(expected)));
        }
    }

    #[test]
    fn deeper_level_fields_are_nulled_on_parent_nodes() {
        let g = group_rows(
            sample(),
            &["team".to_string(), "region".to_string()],
            &[],
            &is_numeric_amt,
        );
        let a = &g.groups[g.roots[0] as usize];
        assert_eq!(a.aggregate.get("region"), Some(&Value::Null));
        assert_eq!(a.child_groups.len(), 2);
        let sub = &g.groups[a.child_groups[0] as usize];
        assert_eq!(sub.level, 1);
        assert_eq!(sub.aggregate.get("region"), Some(&Value::text("N")));
        assert_eq!(
            sub.aggregate.get(GROUP_PATH_KEY),
            Some(&Value::Array(vec![Value::text("A"), Value::text("N")]))
        );
    }

    #[test]
    fn null_group_keys_form_their_own_partition() {
        let mut rows = sample();
        rows.push(Row::new().with_num("amt", 1.0));
        let g = group_rows(rows, &["team".to_string()], &[], &is_numeric_amt);
        assert_eq!(g.roots.len(), 3);
        let null_group = &g.groups[g.roots[2] as usize];
        assert_eq!(null_group.key, Value::Null);
        assert_eq!(null_group.aggregate.get("amt"), Some(&Value::number(1.0)));
    }

    #[test]
    fn ratio_columns_recompute_from_sums_not_averages() {
        // Row ratios are 100% and 25%; averaging gives 62.5%, the correct
        // sum-ratio is (10+10)/(10+40) = 40%.
        let rows = vec![
            Row::from_pairs([("team", "A")])
                .with_num("done", 10.0)
                .with_num("goal", 10.0),
            Row::from_pairs([("team", "A")])
                .with_num("done", 10.0)
                .with_num("goal", 40.0),
        ];
        let spec = RatioColumnSpec {
            name: "pct".to_string(),
            value_field: "done".to_string(),
            target_field: "goal".to_string(),
            before_column: None,
        };
        let g = group_rows(rows, &["team".to_string()], &[spec], &is_numeric_amt);
        let node = &g.groups[g.roots[0] as usize];
        assert_eq!(node.aggregate.get("pct"), Some(&Value::number(40.0)));
    }

    #[test]
    fn non_numeric_columns_take_first_non_null_child() {
        let rows = vec![
            Row::from_pairs([("team", Value::text("A")), ("owner", Value::Null)])
                .with_num("amt", 1.0),
            Row::from_pairs([("team", Value::text("A")), ("owner", Value::text("kim"))])
                .with_num("amt", 2.0),
        ];
        let g = group_rows(rows, &["team".to_string()], &[], &is_numeric_amt);
        let node = &g.groups[g.roots[0] as usize];
        assert_eq!(node.aggregate.get("owner"), Some(&Value::text("kim")));
    }

    #[test]
    fn empty_fields_leave_rows_ungrouped() {
        let g = group_rows(sample(), &[], &[], &is_numeric_amt);
        assert!(!g.is_grouped());
        assert_eq!(g.arena.len(), 3);
    }
}
