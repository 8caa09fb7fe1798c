//! # Built-in Optimization Rules
//!
//! The default rule library for the relopt planner. Rules are registered per planning
//! phase; the phases run in order and each runs its rules to a fixed point.
//!
//! ## Logical Simplification (Logical -> Logical)
//!
//! - **`ReduceFilterRule`**, **`ProjectRemoveRule`**, **`SortRemoveRule`**,
//!   **`SortRemoveRedundantRule`**, **`AggregateRemoveRule`**: drop operators that do
//!   not change their input.
//! - **`FilterMergeRule`**, **`ProjectMergeRule`**: compose stacked filters and stacked
//!   projections.
//! - **`FilterProjectTransposeRule`**, **`FilterAggregateTransposeRule`**,
//!   **`FilterCorrelateRule`**, **`FilterJoinRule`**, **`JoinConditionPushRule`**: move
//!   predicates towards the scans wherever the operator in between allows it.
//! - **`CorrelateToJoinRule`**: decorrelates a correlate whose right input is a
//!   correlated filter.
//! - **`AggregateExpandDistinctAggregatesRule`**, **`UnionToDistinctRule`**: rewrite
//!   DISTINCT into plain aggregation.
//! - **`UnionPullUpConstantsRule`**: moves constant columns above a union.
//! - **`PruneEmpty*`**: propagate provably empty relations.
//!
//! ## Join Planning (Logical -> Logical)
//!
//! - **`JoinConditionSplitRule`**: lifts the non-equi part of an INNER join condition
//!   into a filter.
//! - **`SemiJoinRule`**: turns a join against a distinct relation into a semi-join.
//! - **`JoinToCorrelateRule`**: offers a correlate for joins without equi keys.
//! - **`JoinCommutativityRule`**: swaps the inputs of INNER and CROSS joins.
//!
//! ## Implementation Rules (Logical -> Physical)
//!
//! - **`ImplSeqScanRule`**, **`ImplValuesRule`**: leaf operators.
//! - **`ImplRowOperatorRule`**: Filter, Project, Sort/Limit, UNION ALL and Window.
//! - **`ImplHashJoinRule`**, **`ImplMergeJoinRule`**, **`ImplNestedLoopJoinRule`**,
//!   **`ImplCorrelateRule`**: join algorithms.
//! - **`ImplHashAggregateRule`**, **`ImplStreamAggregateRule`**: aggregation.
//!
//! ## Storage Rule Sets
//!
//! - **`hive`**: `ProjectIntoScanRule`, column pruning for columnar files. Selected by
//!   `PlannerConfig::source_type`.

pub mod decorrelate;
pub mod distinct_agg;
pub mod filter_join;
pub mod filter_pushdown;
pub mod impl_agg;
pub mod impl_basic;
pub mod impl_join;
pub mod impl_scan;
pub mod join_commutativity;
pub mod join_condition;
pub mod merge;
pub mod prune_empty;
pub mod scan_pushdown;
pub mod simplify;
pub mod union_constants;

#[cfg(test)]
mod test_util;

use relopt_core::rule::{PlannerPhase, Rule, RuleRegistry};

/// Create a rule registry with every built-in rule and the storage rule sets.
///
/// This is the standard configuration for the planner. Further storage-specific rules
/// can be added to the returned registry with `add_source_rule_set()`.
pub fn default_rule_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    let mut add = |phase: PlannerPhase, rule: Box<dyn Rule>| registry.add_rule(phase, rule);

    // Logical simplification.
    let simplification: Vec<Box<dyn Rule>> = vec![
        Box::new(simplify::ReduceFilterRule),
        Box::new(simplify::ProjectRemoveRule),
        Box::new(simplify::SortRemoveRule),
        Box::new(simplify::SortRemoveRedundantRule),
        Box::new(simplify::AggregateRemoveRule),
        Box::new(merge::FilterMergeRule),
        Box::new(merge::ProjectMergeRule),
        Box::new(filter_pushdown::FilterProjectTransposeRule),
        Box::new(filter_pushdown::FilterAggregateTransposeRule),
        Box::new(filter_pushdown::FilterCorrelateRule),
        Box::new(filter_join::FilterJoinRule),
        Box::new(filter_join::JoinConditionPushRule),
        Box::new(decorrelate::CorrelateToJoinRule),
        Box::new(distinct_agg::AggregateExpandDistinctAggregatesRule),
        Box::new(distinct_agg::UnionToDistinctRule),
        Box::new(union_constants::UnionPullUpConstantsRule),
        Box::new(prune_empty::PruneEmptyFetchZeroRule),
        Box::new(prune_empty::PruneEmptyUnionRule),
    ];
    for rule in simplification {
        add(PlannerPhase::LogicalSimplification, rule);
    }
    for rule in prune_empty::PruneEmptySingleRule::all() {
        add(PlannerPhase::LogicalSimplification, Box::new(rule));
    }
    for rule in prune_empty::PruneEmptyJoinRule::all() {
        add(PlannerPhase::LogicalSimplification, Box::new(rule));
    }

    // Join planning.
    add(PlannerPhase::JoinPlanning, Box::new(join_condition::JoinConditionSplitRule));
    add(PlannerPhase::JoinPlanning, Box::new(join_condition::SemiJoinRule));
    add(PlannerPhase::JoinPlanning, Box::new(decorrelate::JoinToCorrelateRule));
    add(PlannerPhase::JoinPlanning, Box::new(join_commutativity::JoinCommutativityRule));

    // Implementation rules: map logical operators to physical alternatives.
    add(PlannerPhase::Physical, Box::new(impl_scan::ImplSeqScanRule));
    add(PlannerPhase::Physical, Box::new(impl_scan::ImplValuesRule));
    for rule in impl_basic::ImplRowOperatorRule::all() {
        add(PlannerPhase::Physical, Box::new(rule));
    }
    add(PlannerPhase::Physical, Box::new(impl_join::ImplHashJoinRule));
    add(PlannerPhase::Physical, Box::new(impl_join::ImplMergeJoinRule));
    add(PlannerPhase::Physical, Box::new(impl_join::ImplNestedLoopJoinRule));
    add(PlannerPhase::Physical, Box::new(impl_join::ImplCorrelateRule));
    add(PlannerPhase::Physical, Box::new(impl_agg::ImplHashAggregateRule));
    add(PlannerPhase::Physical, Box::new(impl_agg::ImplStreamAggregateRule));

    registry.add_source_rule_set(scan_pushdown::hive_rule_set());
    registry
}
