//! # DISTINCT Rewrites
//!
//! ## `AggregateExpandDistinctAggregatesRule`
//!
//! Rewrites `DISTINCT` aggregate calls into two stacked aggregates. The lower aggregate
//! groups on the original keys plus the distinct arguments, which removes duplicates of
//! the arguments within every original group; the upper aggregate then applies the
//! distinct calls as ordinary calls.
//!
//! ```text
//! Aggregate(k; COUNT(DISTINCT x), SUM(y), X)
//!     ->  Aggregate(0; COUNT($1), SUM($2), Aggregate(k, x; SUM(y) AS $partial1, X))
//! ```
//!
//! When every call is distinct on the same arguments the lower aggregate has no calls at
//! all. Non-distinct calls are split into a partial call below and a rollup call above, so
//! the rewrite needs every non-distinct call to have a rollup (AVG does not). Calls with
//! different distinct argument lists would need one lower aggregate per list joined back
//! together; those aggregates, and aggregates with grouping sets or filtered calls, are
//! left as they are.
//!
//! ## `UnionToDistinctRule`
//!
//! `UNION` without `ALL` is an aggregate on every column over `UNION ALL`, which is the
//! only union the physical operators implement.

use itertools::Itertools;
use relopt_core::expr::AggCall;
use relopt_core::operator::{LogicalOp, Operator};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleChild, RuleResult, RuleType};

/// Distinct argument lists a single expansion handles.
const MAX_DISTINCT_ARG_LISTS: usize = 1;

/// Expand DISTINCT aggregate calls into two aggregation levels.
pub struct AggregateExpandDistinctAggregatesRule;

impl Rule for AggregateExpandDistinctAggregatesRule {
    fn name(&self) -> &str {
        "AggregateExpandDistinctAggregates"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate()
    }

    fn matches(&self, call: &RuleCall) -> bool {
        matches!(
            call.logical(0),
            Some(LogicalOp::Aggregate { grouping_sets, aggregates, .. })
                if grouping_sets.is_empty()
                    && aggregates.iter().any(|c| c.distinct)
                    && aggregates.iter().all(|c| c.filter.is_none())
        )
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Aggregate {
            group_keys,
            aggregates,
            ..
        }) = call.logical(0)
        else {
            return;
        };
        let distinct_lists: Vec<&Vec<u32>> = aggregates
            .iter()
            .filter(|c| c.distinct)
            .map(|c| &c.args)
            .unique()
            .collect();
        if distinct_lists.len() > MAX_DISTINCT_ARG_LISTS {
            return;
        }
        if aggregates.iter().any(|c| !c.distinct && c.func.rollup().is_none()) {
            return;
        }

        let inner_keys: Vec<u32> = group_keys
            .iter()
            .chain(distinct_lists.iter().flat_map(|args| args.iter()))
            .copied()
            .unique()
            .collect();
        let position = |arg: u32| inner_keys.iter().position(|&k| k == arg).map(|p| p as u32);

        let mut partials = Vec::new();
        let mut outer_calls = Vec::with_capacity(aggregates.len());
        for (i, c) in aggregates.iter().enumerate() {
            if c.distinct {
                let Some(args) = c.args.iter().map(|&a| position(a)).collect::<Option<Vec<_>>>() else {
                    return;
                };
                outer_calls.push(AggCall::new(c.func, args, c.name.clone()));
            } else {
                let Some(rollup) = c.func.rollup() else {
                    return;
                };
                let slot = (inner_keys.len() + partials.len()) as u32;
                partials.push(AggCall::new(c.func, c.args.clone(), format!("$partial{i}")));
                outer_calls.push(AggCall::new(rollup, vec![slot], c.name.clone()));
            }
        }

        let input = call.root().children[0];
        call.transform_to(RuleResult::NewChildren(
            Operator::Logical(LogicalOp::Aggregate {
                group_keys: (0..group_keys.len() as u32).collect(),
                grouping_sets: vec![],
                aggregates: outer_calls,
            }),
            vec![RuleChild::new_expr(
                LogicalOp::Aggregate {
                    group_keys: inner_keys,
                    grouping_sets: vec![],
                    aggregates: partials,
                },
                vec![RuleChild::Group(input)],
            )],
        ));
    }
}

/// Rewrite `UNION` as `Aggregate(all columns, UNION ALL)`.
pub struct UnionToDistinctRule;

impl Rule for UnionToDistinctRule {
    fn name(&self) -> &str {
        "UnionToDistinct"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::union()
    }

    fn matches(&self, call: &RuleCall) -> bool {
        matches!(call.logical(0), Some(LogicalOp::Union { all: false }))
    }

    fn on_match(&self, call: &mut RuleCall) {
        let root = call.root();
        let width = call.row_type(root.group).len() as u32;
        call.transform_to(RuleResult::NewChildren(
            Operator::Logical(LogicalOp::Aggregate {
                group_keys: (0..width).collect(),
                grouping_sets: vec![],
                aggregates: vec![],
            }),
            vec![RuleChild::new_expr(
                LogicalOp::Union { all: true },
                root.children.iter().map(|&g| RuleChild::Group(g)).collect(),
            )],
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{apply_rule, children_of, emp_scan, logical_ops};
    use relopt_core::expr::AggFunc;
    use relopt_core::memo::{GroupId, Memo};
    use relopt_core::node::RelNode;

    /// The expanded upper aggregate in `root` and the aggregate below it.
    fn outer_and_inner(memo: &Memo, root: GroupId) -> Option<(LogicalOp, LogicalOp)> {
        let is_expanded = |op: &LogicalOp| {
            matches!(op, LogicalOp::Aggregate { aggregates, .. } if aggregates.iter().all(|c| !c.distinct))
        };
        let outer = logical_ops(memo, root).into_iter().find(|op| is_expanded(op))?.clone();
        let below = children_of(memo, root, is_expanded)?;
        let inner = logical_ops(memo, below[0]).first().map(|op| (*op).clone())?;
        Some((outer, inner))
    }

    #[test]
    fn test_mixed_distinct_and_plain_calls() {
        let tree = RelNode::aggregate(
            emp_scan(),
            vec![1],
            vec![
                AggCall::new(AggFunc::Count, vec![0], "n_emp").distinct(),
                AggCall::new(AggFunc::Sum, vec![3], "total"),
                AggCall::new(AggFunc::Count, vec![], "c"),
            ],
        )
        .unwrap();
        let (memo, root) = apply_rule(&tree, AggregateExpandDistinctAggregatesRule);
        let (outer, inner) = outer_and_inner(&memo, root).expect("expanded aggregate");

        assert_eq!(
            inner,
            LogicalOp::Aggregate {
                group_keys: vec![1, 0],
                grouping_sets: vec![],
                aggregates: vec![
                    AggCall::new(AggFunc::Sum, vec![3], "$partial1"),
                    AggCall::new(AggFunc::Count, vec![], "$partial2"),
                ],
            }
        );
        assert_eq!(
            outer,
            LogicalOp::Aggregate {
                group_keys: vec![0],
                grouping_sets: vec![],
                aggregates: vec![
                    AggCall::new(AggFunc::Count, vec![1], "n_emp"),
                    AggCall::new(AggFunc::Sum, vec![2], "total"),
                    AggCall::new(AggFunc::Sum0, vec![3], "c"),
                ],
            }
        );
    }

    #[test]
    fn test_single_distinct_list_needs_no_partials() {
        let tree = RelNode::aggregate(
            emp_scan(),
            vec![],
            vec![
                AggCall::new(AggFunc::Count, vec![1], "depts").distinct(),
                AggCall::new(AggFunc::Max, vec![1], "max_dept").distinct(),
            ],
        )
        .unwrap();
        let (memo, root) = apply_rule(&tree, AggregateExpandDistinctAggregatesRule);
        let (_, inner) = outer_and_inner(&memo, root).expect("expanded aggregate");
        assert_eq!(
            inner,
            LogicalOp::Aggregate {
                group_keys: vec![1],
                grouping_sets: vec![],
                aggregates: vec![],
            }
        );
    }

    #[test]
    fn test_unsupported_shapes_are_left_alone() {
        let two_lists = RelNode::aggregate(
            emp_scan(),
            vec![],
            vec![
                AggCall::new(AggFunc::Count, vec![1], "a").distinct(),
                AggCall::new(AggFunc::Count, vec![3], "b").distinct(),
            ],
        )
        .unwrap();
        let with_avg = RelNode::aggregate(
            emp_scan(),
            vec![],
            vec![
                AggCall::new(AggFunc::Count, vec![1], "a").distinct(),
                AggCall::new(AggFunc::Avg, vec![3], "b"),
            ],
        )
        .unwrap();
        for tree in [two_lists, with_avg] {
            let (memo, root) = apply_rule(&tree, AggregateExpandDistinctAggregatesRule);
            assert_eq!(memo.group(root).logical_exprs.len(), 1);
        }
    }

    #[test]
    fn test_union_becomes_distinct_over_union_all() {
        let tree = RelNode::union(vec![emp_scan(), emp_scan()], false).unwrap();
        let (memo, root) = apply_rule(&tree, UnionToDistinctRule);
        let below = children_of(&memo, root, |op| matches!(op, LogicalOp::Aggregate { .. }))
            .expect("aggregate over union all");
        assert_eq!(logical_ops(&memo, below[0]), vec![&LogicalOp::Union { all: true }]);
    }
}
