//! # Filter Pushdown Past Single-Input Operators
//!
//! A filter's top-level conjuncts are examined one by one. Every conjunct that may legally
//! move is rewritten in terms of the operator's input and pushed below it; the rest stay
//! in a filter above.
//!
//! ```text
//! Filter(p AND q, Project(e, X))     ->  Filter(q, Project(e, Filter(p[e], X)))
//! Filter(p AND q, Aggregate(k, X))   ->  Filter(q, Aggregate(k, Filter(p[k], X)))
//! Filter(p AND q, Correlate(L, R))   ->  Filter(q, Correlate(Filter(p, L), R))
//! ```
//!
//! ## Conditions
//!
//! - **Project**: the conjunct must be deterministic, and every projection expression it
//!   reads must be deterministic and free of row-multiplying functions such as FLATTEN.
//!   Substituting such an expression would evaluate it per input row instead of per
//!   output row.
//! - **Aggregate**: the conjunct may only read group keys, and each of those keys must be
//!   present in every grouping set. A key rolled up by some grouping set is NULL in that
//!   set's rows, so a filter on it cannot be evaluated before aggregation.
//! - **Correlate**: left-only conjuncts always move into the left input. Right-only
//!   conjuncts move into the right input for INNER correlates only.
//!
//! A conjunct without column references, or one that is not deterministic, never moves.

use relopt_core::expr::{Expr, JoinType};
use relopt_core::memo::GroupId;
use relopt_core::operator::{effective_grouping_sets, LogicalOp, LogicalOpKind, Operator};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleChild, RuleResult, RuleType};

/// Push conjuncts of a filter below a projection.
pub struct FilterProjectTransposeRule;

impl Rule for FilterProjectTransposeRule {
    fn name(&self) -> &str {
        "FilterProjectTranspose"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(LogicalOpKind::Filter, Pattern::project())
    }

    fn on_match(&self, call: &mut RuleCall) {
        let (Some(LogicalOp::Filter { predicate }), Some(project @ LogicalOp::Project { exprs, .. })) =
            (call.logical(0), call.logical(1))
        else {
            return;
        };
        let input = call.expr(1).children[0];
        let input_type = call.row_type(input);

        let movable = |c: &Expr| {
            let refs = c.input_refs();
            c.is_deterministic()
                && !refs.is_empty()
                && refs.iter().all(|&i| {
                    exprs
                        .get(i as usize)
                        .is_some_and(|e| e.is_deterministic() && !e.contains_banned_function())
                })
        };
        let (pushed, kept): (Vec<&Expr>, Vec<&Expr>) = predicate.conjuncts().into_iter().partition(|c| movable(c));
        if pushed.is_empty() {
            return;
        }

        let pushed = Expr::and_all(pushed.into_iter().map(|c| {
            c.map_columns(|col| {
                exprs
                    .get(col.index as usize)
                    .cloned()
                    .unwrap_or_else(|| Expr::Column(col.clone()))
            })
            .strip_redundant_casts(input_type)
        }));
        let below = RuleChild::new_expr(
            project.clone(),
            vec![RuleChild::new_expr(
                LogicalOp::Filter { predicate: pushed },
                vec![RuleChild::Group(input)],
            )],
        );
        call.transform_to(with_residual(kept, below));
    }
}

/// Push conjuncts over group keys below an aggregate.
pub struct FilterAggregateTransposeRule;

impl Rule for FilterAggregateTransposeRule {
    fn name(&self) -> &str {
        "FilterAggregateTranspose"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(LogicalOpKind::Filter, Pattern::aggregate())
    }

    fn on_match(&self, call: &mut RuleCall) {
        let (
            Some(LogicalOp::Filter { predicate }),
            Some(
                aggregate @ LogicalOp::Aggregate {
                    group_keys,
                    grouping_sets,
                    ..
                },
            ),
        ) = (call.logical(0), call.logical(1))
        else {
            return;
        };
        let input = call.expr(1).children[0];
        let input_type = call.row_type(input);
        let sets = effective_grouping_sets(group_keys, grouping_sets);

        let movable = |c: &Expr| {
            let refs = c.input_refs();
            c.is_deterministic()
                && !refs.is_empty()
                && refs.iter().all(|&i| {
                    group_keys
                        .get(i as usize)
                        .is_some_and(|k| sets.iter().all(|s| s.contains(k)))
                })
        };
        let (pushed, kept): (Vec<&Expr>, Vec<&Expr>) = predicate.conjuncts().into_iter().partition(|c| movable(c));
        if pushed.is_empty() {
            return;
        }

        let pushed = Expr::and_all(pushed.into_iter().map(|c| {
            c.map_columns(|col| {
                let key = group_keys[col.index as usize];
                let name = input_type
                    .field(key as usize)
                    .map_or_else(|| col.name.clone(), |f| f.name.clone());
                Expr::col(key, name)
            })
        }));
        let below = RuleChild::new_expr(
            aggregate.clone(),
            vec![RuleChild::new_expr(
                LogicalOp::Filter { predicate: pushed },
                vec![RuleChild::Group(input)],
            )],
        );
        call.transform_to(with_residual(kept, below));
    }
}

/// Push single-side conjuncts of a filter into the inputs of a correlate.
pub struct FilterCorrelateRule;

impl Rule for FilterCorrelateRule {
    fn name(&self) -> &str {
        "FilterCorrelate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(LogicalOpKind::Filter, Pattern::correlate())
    }

    fn on_match(&self, call: &mut RuleCall) {
        let (Some(LogicalOp::Filter { predicate }), Some(correlate @ LogicalOp::Correlate { join_type, .. })) =
            (call.logical(0), call.logical(1))
        else {
            return;
        };
        let (left, right) = (call.expr(1).children[0], call.expr(1).children[1]);
        let n_left = call.row_type(left).len() as u32;
        let n_right = call.row_type(right).len() as u32;

        let mut to_left = Vec::new();
        let mut to_right = Vec::new();
        let mut kept = Vec::new();
        for c in predicate.conjuncts() {
            let pushable = c.is_deterministic() && !c.input_refs().is_empty();
            if pushable && c.references_only(0, n_left) {
                to_left.push(c.clone());
            } else if let Some(shifted) = (pushable
                && *join_type == JoinType::Inner
                && c.references_only(n_left, n_left + n_right))
            .then(|| c.shift(-i64::from(n_left)))
            .flatten()
            {
                to_right.push(shifted);
            } else {
                kept.push(c);
            }
        }
        if to_left.is_empty() && to_right.is_empty() {
            return;
        }

        let below = RuleChild::NewExpr(
            Operator::Logical(correlate.clone()),
            vec![filtered(left, to_left), filtered(right, to_right)],
        );
        call.transform_to(with_residual(kept, below));
    }
}

/// `group`, or a new filter over it when there is something to filter on.
pub(crate) fn filtered(group: GroupId, conjuncts: Vec<Expr>) -> RuleChild {
    if conjuncts.is_empty() {
        RuleChild::Group(group)
    } else {
        RuleChild::new_expr(
            LogicalOp::Filter {
                predicate: Expr::and_all(conjuncts),
            },
            vec![RuleChild::Group(group)],
        )
    }
}

/// The rewritten subtree, under a filter of the conjuncts that stayed put.
pub(crate) fn with_residual(kept: Vec<&Expr>, below: RuleChild) -> RuleResult {
    match below {
        RuleChild::NewExpr(op, children) if kept.is_empty() => RuleResult::NewChildren(op, children),
        below => RuleResult::NewChildren(
            Operator::Logical(LogicalOp::Filter {
                predicate: Expr::and_all(kept.into_iter().cloned()),
            }),
            vec![below],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{apply_rule, children_of, dept_scan, emp_scan, gt_lit, logical_ops};
    use relopt_core::expr::{AggCall, AggFunc, ColumnRef, ScalarValue};
    use relopt_core::node::RelNode;
    use relopt_core::types::DataType;

    fn is_filter(op: &LogicalOp) -> bool {
        matches!(op, LogicalOp::Filter { .. })
    }

    /// The residual filter left above a rewrite, as opposed to the original filter.
    fn is_residual(op: &LogicalOp) -> bool {
        matches!(op, LogicalOp::Filter { predicate } if predicate.conjuncts().len() == 1)
    }

    #[test]
    fn test_filter_moves_below_project() {
        let project = RelNode::project_fields(emp_scan(), &[1, 3]).unwrap();
        let tree = RelNode::filter(project, gt_lit(1, "sal", 1000)).unwrap();
        let (memo, root) = apply_rule(&tree, FilterProjectTransposeRule);

        let below = children_of(&memo, root, |op| matches!(op, LogicalOp::Project { .. }))
            .expect("project over filter");
        assert_eq!(
            logical_ops(&memo, below[0]),
            vec![&LogicalOp::Filter {
                predicate: gt_lit(3, "sal", 1000)
            }]
        );
    }

    #[test]
    fn test_flatten_projection_blocks_pushdown() {
        let project = RelNode::project(
            emp_scan(),
            vec![
                Expr::function("FLATTEN", vec![Expr::col(2, "ename")], DataType::Utf8),
                Expr::col(3, "sal"),
            ],
            vec!["item".into(), "sal".into()],
        )
        .unwrap();
        let pred = Expr::and_all([
            Expr::eq(Expr::col(0, "item"), Expr::lit(ScalarValue::Utf8("x".into()))),
            gt_lit(1, "sal", 1000),
        ]);
        let tree = RelNode::filter(project, pred).unwrap();
        let (memo, root) = apply_rule(&tree, FilterProjectTransposeRule);

        // Only the conjunct on `sal` moves; the one on the flattened column stays above.
        let residual = children_of(&memo, root, is_residual).expect("residual filter");
        let below = children_of(&memo, residual[0], |op| matches!(op, LogicalOp::Project { .. }))
            .expect("project");
        assert!(logical_ops(&memo, below[0]).into_iter().any(is_filter));
    }

    #[test]
    fn test_filter_on_group_key_moves_below_aggregate() {
        let agg = RelNode::aggregate(
            emp_scan(),
            vec![1],
            vec![AggCall::new(AggFunc::Sum, vec![3], "total")],
        )
        .unwrap();
        let pred = Expr::and_all([gt_lit(0, "deptno", 10), gt_lit(1, "total", 5000)]);
        let tree = RelNode::filter(agg, pred).unwrap();
        let (memo, root) = apply_rule(&tree, FilterAggregateTransposeRule);

        let residual = children_of(&memo, root, is_residual).expect("residual filter");
        let below = children_of(&memo, residual[0], |op| matches!(op, LogicalOp::Aggregate { .. }))
            .expect("aggregate over pushed filter");
        assert_eq!(
            logical_ops(&memo, below[0]),
            vec![&LogicalOp::Filter {
                predicate: gt_lit(1, "deptno", 10)
            }]
        );
    }

    #[test]
    fn test_rolled_up_key_stays_above_aggregate() {
        let agg = RelNode::aggregate_grouping_sets(
            emp_scan(),
            vec![1, 2],
            vec![vec![1, 2], vec![1]],
            vec![AggCall::new(AggFunc::Count, vec![], "c")],
        )
        .unwrap();
        let tree = RelNode::filter(agg, Expr::is_null(Expr::col(1, "ename"))).unwrap();
        let (memo, root) = apply_rule(&tree, FilterAggregateTransposeRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);
    }

    #[test]
    fn test_right_conjunct_stays_above_left_correlate() {
        let right = RelNode::filter(
            dept_scan(),
            Expr::eq(
                Expr::col(0, "deptno"),
                Expr::CorrelatedField {
                    correlation_id: 7,
                    field: ColumnRef::new(1, "deptno"),
                    data_type: DataType::Int32,
                    nullable: true,
                },
            ),
        )
        .unwrap();
        let correlate = RelNode::correlate(emp_scan(), right, JoinType::Left, 7, vec![1]).unwrap();
        let pred = Expr::and_all([gt_lit(3, "sal", 100), gt_lit(6, "budget", 100)]);
        let tree = RelNode::filter(correlate, pred).unwrap();
        let (memo, root) = apply_rule(&tree, FilterCorrelateRule);

        let residual = children_of(&memo, root, is_residual).expect("residual filter");
        let inputs = children_of(&memo, residual[0], |op| matches!(op, LogicalOp::Correlate { .. }))
            .expect("correlate");
        assert!(logical_ops(&memo, inputs[0]).into_iter().any(is_filter));
        // The right input is untouched: still the single correlated filter.
        assert_eq!(logical_ops(&memo, inputs[1]).len(), 1);
    }
}
