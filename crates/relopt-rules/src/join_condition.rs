//! # Join Condition Rules
//!
//! ## `JoinConditionSplitRule`
//!
//! Separates an INNER join condition into its equi-key pairs and a non-equi remainder and
//! lifts the remainder into a filter above the join:
//!
//! ```text
//! Join(INNER, a.k = b.k AND a.x > b.y, A, B)  ->  Filter(a.x > b.y, Join(INNER, a.k = b.k, A, B))
//! ```
//!
//! An INNER join only keeps matching rows, so filtering after the join yields the same
//! rows. An OUTER join keeps unmatched rows of its preserved side, which a filter above
//! would throw away, so outer conditions are never split. The join implementations
//! evaluate their remainder in place.
//!
//! ## `SemiJoinRule`
//!
//! An INNER join against a DISTINCT relation whose output only feeds left columns into a
//! projection is a semi-join, provided the join keys cover every distinct column (so each
//! left row matches at most one right row):
//!
//! ```text
//! Project(left cols, Join(INNER, a.k = $0, A, Aggregate(keys=[k'], calls=[], B)))
//!     ->  Project(left cols, Join(SEMI, a.k = b.k', A, B))
//! ```

use relopt_core::condition::JoinCondition;
use relopt_core::expr::{Expr, JoinType};
use relopt_core::operator::{LogicalOp, LogicalOpKind, Operator};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleChild, RuleResult, RuleType};
use relopt_core::types::RowType;

/// Lift the non-equi part of an INNER join condition into a filter.
pub struct JoinConditionSplitRule;

impl Rule for JoinConditionSplitRule {
    fn name(&self) -> &str {
        "JoinConditionSplit"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn matches(&self, call: &RuleCall) -> bool {
        matches!(
            call.logical(0),
            Some(LogicalOp::Join {
                join_type: JoinType::Inner,
                ..
            })
        )
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Join { condition, .. }) = call.logical(0) else {
            return;
        };
        let (left, right) = (call.root().children[0], call.root().children[1]);
        let left_type = call.row_type(left);
        let analyzed = JoinCondition::analyze(condition, left_type.len());
        if !analyzed.has_keys() || analyzed.is_equi() {
            return;
        }

        let combined = RowType::join(left_type, call.row_type(right), JoinType::Inner);
        let keys = Expr::and_all(analyzed.key_predicates(left_type.len(), &combined));
        call.transform_to(RuleResult::NewChildren(
            Operator::Logical(LogicalOp::Filter {
                predicate: analyzed.remainder_expr(),
            }),
            vec![RuleChild::new_expr(
                LogicalOp::Join {
                    join_type: JoinType::Inner,
                    condition: keys,
                },
                vec![RuleChild::Group(left), RuleChild::Group(right)],
            )],
        ));
    }
}

/// Turn a join against a distinct relation, projected to the left side, into a semi-join.
pub struct SemiJoinRule;

impl Rule for SemiJoinRule {
    fn name(&self) -> &str {
        "SemiJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(
            LogicalOpKind::Project,
            Pattern::logical(LogicalOpKind::Join, vec![Pattern::Any, Pattern::aggregate()]),
        )
    }

    fn matches(&self, call: &RuleCall) -> bool {
        matches!(
            call.logical(2),
            Some(LogicalOp::Aggregate { grouping_sets, aggregates, .. })
                if grouping_sets.is_empty() && aggregates.is_empty()
        ) && matches!(
            call.logical(1),
            Some(LogicalOp::Join {
                join_type: JoinType::Inner,
                ..
            })
        )
    }

    fn on_match(&self, call: &mut RuleCall) {
        let (
            Some(project @ LogicalOp::Project { exprs, .. }),
            Some(LogicalOp::Join { condition, .. }),
            Some(LogicalOp::Aggregate { group_keys, .. }),
        ) = (call.logical(0), call.logical(1), call.logical(2))
        else {
            return;
        };
        let left = call.expr(1).children[0];
        let n_left = call.row_type(left).len() as u32;
        if !exprs.iter().all(|e| e.references_only(0, n_left)) {
            return;
        }

        let analyzed = JoinCondition::analyze(condition, n_left as usize);
        let covers_all = (0..group_keys.len() as u32).all(|k| analyzed.right_keys.contains(&k));
        if !analyzed.is_equi() || !analyzed.has_keys() || !covers_all {
            return;
        }

        // Read the distinct keys straight from the aggregate's input.
        let distinct_input = call.expr(2).children[0];
        let input_type = call.row_type(distinct_input);
        let condition = condition.map_columns(|c| {
            if c.index < n_left {
                return Expr::Column(c.clone());
            }
            let key = group_keys[(c.index - n_left) as usize];
            let name = input_type
                .field(key as usize)
                .map_or_else(|| c.name.clone(), |f| f.name.clone());
            Expr::col(n_left + key, name)
        });
        call.transform_to(RuleResult::NewChildren(
            Operator::Logical(project.clone()),
            vec![RuleChild::new_expr(
                LogicalOp::Join {
                    join_type: JoinType::Semi,
                    condition,
                },
                vec![RuleChild::Group(left), RuleChild::Group(distinct_input)],
            )],
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{apply_rule, children_of, dept_scan, emp_scan, logical_ops};
    use relopt_core::node::RelNode;

    fn on_deptno() -> Expr {
        Expr::eq(Expr::col(1, "deptno"), Expr::col(4, "deptno"))
    }

    fn sal_over_budget() -> Expr {
        Expr::gt(Expr::col(3, "sal"), Expr::col(6, "budget"))
    }

    #[test]
    fn test_inner_remainder_becomes_filter() {
        let condition = Expr::and_all([on_deptno(), sal_over_budget()]);
        let tree = RelNode::join(emp_scan(), dept_scan(), JoinType::Inner, condition).unwrap();
        let (memo, root) = apply_rule(&tree, JoinConditionSplitRule);

        let join = children_of(&memo, root, |op| {
            matches!(op, LogicalOp::Filter { predicate } if *predicate == sal_over_budget())
        })
        .expect("remainder lifted into a filter");
        assert_eq!(
            logical_ops(&memo, join[0]),
            vec![&LogicalOp::Join {
                join_type: JoinType::Inner,
                condition: on_deptno()
            }]
        );
    }

    #[test]
    fn test_outer_condition_is_not_split() {
        let condition = Expr::and_all([on_deptno(), sal_over_budget()]);
        for join_type in [JoinType::Left, JoinType::Right, JoinType::Full] {
            let tree = RelNode::join(emp_scan(), dept_scan(), join_type, condition.clone()).unwrap();
            let (memo, root) = apply_rule(&tree, JoinConditionSplitRule);
            assert_eq!(memo.group(root).logical_exprs.len(), 1, "{join_type}");
        }
    }

    #[test]
    fn test_pure_equi_condition_is_left_alone() {
        let tree = RelNode::join(emp_scan(), dept_scan(), JoinType::Inner, on_deptno()).unwrap();
        let (memo, root) = apply_rule(&tree, JoinConditionSplitRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);
    }

    #[test]
    fn test_join_to_distinct_becomes_semi_join() {
        let distinct = RelNode::aggregate(dept_scan(), vec![0], vec![]).unwrap();
        let join = RelNode::join(
            emp_scan(),
            distinct,
            JoinType::Inner,
            Expr::eq(Expr::col(1, "deptno"), Expr::col(4, "deptno")),
        )
        .unwrap();
        let tree = RelNode::project_fields(join, &[0, 2]).unwrap();
        let (memo, root) = apply_rule(&tree, SemiJoinRule);

        let semi_below_project = memo
            .group(root)
            .logical_exprs
            .iter()
            .map(|&e| memo.expr(e))
            .filter(|e| matches!(e.op.as_logical(), Some(LogicalOp::Project { .. })))
            .any(|e| {
                logical_ops(&memo, memo.find(e.children[0])).into_iter().any(|op| {
                    matches!(op, LogicalOp::Join { join_type: JoinType::Semi, condition }
                        if *condition == Expr::eq(Expr::col(1, "deptno"), Expr::col(4, "deptno")))
                })
            });
        assert!(semi_below_project);
    }

    #[test]
    fn test_partial_key_coverage_is_not_a_semi_join() {
        // DISTINCT (deptno, dname) joined on deptno alone can match a left row twice.
        let distinct = RelNode::aggregate(dept_scan(), vec![0, 1], vec![]).unwrap();
        let join = RelNode::join(
            emp_scan(),
            distinct,
            JoinType::Inner,
            Expr::eq(Expr::col(1, "deptno"), Expr::col(4, "deptno")),
        )
        .unwrap();
        let tree = RelNode::project_fields(join, &[0]).unwrap();
        let (memo, root) = apply_rule(&tree, SemiJoinRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);
    }
}
