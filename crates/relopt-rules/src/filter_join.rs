//! # Predicate Pushdown Around Joins
//!
//! Two rules move single-side conjuncts into the join inputs, reducing the rows that reach
//! the join as early as possible.
//!
//! ```text
//! Filter(l AND r AND l=r, Join(INNER, c, A, B))  ->  Join(INNER, c AND l=r, Filter(l, A), Filter(r, B))
//! Join(LEFT, c AND r, A, B)                      ->  Join(LEFT, c, A, Filter(r, B))
//! ```
//!
//! ## Outer Joins
//!
//! A filter *above* a join sees the NULL-extended rows the join produced, so a conjunct on
//! the null-generating side cannot move below it: rows that the filter rejects only after
//! NULL-extension would survive. A conjunct of the *ON clause* is the opposite: it decides
//! which rows match, and the preserved side keeps its rows whether they match or not. So
//! an ON-clause conjunct may only move into the null-generating side.
//!
//! | join  | filter above: left | filter above: right | ON clause: left | ON clause: right |
//! |-------|--------------------|---------------------|-----------------|------------------|
//! | INNER | yes                | yes                 | yes             | yes              |
//! | LEFT  | yes                | no                  | no              | yes              |
//! | RIGHT | no                 | yes                 | yes             | no               |
//! | FULL  | no                 | no                  | no              | no               |
//! | SEMI  | yes                | (no right fields)   | yes             | yes              |
//! | ANTI  | yes                | (no right fields)   | no              | yes              |
//!
//! Only equi-key conjuncts of a filter move into a join condition, and only into an INNER
//! or CROSS join; a CROSS join that gains a condition becomes INNER.

use crate::filter_pushdown::{filtered, with_residual};
use relopt_core::condition::JoinCondition;
use relopt_core::expr::{Expr, JoinType};
use relopt_core::operator::{LogicalOp, LogicalOpKind, Operator};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleChild, RuleResult, RuleType};

/// Push the conjuncts of a filter over a join into the join and its inputs.
pub struct FilterJoinRule;

impl Rule for FilterJoinRule {
    fn name(&self) -> &str {
        "FilterJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(LogicalOpKind::Filter, Pattern::join())
    }

    fn on_match(&self, call: &mut RuleCall) {
        let (
            Some(LogicalOp::Filter { predicate }),
            Some(LogicalOp::Join {
                join_type,
                condition,
            }),
        ) = (call.logical(0), call.logical(1))
        else {
            return;
        };
        let (left, right) = (call.expr(1).children[0], call.expr(1).children[1]);
        let n_left = call.row_type(left).len() as u32;
        let n_right = call.row_type(right).len() as u32;

        let mut to_left = Vec::new();
        let mut to_right = Vec::new();
        let mut to_condition = Vec::new();
        let mut kept = Vec::new();
        for c in predicate.conjuncts() {
            if !c.is_deterministic() || c.input_refs().is_empty() {
                kept.push(c);
            } else if c.references_only(0, n_left) {
                if join_type.generates_nulls_on_left() {
                    kept.push(c);
                } else {
                    to_left.push(c.clone());
                }
            } else if join_type.projects_right() && c.references_only(n_left, n_left + n_right) {
                match c.shift(-i64::from(n_left)) {
                    Some(shifted) if !join_type.generates_nulls_on_right() => to_right.push(shifted),
                    _ => kept.push(c),
                }
            } else if join_type.is_inner() && is_key_pair(c, n_left) {
                to_condition.push(c.clone());
            } else {
                kept.push(c);
            }
        }
        if to_left.is_empty() && to_right.is_empty() && to_condition.is_empty() {
            return;
        }

        let join_type = match join_type {
            JoinType::Cross if !to_condition.is_empty() => JoinType::Inner,
            other => *other,
        };
        let condition = Expr::and_all(std::iter::once(condition.clone()).chain(to_condition));
        let below = RuleChild::NewExpr(
            Operator::Logical(LogicalOp::Join {
                join_type,
                condition,
            }),
            vec![filtered(left, to_left), filtered(right, to_right)],
        );
        call.transform_to(with_residual(kept, below));
    }
}

/// Push single-side conjuncts of a join condition into the join inputs.
pub struct JoinConditionPushRule;

impl Rule for JoinConditionPushRule {
    fn name(&self) -> &str {
        "JoinConditionPush"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Join {
            join_type,
            condition,
        }) = call.logical(0)
        else {
            return;
        };
        let (left, right) = (call.root().children[0], call.root().children[1]);
        let n_left = call.row_type(left).len() as u32;
        let n_right = call.row_type(right).len() as u32;
        let into_left = matches!(
            join_type,
            JoinType::Inner | JoinType::Cross | JoinType::Right | JoinType::Semi
        );
        let into_right = matches!(
            join_type,
            JoinType::Inner | JoinType::Cross | JoinType::Left | JoinType::Semi | JoinType::Anti
        );

        let mut to_left = Vec::new();
        let mut to_right = Vec::new();
        let mut kept = Vec::new();
        for c in condition.conjuncts() {
            let pushable = c.is_deterministic() && !c.input_refs().is_empty();
            if pushable && into_left && c.references_only(0, n_left) {
                to_left.push(c.clone());
            } else if let Some(shifted) = (pushable && into_right && c.references_only(n_left, n_left + n_right))
                .then(|| c.shift(-i64::from(n_left)))
                .flatten()
            {
                to_right.push(shifted);
            } else {
                kept.push(c.clone());
            }
        }
        if to_left.is_empty() && to_right.is_empty() {
            return;
        }

        call.transform_to(RuleResult::NewChildren(
            Operator::Logical(LogicalOp::Join {
                join_type: *join_type,
                condition: Expr::and_all(kept),
            }),
            vec![filtered(left, to_left), filtered(right, to_right)],
        ));
    }
}

/// `c` is a single equi-key pair between the two join inputs.
fn is_key_pair(c: &Expr, n_left: u32) -> bool {
    let analyzed = JoinCondition::analyze(c, n_left as usize);
    analyzed.has_keys() && analyzed.is_equi()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{apply_rule, children_of, dept_scan, emp_scan, gt_lit, logical_ops};
    use relopt_core::memo::{GroupId, Memo};
    use relopt_core::node::RelNode;

    fn is_join(op: &LogicalOp) -> bool {
        matches!(op, LogicalOp::Join { .. })
    }

    fn has_filter(memo: &Memo, group: GroupId) -> bool {
        logical_ops(memo, group)
            .into_iter()
            .any(|op| matches!(op, LogicalOp::Filter { .. }))
    }

    fn emp_dept(join_type: JoinType, condition: Expr) -> RelNode {
        RelNode::join(emp_scan(), dept_scan(), join_type, condition).unwrap()
    }

    fn on_deptno() -> Expr {
        Expr::eq(Expr::col(1, "deptno"), Expr::col(4, "deptno"))
    }

    #[test]
    fn test_inner_join_filter_splits_three_ways() {
        let pred = Expr::and_all([gt_lit(3, "sal", 1000), gt_lit(6, "budget", 10), on_deptno()]);
        let tree = RelNode::filter(emp_dept(JoinType::Cross, Expr::true_lit()), pred).unwrap();
        let (memo, root) = apply_rule(&tree, FilterJoinRule);

        let rewritten = logical_ops(&memo, root)
            .into_iter()
            .find(|op| is_join(op))
            .expect("join replaces the filter");
        assert_eq!(
            rewritten,
            &LogicalOp::Join {
                join_type: JoinType::Inner,
                condition: on_deptno()
            }
        );
        let inputs = children_of(&memo, root, is_join).unwrap();
        assert!(has_filter(&memo, inputs[0]));
        assert!(has_filter(&memo, inputs[1]));
    }

    #[test]
    fn test_filter_on_null_generating_side_is_kept_above() {
        // Evaluated below the join, these conjuncts would no longer see the NULL-extended
        // rows and would let them through.
        let left_join = RelNode::filter(emp_dept(JoinType::Left, on_deptno()), gt_lit(6, "budget", 10)).unwrap();
        let (memo, root) = apply_rule(&left_join, FilterJoinRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);

        let right_join = RelNode::filter(emp_dept(JoinType::Right, on_deptno()), gt_lit(3, "sal", 1000)).unwrap();
        let (memo, root) = apply_rule(&right_join, FilterJoinRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);

        let full_join = RelNode::filter(
            emp_dept(JoinType::Full, on_deptno()),
            Expr::and_all([gt_lit(3, "sal", 1000), gt_lit(6, "budget", 10)]),
        )
        .unwrap();
        let (memo, root) = apply_rule(&full_join, FilterJoinRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);
    }

    #[test]
    fn test_filter_on_preserved_side_of_left_join_moves() {
        let tree = RelNode::filter(emp_dept(JoinType::Left, on_deptno()), gt_lit(3, "sal", 1000)).unwrap();
        let (memo, root) = apply_rule(&tree, FilterJoinRule);
        let inputs = children_of(&memo, root, is_join).expect("left join over filtered emp");
        assert!(has_filter(&memo, inputs[0]));
        assert!(!has_filter(&memo, inputs[1]));
    }

    #[test]
    fn test_non_key_two_sided_conjunct_stays_above() {
        let pred = Expr::gt(Expr::col(3, "sal"), Expr::col(6, "budget"));
        let tree = RelNode::filter(emp_dept(JoinType::Inner, on_deptno()), pred).unwrap();
        let (memo, root) = apply_rule(&tree, FilterJoinRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);
    }

    #[test]
    fn test_on_clause_pushes_into_null_generating_side_only() {
        let condition = Expr::and_all([on_deptno(), gt_lit(3, "sal", 1000), gt_lit(6, "budget", 10)]);
        let tree = emp_dept(JoinType::Left, condition);
        let (memo, root) = apply_rule(&tree, JoinConditionPushRule);

        let pushed = logical_ops(&memo, root)
            .into_iter()
            .find(|op| matches!(op, LogicalOp::Join { condition, .. } if condition.conjuncts().len() == 2))
            .expect("join without the budget conjunct");
        let LogicalOp::Join { condition, .. } = pushed else {
            unreachable!()
        };
        assert!(condition.conjuncts().contains(&&gt_lit(3, "sal", 1000)));

        let inputs = children_of(&memo, root, |op| {
            matches!(op, LogicalOp::Join { condition, .. } if condition.conjuncts().len() == 2)
        })
        .unwrap();
        assert!(!has_filter(&memo, inputs[0]));
        assert_eq!(
            logical_ops(&memo, inputs[1])
                .into_iter()
                .find(|op| matches!(op, LogicalOp::Filter { .. })),
            Some(&LogicalOp::Filter {
                predicate: gt_lit(2, "budget", 10)
            })
        );
    }

    #[test]
    fn test_anti_join_keeps_left_on_conjunct() {
        let condition = Expr::and_all([on_deptno(), gt_lit(3, "sal", 1000)]);
        let tree = emp_dept(JoinType::Anti, condition);
        let (memo, root) = apply_rule(&tree, JoinConditionPushRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);
    }
}
