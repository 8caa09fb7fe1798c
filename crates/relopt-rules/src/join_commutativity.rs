//! # Join Commutativity Rule
//!
//! Implements the identity `A JOIN B = B JOIN A` for INNER and CROSS joins, so the cost
//! model sees both orientations. The physical hash join always builds on its right
//! input, so commuting is how the smaller relation ends up on the build side.
//!
//! Swapping the inputs also swaps the halves of the output row. A projection on top of
//! the swapped join restores the original field order, which keeps the row type of the
//! group unchanged:
//!
//! ```text
//! Join(INNER, a.k = b.k, A, B)  ->  Project(a.*, b.*, Join(INNER, a.k = b.k, B, A))
//! ```
//!
//! LEFT, RIGHT, FULL, SEMI and ANTI joins have fixed sides and are never commuted.
//! Commuting the swapped join again yields the original join, which the memo already
//! holds, so the rule cannot loop.

use relopt_core::expr::{Expr, JoinType};
use relopt_core::operator::{LogicalOp, Operator};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleChild, RuleResult, RuleType};

/// Join commutativity: `A JOIN B -> B JOIN A` under a reordering projection.
pub struct JoinCommutativityRule;

impl Rule for JoinCommutativityRule {
    fn name(&self) -> &str {
        "JoinCommutativity"
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
                join_type: JoinType::Inner | JoinType::Cross,
                ..
            })
        )
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

        let swapped = swap_sides(condition, n_left, n_right);
        let output = call.row_type(call.root().group);
        let exprs = output
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| Expr::col(swapped_ordinal(i as u32, n_left, n_right), f.name.as_str()))
            .collect();
        call.transform_to(RuleResult::NewChildren(
            Operator::Logical(LogicalOp::Project {
                exprs,
                aliases: output.fields.iter().map(|f| f.name.clone()).collect(),
            }),
            vec![RuleChild::new_expr(
                LogicalOp::Join {
                    join_type: *join_type,
                    condition: swapped,
                },
                vec![RuleChild::Group(right), RuleChild::Group(left)],
            )],
        ));
    }
}

/// Where field `i` of `L JOIN R` sits in `R JOIN L`.
fn swapped_ordinal(i: u32, n_left: u32, n_right: u32) -> u32 {
    if i < n_left {
        i + n_right
    } else {
        i - n_left
    }
}

/// Renumber a condition over `L JOIN R` to read `R JOIN L`.
fn swap_sides(condition: &Expr, n_left: u32, n_right: u32) -> Expr {
    condition.map_columns(|c| Expr::Column(c.with_index(swapped_ordinal(c.index, n_left, n_right))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{apply_rule, children_of, dept_scan, emp_scan, logical_ops};
    use relopt_core::node::RelNode;

    #[test]
    fn test_swapped_ordinals() {
        // emp (4 fields) JOIN dept (3 fields)
        assert_eq!(swapped_ordinal(1, 4, 3), 4);
        assert_eq!(swapped_ordinal(4, 4, 3), 0);
        assert_eq!(
            swap_sides(&Expr::eq(Expr::col(1, "deptno"), Expr::col(4, "deptno")), 4, 3),
            Expr::eq(Expr::col(4, "deptno"), Expr::col(0, "deptno"))
        );
    }

    #[test]
    fn test_inner_join_is_commuted_under_a_projection() {
        let on = Expr::eq(Expr::col(1, "deptno"), Expr::col(4, "deptno"));
        let tree = RelNode::join(emp_scan(), dept_scan(), JoinType::Inner, on).unwrap();
        let (memo, root) = apply_rule(&tree, JoinCommutativityRule);

        let swapped = children_of(&memo, root, |op| matches!(op, LogicalOp::Project { .. }))
            .expect("projection over the swapped join");
        assert_eq!(
            logical_ops(&memo, swapped[0])
                .into_iter()
                .find(|op| matches!(op, LogicalOp::Join { .. })),
            Some(&LogicalOp::Join {
                join_type: JoinType::Inner,
                condition: Expr::eq(Expr::col(4, "deptno"), Expr::col(0, "deptno")),
            })
        );
        assert_eq!(memo.group(swapped[0]).row_type.names()[0], "deptno");
    }

    #[test]
    fn test_outer_join_keeps_its_sides() {
        let on = Expr::eq(Expr::col(1, "deptno"), Expr::col(4, "deptno"));
        let tree = RelNode::join(emp_scan(), dept_scan(), JoinType::Left, on).unwrap();
        let (memo, root) = apply_rule(&tree, JoinCommutativityRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);
    }
}
