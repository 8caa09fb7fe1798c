//! # Merge Rules
//!
//! Two stacked operators of the same kind compose into one.
//!
//! ```text
//! Filter(p1, Filter(p2, X))          ->  Filter(p2 AND p1, X)
//! Project(e1, Project(e2, X))        ->  Project(e1[$i := e2[i]], X)
//! ```
//!
//! Project merging substitutes the lower expressions into the upper ones and strips
//! redundant cast chains from the result. It leaves an identity upper project alone;
//! `ProjectRemoveRule` removes those without building anything. A merge that would only
//! reorder the input fields is skipped as well, unless the two reorderings cancel out,
//! in which case the pair is equivalent to the input. A lower expression that is not
//! deterministic is never duplicated by the substitution.

use relopt_core::expr::Expr;
use relopt_core::operator::{LogicalOp, LogicalOpKind, Operator};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleResult, RuleType};
use relopt_core::types::RowType;

/// Combine two adjacent filters.
pub struct FilterMergeRule;

impl Rule for FilterMergeRule {
    fn name(&self) -> &str {
        "FilterMerge"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(LogicalOpKind::Filter, Pattern::filter())
    }

    fn on_match(&self, call: &mut RuleCall) {
        let (Some(LogicalOp::Filter { predicate: top }), Some(LogicalOp::Filter { predicate: bottom })) =
            (call.logical(0), call.logical(1))
        else {
            return;
        };
        let input = call.expr(1).children[0];
        let merged = Expr::and_all([bottom.clone(), top.clone()]).simplify();
        call.transform_to(RuleResult::Substitution(
            Operator::Logical(LogicalOp::Filter { predicate: merged }),
            vec![input],
        ));
    }
}

/// Compose two adjacent projections.
pub struct ProjectMergeRule;

impl Rule for ProjectMergeRule {
    fn name(&self) -> &str {
        "ProjectMerge"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(LogicalOpKind::Project, Pattern::project())
    }

    fn matches(&self, call: &RuleCall) -> bool {
        let Some(LogicalOp::Project { exprs, aliases }) = call.logical(0) else {
            return false;
        };
        !is_identity(exprs, aliases, call.row_type(call.root().children[0]))
    }

    fn on_match(&self, call: &mut RuleCall) {
        let (Some(LogicalOp::Project { exprs: top, aliases }), Some(LogicalOp::Project { exprs: bottom, .. })) =
            (call.logical(0), call.logical(1))
        else {
            return;
        };
        let input = call.expr(1).children[0];

        for (i, e) in bottom.iter().enumerate() {
            if e.is_deterministic() {
                continue;
            }
            let uses: usize = top
                .iter()
                .map(|t| t.columns().iter().filter(|c| c.index as usize == i).count())
                .sum();
            if uses > 1 {
                return;
            }
        }

        let input_type = call.row_type(input);
        let merged: Vec<Expr> = top
            .iter()
            .map(|e| {
                e.map_columns(|c| {
                    bottom
                        .get(c.index as usize)
                        .cloned()
                        .unwrap_or_else(|| Expr::Column(c.clone()))
                })
                .strip_redundant_casts(input_type)
            })
            .collect();

        if is_permutation(&merged, input_type) {
            if is_identity(&merged, aliases, input_type) && call.row_type(call.root().group) == input_type {
                call.transform_to(RuleResult::Equivalent(input));
            }
            return;
        }

        call.transform_to(RuleResult::Substitution(
            Operator::Logical(LogicalOp::Project {
                exprs: merged,
                aliases: aliases.clone(),
            }),
            vec![input],
        ));
    }
}

/// Bare columns that use every input field exactly once.
pub(crate) fn is_permutation(exprs: &[Expr], input: &RowType) -> bool {
    let mut seen = vec![false; input.len()];
    exprs.len() == input.len()
        && exprs.iter().all(|e| {
            e.as_column()
                .and_then(|c| seen.get_mut(c.index as usize))
                .is_some_and(|slot| !std::mem::replace(slot, true))
        })
}

/// A projection that returns its input unchanged, names included.
pub(crate) fn is_identity(exprs: &[Expr], aliases: &[String], input: &RowType) -> bool {
    exprs.len() == input.len()
        && exprs
            .iter()
            .enumerate()
            .all(|(i, e)| e.as_column().is_some_and(|c| c.index as usize == i))
        && aliases
            .iter()
            .zip(&input.fields)
            .all(|(alias, field)| *alias == field.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{apply_rule, emp, emp_scan, gt_lit, logical_ops};
    use relopt_core::node::RelNode;
    use relopt_core::types::DataType;

    #[test]
    fn test_filter_merge_conjoins_predicates() {
        let tree = RelNode::filter(
            RelNode::filter(emp_scan(), gt_lit(3, "sal", 1000)).unwrap(),
            gt_lit(0, "empno", 10),
        )
        .unwrap();
        let (memo, root) = apply_rule(&tree, FilterMergeRule);
        let merged = logical_ops(&memo, root)
            .into_iter()
            .filter_map(|op| match op {
                LogicalOp::Filter { predicate } => Some(predicate.conjuncts().len()),
                _ => None,
            })
            .max();
        assert_eq!(merged, Some(2));
    }

    #[test]
    fn test_project_merge_substitutes_lower_exprs() {
        let lower = RelNode::project(
            emp_scan(),
            vec![
                Expr::col(3, "sal"),
                Expr::cast(Expr::col(1, "deptno"), DataType::Int64),
            ],
            vec!["sal".into(), "d".into()],
        )
        .unwrap();
        let tree = RelNode::project(
            lower,
            vec![Expr::cast(Expr::col(1, "d"), DataType::Int64), Expr::col(0, "sal")],
            vec!["d".into(), "sal".into()],
        )
        .unwrap();
        let (memo, root) = apply_rule(&tree, ProjectMergeRule);
        let merged: Vec<&LogicalOp> = logical_ops(&memo, root)
            .into_iter()
            .filter(|op| matches!(op, LogicalOp::Project { exprs, .. } if exprs[1] == Expr::col(3, "sal")))
            .collect();
        assert_eq!(merged.len(), 1);
        let LogicalOp::Project { exprs, .. } = merged[0] else {
            unreachable!()
        };
        // CAST(CAST(deptno AS BIGINT) AS BIGINT) collapses to one cast.
        assert_eq!(exprs[0], Expr::cast(Expr::col(1, "deptno"), DataType::Int64));
    }

    #[test]
    fn test_identity_upper_project_is_left_alone() {
        let lower = RelNode::project_fields(emp_scan(), &[1, 3]).unwrap();
        let tree = RelNode::project_fields(lower, &[0, 1]).unwrap();
        let (memo, root) = apply_rule(&tree, ProjectMergeRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);
        assert!(is_identity(
            &[Expr::col(0, "empno")],
            &["empno".to_string()],
            &RowType::new(vec![emp().fields[0].clone()]),
        ));
    }

    #[test]
    fn test_stacked_reorderings_are_not_merged() {
        let lower = RelNode::project_fields(emp_scan(), &[3, 2, 1, 0]).unwrap();
        let tree = RelNode::project_fields(lower, &[1, 0, 3, 2]).unwrap();
        let (memo, root) = apply_rule(&tree, ProjectMergeRule);
        let ops = logical_ops(&memo, root);
        assert_eq!(ops.len(), 1, "{ops:?}");
        assert!(matches!(ops[0], LogicalOp::Project { exprs, .. } if exprs[0] == Expr::col(1, "ename")));
    }

    #[test]
    fn test_reorderings_that_cancel_out_collapse_to_the_input() {
        let lower = RelNode::project_fields(emp_scan(), &[3, 2, 1, 0]).unwrap();
        let tree = RelNode::project_fields(lower, &[3, 2, 1, 0]).unwrap();
        let (memo, root) = apply_rule(&tree, ProjectMergeRule);
        assert!(logical_ops(&memo, root)
            .iter()
            .any(|op| matches!(op, LogicalOp::Scan { .. })));
    }

    #[test]
    fn test_permutation_check() {
        let input = emp();
        let cols = |ordinals: &[u32]| -> Vec<Expr> { ordinals.iter().map(|&i| Expr::col(i, "c")).collect() };
        assert!(is_permutation(&cols(&[2, 0, 3, 1]), &input));
        assert!(!is_permutation(&cols(&[2, 0, 0, 1]), &input));
        assert!(!is_permutation(&cols(&[2, 0, 1]), &input));
        assert!(!is_permutation(&cols(&[2, 0, 1, 4]), &input));
        let mut with_cast = cols(&[2, 0, 3]);
        with_cast.push(Expr::cast(Expr::col(1, "c"), DataType::Int64));
        assert!(!is_permutation(&with_cast, &input));
    }
}
