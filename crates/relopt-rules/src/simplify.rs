//! # Simplification Rules
//!
//! Rules that make an operator disappear, or shrink its payload, without looking
//! through it.
//!
//! - **`ReduceFilterRule`**: constant-folds the predicate. `Filter(TRUE, X)` is `X`;
//!   a predicate that folds to FALSE or NULL keeps no rows and becomes empty `Values`.
//! - **`ProjectRemoveRule`**: a projection that returns its input field by field, with the
//!   same names, is its input.
//! - **`SortRemoveRule`**: a sort with no keys and no OFFSET/FETCH, or a sort over a
//!   relation with at most one row, is its input.
//! - **`SortRemoveRedundantRule`**: a sort over another sort without OFFSET/FETCH ignores
//!   the inner ordering.
//! - **`AggregateRemoveRule`**: an aggregate without calls over an input that is
//!   already unique on its group keys is a projection of those keys.
//!
//! Removal is expressed as `RuleResult::Equivalent`, which merges the two groups.

use crate::merge::is_identity;
use relopt_core::expr::Expr;
use relopt_core::operator::{LogicalOp, LogicalOpKind, Operator};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleResult, RuleType};

/// Fold a filter predicate to a constant where possible.
pub struct ReduceFilterRule;

impl Rule for ReduceFilterRule {
    fn name(&self) -> &str {
        "ReduceFilter"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter()
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Filter { predicate }) = call.logical(0) else {
            return;
        };
        let root = call.root();
        let input = root.children[0];
        let reduced = predicate.simplify();
        if reduced.is_always_true() {
            call.transform_to(RuleResult::Equivalent(input));
        } else if reduced.rejects_all() {
            let row_type = call.row_type(root.group).clone();
            call.transform_to(RuleResult::Substitution(
                Operator::Logical(LogicalOp::Values { row_type, rows: vec![] }),
                vec![],
            ));
        } else if reduced != *predicate {
            call.transform_to(RuleResult::Substitution(
                Operator::Logical(LogicalOp::Filter { predicate: reduced }),
                vec![input],
            ));
        }
    }
}

/// Remove identity projections.
pub struct ProjectRemoveRule;

impl Rule for ProjectRemoveRule {
    fn name(&self) -> &str {
        "ProjectRemove"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::project()
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Project { exprs, aliases }) = call.logical(0) else {
            return;
        };
        let input = call.root().children[0];
        let input_type = call.row_type(input);
        // Nullability must agree as well; the row type check is the final word.
        if is_identity(exprs, aliases, input_type) && call.row_type(call.root().group) == input_type {
            call.transform_to(RuleResult::Equivalent(input));
        }
    }
}

/// Remove sorts that cannot change anything.
pub struct SortRemoveRule;

impl Rule for SortRemoveRule {
    fn name(&self) -> &str {
        "SortRemove"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::sort()
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Sort {
            collation,
            offset,
            fetch,
        }) = call.logical(0)
        else {
            return;
        };
        if *offset > 0 {
            return;
        }
        let input = call.root().children[0];
        let no_op = fetch.is_none() && collation.is_empty();
        let single_row = fetch != &Some(0) && call.known_max_rows(input).is_some_and(|n| n <= 1.0);
        if no_op || single_row {
            call.transform_to(RuleResult::Equivalent(input));
        }
    }
}

/// Drop an inner sort whose order the outer sort replaces.
pub struct SortRemoveRedundantRule;

impl Rule for SortRemoveRedundantRule {
    fn name(&self) -> &str {
        "SortRemoveRedundant"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(LogicalOpKind::Sort, Pattern::sort())
    }

    fn on_match(&self, call: &mut RuleCall) {
        let (Some(outer @ LogicalOp::Sort { collation, .. }), Some(LogicalOp::Sort { offset, fetch, .. })) =
            (call.logical(0), call.logical(1))
        else {
            return;
        };
        // An outer sort without keys keeps the inner order; a limited inner sort picks rows.
        if collation.is_empty() || *offset > 0 || fetch.is_some() {
            return;
        }
        let input = call.expr(1).children[0];
        call.transform_to(RuleResult::Substitution(
            Operator::Logical(outer.clone()),
            vec![input],
        ));
    }
}

/// Replace a call-free aggregate over a relation already unique on its keys.
pub struct AggregateRemoveRule;

impl Rule for AggregateRemoveRule {
    fn name(&self) -> &str {
        "AggregateRemove"
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
            Some(LogicalOp::Aggregate { grouping_sets, aggregates, group_keys })
                if grouping_sets.is_empty() && aggregates.is_empty() && !group_keys.is_empty()
        )
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Aggregate { group_keys, .. }) = call.logical(0) else {
            return;
        };
        let input = call.root().children[0];
        if !is_unique_on(call, input, group_keys) {
            return;
        }
        let input_type = call.row_type(input);
        let aliases: Vec<String> = group_keys
            .iter()
            .filter_map(|&k| input_type.field(k as usize).map(|f| f.name.clone()))
            .collect();
        let exprs: Vec<Expr> = group_keys
            .iter()
            .zip(&aliases)
            .map(|(&k, name)| Expr::col(k, name.as_str()))
            .collect();
        if is_identity(&exprs, &aliases, input_type) {
            call.transform_to(RuleResult::Equivalent(input));
        } else {
            call.transform_to(RuleResult::Substitution(
                Operator::Logical(LogicalOp::Project { exprs, aliases }),
                vec![input],
            ));
        }
    }
}

/// The group holds at most one row, or an aggregate whose keys are all among `keys`.
fn is_unique_on(call: &RuleCall, group: relopt_core::memo::GroupId, keys: &[u32]) -> bool {
    if call.known_max_rows(group).is_some_and(|n| n <= 1.0) {
        return true;
    }
    call.logical_in(group).any(|(_, op)| match op {
        LogicalOp::Aggregate {
            group_keys,
            grouping_sets,
            ..
        } => grouping_sets.is_empty() && (0..group_keys.len() as u32).all(|k| keys.contains(&k)),
        _ => false,
    })
}
