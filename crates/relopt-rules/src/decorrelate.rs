//! # Join / Correlate Conversion
//!
//! A correlate evaluates its right input once per left row, with the left row bound to
//! the correlation variable `$cor<id>`. When the only use of that variable is a filter
//! directly on top of an otherwise uncorrelated right input, the correlate is a plain join
//! on the filter predicate:
//!
//! ```text
//! Correlate(t, $cor7, L, Filter(p($cor7.a, $b), R))  ->  Join(t, p($a, $(nL + b)), L, R)
//! ```
//!
//! The reverse rewrite, `JoinToCorrelateRule`, turns a join that has a condition but no
//! equi keys into a correlate over a filtered right input. Such a join can otherwise only
//! run as a nested-loop join; as a correlate the right input is re-evaluated per left row
//! with the predicate applied in place. It runs in the join-planning phase, after
//! decorrelation has finished, so the two rules never undo each other.
//!
//! Only INNER, LEFT, SEMI and ANTI joins have a correlate form.

use relopt_core::condition::JoinCondition;
use relopt_core::expr::{ColumnRef, Expr, JoinType};
use relopt_core::memo::{GroupId, Memo};
use relopt_core::operator::{LogicalOp, LogicalOpKind, Operator};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleChild, RuleResult, RuleType};
use relopt_core::types::DataType;
use std::collections::HashSet;

/// Correlation ids minted by `JoinToCorrelateRule` start here, above any id a front end
/// assigns.
const GENERATED_CORRELATION_BASE: u32 = 1 << 16;

/// Replace a correlate whose right side is a correlated filter by a join.
pub struct CorrelateToJoinRule;

impl Rule for CorrelateToJoinRule {
    fn name(&self) -> &str {
        "CorrelateToJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical(LogicalOpKind::Correlate, vec![Pattern::Any, Pattern::filter()])
    }

    fn on_match(&self, call: &mut RuleCall) {
        let (
            Some(LogicalOp::Correlate {
                join_type,
                correlation_id,
                ..
            }),
            Some(LogicalOp::Filter { predicate }),
        ) = (call.logical(0), call.logical(1))
        else {
            return;
        };
        let left = call.root().children[0];
        let input = call.expr(1).children[0];
        if uses_correlation(call.memo, input, *correlation_id, &mut HashSet::new()) {
            return;
        }

        let n_left = call.row_type(left).len() as i64;
        // Inner columns move past the left input; correlated fields become left columns.
        let Some(shifted) = predicate.shift(n_left) else {
            return;
        };
        let condition = shifted.rewrite(&|e: &Expr| match e {
            Expr::CorrelatedField {
                correlation_id: id,
                field,
                ..
            } if id == correlation_id => Some(Expr::Column(field.clone())),
            _ => None,
        });
        call.transform_to(RuleResult::Substitution(
            Operator::Logical(LogicalOp::Join {
                join_type: *join_type,
                condition,
            }),
            vec![left, input],
        ));
    }
}

/// Whether any expression reachable from `group` reads `$cor<id>`.
fn uses_correlation(memo: &Memo, group: GroupId, id: u32, seen: &mut HashSet<GroupId>) -> bool {
    let group = memo.find(group);
    if !seen.insert(group) {
        return false;
    }
    let exprs: Vec<_> = memo
        .group(group)
        .logical_exprs
        .iter()
        .map(|&e| memo.expr(e))
        .filter(|e| !e.redundant)
        .collect();
    exprs.iter().any(|e| {
        let payload = match e.op.as_logical() {
            Some(LogicalOp::Filter { predicate }) => predicate.correlation_ids().contains(&id),
            Some(LogicalOp::Join { condition, .. }) => condition.correlation_ids().contains(&id),
            Some(LogicalOp::Project { exprs, .. }) => exprs.iter().any(|x| x.correlation_ids().contains(&id)),
            _ => false,
        };
        payload || e.children.iter().any(|&c| uses_correlation(memo, c, id, seen))
    })
}

/// Rewrite a join without equi keys as a correlate.
pub struct JoinToCorrelateRule;

impl Rule for JoinToCorrelateRule {
    fn name(&self) -> &str {
        "JoinToCorrelate"
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
            Some(LogicalOp::Join { join_type, condition })
                if matches!(join_type, JoinType::Inner | JoinType::Left | JoinType::Semi | JoinType::Anti)
                    && !condition.is_always_true()
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
        let left_type = call.row_type(left);
        let n_left = left_type.len() as u32;
        if JoinCondition::analyze(condition, n_left as usize).has_keys() {
            return;
        }
        let required: Vec<u32> = condition.input_refs().into_iter().filter(|&i| i < n_left).collect();
        if required.is_empty() {
            return;
        }

        let correlation_id = GENERATED_CORRELATION_BASE + call.root().id;
        let predicate = condition.map_columns(|c| {
            if c.index >= n_left {
                return Expr::Column(c.with_index(c.index - n_left));
            }
            let (data_type, nullable) = left_type
                .field(c.index as usize)
                .map(|f| (f.data_type.clone(), f.nullable))
                .unwrap_or((DataType::Null, true));
            Expr::CorrelatedField {
                correlation_id,
                field: ColumnRef::new(c.index, c.name.clone()),
                data_type,
                nullable,
            }
        });
        call.transform_to(RuleResult::NewChildren(
            Operator::Logical(LogicalOp::Correlate {
                join_type: *join_type,
                correlation_id,
                required_columns: required,
            }),
            vec![
                RuleChild::Group(left),
                RuleChild::new_expr(LogicalOp::Filter { predicate }, vec![RuleChild::Group(right)]),
            ],
        ));
    }
}
