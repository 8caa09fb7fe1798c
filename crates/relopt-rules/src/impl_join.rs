//! # Join Implementation Rules
//!
//! Map a logical Join (or Correlate) to physical join operators. Every applicable rule
//! registers its alternative into the join's group and the cost model picks between
//! them, so the rules only decide what is *possible*, never what is cheap.
//!
//! ## Hash Join (`ImplHashJoinRule`)
//!
//! The workhorse join algorithm. Builds a hash table on the right input and probes it
//! with the left. Two distribution strategies are registered:
//!
//! - **Partitioned**: both inputs are hash-distributed on their join keys. Works for
//!   every join type.
//! - **Broadcast right**: the left input stays where it is and the right input is
//!   replicated to every unit. Only valid when unmatched right rows are never emitted
//!   (INNER, LEFT, SEMI, ANTI), since each replica would emit them again. The cost model
//!   rejects it once the right input exceeds `broadcast_threshold`.
//!
//! **Requires**: at least one equi-join key pair.
//!
//! ## Merge Join (`ImplMergeJoinRule`)
//!
//! Merges two inputs sorted on their keys. Lakehouse data is almost never stored sorted,
//! so the physical planner usually has to add Sort enforcers on both sides, which makes
//! merge join rarely win over hash join unless the inputs arrive sorted anyway.
//!
//! **Requires**: INNER or LEFT join with equi-join keys.
//!
//! ## Nested Loop Join (`ImplNestedLoopJoinRule`)
//!
//! The fallback for conditions without keys. With `nested_loop_scalar_only` set (the
//! default), the cost model only accepts it when the right input has at most one row,
//! so a cartesian product of two large inputs has no plan.
//!
//! ## Correlate (`ImplCorrelateRule`)
//!
//! Re-evaluates the right input for every left row.

use relopt_core::condition::JoinCondition;
use relopt_core::expr::{Expr, JoinType};
use relopt_core::operator::{JoinStrategy, LogicalOp, Operator, PhysicalOp};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleResult, RuleType};

/// Join payload of the matched expression and the key analysis of its condition.
fn join_parts<'a>(call: &RuleCall<'a>) -> Option<(JoinType, &'a Expr, JoinCondition)> {
    let Some(LogicalOp::Join {
        join_type,
        condition,
    }) = call.logical(0)
    else {
        return None;
    };
    let n_left = call.row_type(call.root().children[0]).len();
    Some((*join_type, condition, JoinCondition::analyze(condition, n_left)))
}

fn substitute(call: &mut RuleCall, op: PhysicalOp) {
    let children = call.root().children.clone();
    call.transform_to(RuleResult::Substitution(Operator::Physical(op), children));
}

/// Implement a logical join as a hash join.
pub struct ImplHashJoinRule;

impl Rule for ImplHashJoinRule {
    fn name(&self) -> &str {
        "ImplHashJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn matches(&self, call: &RuleCall) -> bool {
        call.ctx.config.enable_hash_join
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some((join_type, condition, analyzed)) = join_parts(call) else {
            return;
        };
        if !analyzed.has_keys() {
            return;
        }
        let mut strategies = vec![JoinStrategy::Partitioned];
        if matches!(join_type, JoinType::Inner | JoinType::Left | JoinType::Semi | JoinType::Anti) {
            strategies.push(JoinStrategy::BroadcastRight);
        }
        for strategy in strategies {
            substitute(
                call,
                PhysicalOp::HashJoin {
                    join_type,
                    condition: condition.clone(),
                    left_keys: analyzed.left_keys.clone(),
                    right_keys: analyzed.right_keys.clone(),
                    strategy,
                },
            );
        }
    }
}

/// Implement a logical join as a merge join over inputs sorted on the keys.
pub struct ImplMergeJoinRule;

impl Rule for ImplMergeJoinRule {
    fn name(&self) -> &str {
        "ImplMergeJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn matches(&self, call: &RuleCall) -> bool {
        call.ctx.config.enable_merge_join
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some((join_type, condition, analyzed)) = join_parts(call) else {
            return;
        };
        if !analyzed.has_keys() || !matches!(join_type, JoinType::Inner | JoinType::Left) {
            return;
        }
        substitute(
            call,
            PhysicalOp::MergeJoin {
                join_type,
                condition: condition.clone(),
                left_keys: analyzed.left_keys,
                right_keys: analyzed.right_keys,
            },
        );
    }
}

/// Implement a logical join as a nested-loop join.
pub struct ImplNestedLoopJoinRule;

impl Rule for ImplNestedLoopJoinRule {
    fn name(&self) -> &str {
        "ImplNestedLoopJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn matches(&self, call: &RuleCall) -> bool {
        call.ctx.config.enable_nested_loop_join
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Join {
            join_type,
            condition,
        }) = call.logical(0)
        else {
            return;
        };
        substitute(
            call,
            PhysicalOp::NestedLoopJoin {
                join_type: *join_type,
                condition: condition.clone(),
            },
        );
    }
}

pub struct ImplCorrelateRule;

impl Rule for ImplCorrelateRule {
    fn name(&self) -> &str {
        "ImplCorrelate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::correlate()
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Correlate {
            join_type,
            correlation_id,
            required_columns,
        }) = call.logical(0)
        else {
            return;
        };
        substitute(
            call,
            PhysicalOp::Correlate {
                join_type: *join_type,
                correlation_id: *correlation_id,
                required_columns: required_columns.clone(),
            },
        );
    }
}
