//! # Aggregate Implementation Rules
//!
//! ## Hash Aggregate (`ImplHashAggregateRule`)
//!
//! Routes every input row to a hash bucket keyed by the group columns and updates the
//! bucket's accumulators. Works with any input order and handles grouping sets, at the
//! price of memory proportional to the number of groups.
//!
//! ## Stream Aggregate (`ImplStreamAggregateRule`)
//!
//! Processes input sorted on the group keys in one pass, emitting a group whenever the
//! keys change. Needs constant memory, but the physical planner has to deliver sorted
//! input, possibly through a Sort enforcer. A single pass cannot produce several
//! grouping sets, so aggregates with grouping sets are hash-only.

use relopt_core::operator::{LogicalOp, Operator, PhysicalOp};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleResult, RuleType};

pub struct ImplHashAggregateRule;

impl Rule for ImplHashAggregateRule {
    fn name(&self) -> &str {
        "ImplHashAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate()
    }

    fn matches(&self, call: &RuleCall) -> bool {
        call.ctx.config.enable_hash_agg
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Aggregate {
            group_keys,
            grouping_sets,
            aggregates,
        }) = call.logical(0)
        else {
            return;
        };
        let children = call.root().children.clone();
        call.transform_to(RuleResult::Substitution(
            Operator::Physical(PhysicalOp::HashAggregate {
                group_keys: group_keys.clone(),
                grouping_sets: grouping_sets.clone(),
                aggregates: aggregates.clone(),
            }),
            children,
        ));
    }
}

pub struct ImplStreamAggregateRule;

impl Rule for ImplStreamAggregateRule {
    fn name(&self) -> &str {
        "ImplStreamAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate()
    }

    fn matches(&self, call: &RuleCall) -> bool {
        call.ctx.config.enable_stream_agg
            && matches!(
                call.logical(0),
                Some(LogicalOp::Aggregate { grouping_sets, .. }) if grouping_sets.is_empty()
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
        let children = call.root().children.clone();
        call.transform_to(RuleResult::Substitution(
            Operator::Physical(PhysicalOp::StreamAggregate {
                group_keys: group_keys.clone(),
                aggregates: aggregates.clone(),
            }),
            children,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_scan::ImplSeqScanRule;
    use crate::test_util::{emp_scan, implement, op_names};
    use relopt_core::config::PlannerConfig;
    use relopt_core::expr::{AggCall, AggFunc};
    use relopt_core::node::RelNode;

    fn agg_rules() -> Vec<Box<dyn Rule>> {
        vec![
            Box::new(ImplSeqScanRule),
            Box::new(ImplHashAggregateRule),
            Box::new(ImplStreamAggregateRule),
        ]
    }

    fn sal_by_dept() -> RelNode {
        RelNode::aggregate(emp_scan(), vec![1], vec![AggCall::new(AggFunc::Sum, vec![3], "total")]).unwrap()
    }

    #[test]
    fn test_stream_aggregate_alone_sorts_its_input() {
        let config = PlannerConfig {
            enable_hash_agg: false,
            ..PlannerConfig::default()
        };
        let plan = implement(&sal_by_dept(), agg_rules(), config).unwrap();
        println!("{}", plan.explain());
        let names = op_names(&plan.root);
        let agg = names.iter().position(|n| n == "StreamAggregate").expect("stream aggregate");
        assert!(names[agg..].iter().any(|n| n == "Sort"));
    }

    #[test]
    fn test_grouping_sets_are_hash_aggregated() {
        let tree = RelNode::aggregate_grouping_sets(
            emp_scan(),
            vec![1, 2],
            vec![vec![1, 2], vec![1], vec![]],
            vec![AggCall::new(AggFunc::Count, vec![], "c")],
        )
        .unwrap();
        let plan = implement(&tree, agg_rules(), PlannerConfig::default()).unwrap();
        let names = op_names(&plan.root);
        assert!(names.contains(&"HashAggregate".to_string()));
        assert!(!names.contains(&"StreamAggregate".to_string()));
    }
}
