//! # Project-into-Scan Pushdown
//!
//! Columnar lakehouse formats (ORC, Parquet) read every column separately, so a scan
//! that only needs some columns can skip the others entirely. When a `Project` reads a
//! strict subset of the columns produced by the `Scan` below it, this rule narrows the
//! scan to those columns and renumbers the projection over the narrower scan:
//!
//! ```text
//! Project($3, $0 + 1, Scan(emp))  ->  Project($1, $0 + 1, Scan(emp, projection=[0, 3]))
//! ```
//!
//! The rule ships in the `hive` rule set and only runs for sessions whose `source_type`
//! selects it.

use relopt_core::expr::Expr;
use relopt_core::operator::{LogicalOp, LogicalOpKind, Operator};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{PlannerPhase, Rule, RuleCall, RuleChild, RuleResult, RuleSet, RuleType};
use std::collections::BTreeSet;
use tracing::trace;

/// Name of the rule set carrying the rules in this module.
pub const HIVE_RULE_SET: &str = "hive";

/// The `hive` storage rule set.
pub fn hive_rule_set() -> RuleSet {
    RuleSet::new(HIVE_RULE_SET).with_rule(PlannerPhase::LogicalSimplification, Box::new(ProjectIntoScanRule))
}

/// Narrow a scan to the columns a projection above it reads.
pub struct ProjectIntoScanRule;

impl Rule for ProjectIntoScanRule {
    fn name(&self) -> &str {
        "ProjectIntoScan"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(LogicalOpKind::Project, Pattern::scan())
    }

    fn on_match(&self, call: &mut RuleCall) {
        let (
            Some(LogicalOp::Project { exprs, aliases }),
            Some(LogicalOp::Scan {
                table,
                row_type,
                projection,
            }),
        ) = (call.logical(0), call.logical(1))
        else {
            return;
        };
        let width = call.row_type(call.expr(1).group).len();
        let used: BTreeSet<u32> = exprs.iter().flat_map(Expr::input_refs).collect();
        let used: Vec<u32> = used.into_iter().collect();
        if used.len() >= width {
            return;
        }

        let table_ordinals: Vec<u32> = match projection {
            Some(p) => used.iter().map(|&u| p[u as usize]).collect(),
            None => used.clone(),
        };
        let exprs = exprs
            .iter()
            .map(|e| {
                e.map_columns(|c| {
                    let slot = used.binary_search(&c.index).unwrap_or_default();
                    Expr::Column(c.with_index(slot as u32))
                })
            })
            .collect();
        trace!(table = %table, columns = ?table_ordinals, "narrowing scan");
        call.transform_to(RuleResult::NewChildren(
            Operator::Logical(LogicalOp::Project {
                exprs,
                aliases: aliases.clone(),
            }),
            vec![RuleChild::new_expr(
                LogicalOp::Scan {
                    table: table.clone(),
                    row_type: row_type.clone(),
                    projection: Some(table_ordinals),
                },
                vec![],
            )],
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{apply_rule, children_of, emp_scan, logical_ops};
    use relopt_core::expr::{BinaryOp, ScalarValue};
    use relopt_core::node::RelNode;

    fn is_narrowed_project(op: &LogicalOp) -> bool {
        matches!(op, LogicalOp::Project { exprs, .. } if exprs.first() == Some(&Expr::col(1, "sal")))
    }

    #[test]
    fn test_scan_reads_only_projected_columns() {
        let plus_one = Expr::BinaryOp {
            op: BinaryOp::Add,
            left: Box::new(Expr::col(0, "empno")),
            right: Box::new(Expr::lit(ScalarValue::Int32(1))),
        };
        let tree = RelNode::project(
            emp_scan(),
            vec![Expr::col(3, "sal"), plus_one],
            vec!["sal".into(), "next".into()],
        )
        .unwrap();
        let (memo, root) = apply_rule(&tree, ProjectIntoScanRule);

        let scan = children_of(&memo, root, is_narrowed_project).expect("project over a narrowed scan");
        assert_eq!(memo.group(scan[0]).row_type.names(), vec!["empno", "sal"]);
        assert!(logical_ops(&memo, scan[0]).into_iter().any(|op| matches!(
            op,
            LogicalOp::Scan { projection: Some(p), .. } if *p == vec![0, 3]
        )));
    }

    #[test]
    fn test_projection_reading_every_column_is_left_alone() {
        let tree = RelNode::project_fields(emp_scan(), &[3, 2, 1, 0]).unwrap();
        let (memo, root) = apply_rule(&tree, ProjectIntoScanRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);
    }

    #[test]
    fn test_rule_set_is_named_for_its_source() {
        let set = hive_rule_set();
        assert_eq!(set.name, HIVE_RULE_SET);
    }
}
