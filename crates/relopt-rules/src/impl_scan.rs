//! # Leaf Implementation Rules
//!
//! Map the two leaf operators to their physical forms.
//!
//! ## Sequential Scan (`ImplSeqScanRule`)
//!
//! A sequential scan reads every row of the table. Lakehouse tables (Parquet/ORC files)
//! have no B-tree or hash indexes, so this is the only scan the planner offers. Pruning
//! partitions, skipping row groups on footer statistics and applying delete files all
//! happen inside the connector and do not change the operator model. A column
//! projection that has been pushed into the logical scan is carried over unchanged.
//!
//! ## Literal Rows (`ImplValuesRule`)
//!
//! `Values` is executed as-is. An empty `Values` is how the planner represents a
//! relation that is known to produce nothing.

use relopt_core::operator::{LogicalOp, Operator, PhysicalOp};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleResult, RuleType};

/// Implement a logical scan as a sequential (full) table scan.
pub struct ImplSeqScanRule;

impl Rule for ImplSeqScanRule {
    fn name(&self) -> &str {
        "ImplSeqScan"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::scan()
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Scan {
            table,
            row_type,
            projection,
        }) = call.logical(0)
        else {
            return;
        };
        call.transform_to(RuleResult::Substitution(
            Operator::Physical(PhysicalOp::SeqScan {
                table: table.clone(),
                row_type: row_type.clone(),
                projection: projection.clone(),
            }),
            vec![],
        ));
    }
}

pub struct ImplValuesRule;

impl Rule for ImplValuesRule {
    fn name(&self) -> &str {
        "ImplValues"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::values()
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(LogicalOp::Values { row_type, rows }) = call.logical(0) else {
            return;
        };
        call.transform_to(RuleResult::Substitution(
            Operator::Physical(PhysicalOp::Values {
                row_type: row_type.clone(),
                rows: rows.clone(),
            }),
            vec![],
        ));
    }
}
