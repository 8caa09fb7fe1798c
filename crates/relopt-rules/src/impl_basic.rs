//! # Row Operator Implementation Rules
//!
//! One-to-one mappings from logical to physical operators that need no choice of
//! algorithm:
//!
//! - `Filter`, `Project` and `Window` keep their payloads.
//! - `Sort` becomes a physical `Sort`, or a `Limit` when it has no collation and only
//!   trims rows.
//! - `UNION ALL` becomes `UnionAll`. A distinct `UNION` has no physical form of its own;
//!   it is rewritten into an aggregate over `UNION ALL` during logical simplification.

use relopt_core::operator::{LogicalOp, LogicalOpKind, Operator, PhysicalOp};
use relopt_core::pattern::{OpMatcher, Pattern};
use relopt_core::rule::{Rule, RuleCall, RuleResult, RuleType};

/// Maps every logical operator of one kind to its physical counterpart.
pub struct ImplRowOperatorRule {
    kind: LogicalOpKind,
    name: String,
}

impl ImplRowOperatorRule {
    pub fn new(kind: LogicalOpKind) -> Self {
        Self {
            kind,
            name: format!("Impl{}", kind.name()),
        }
    }

    pub fn all() -> Vec<ImplRowOperatorRule> {
        [
            LogicalOpKind::Filter,
            LogicalOpKind::Project,
            LogicalOpKind::Sort,
            LogicalOpKind::Union,
            LogicalOpKind::Window,
        ]
        .into_iter()
        .map(ImplRowOperatorRule::new)
        .collect()
    }
}

/// Physical form of a row operator, if it has one.
fn physical_form(op: &LogicalOp) -> Option<PhysicalOp> {
    let physical = match op {
        LogicalOp::Filter { predicate } => PhysicalOp::Filter {
            predicate: predicate.clone(),
        },
        LogicalOp::Project { exprs, aliases } => PhysicalOp::Project {
            exprs: exprs.clone(),
            aliases: aliases.clone(),
        },
        LogicalOp::Sort {
            collation,
            offset,
            fetch,
        } if collation.is_empty() => PhysicalOp::Limit {
            offset: *offset,
            fetch: *fetch,
        },
        LogicalOp::Sort {
            collation,
            offset,
            fetch,
        } => PhysicalOp::Sort {
            collation: collation.clone(),
            offset: *offset,
            fetch: *fetch,
        },
        LogicalOp::Union { all: true } => PhysicalOp::UnionAll,
        LogicalOp::Window {
            partition_keys,
            order,
            calls,
        } => PhysicalOp::Window {
            partition_keys: partition_keys.clone(),
            order: order.clone(),
            calls: calls.clone(),
        },
        _ => return None,
    };
    Some(physical)
}

impl Rule for ImplRowOperatorRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        match self.kind {
            LogicalOpKind::Union => Pattern::union(),
            kind => Pattern::Operator(OpMatcher::LogicalOp(kind), vec![Pattern::Any]),
        }
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(physical) = call.logical(0).and_then(physical_form) else {
            return;
        };
        let children = call.root().children.clone();
        call.transform_to(RuleResult::Substitution(Operator::Physical(physical), children));
    }
}
