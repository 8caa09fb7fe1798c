//! # Rule System
//!
//! This module defines the rule trait, the rule call handed to a firing rule, and the
//! phased rule registry that drives the optimizer.
//!
//! ## Rule Types
//!
//! - **Transformation rules** (`RuleType::Transformation`): rewrite a logical operator
//!   into an equivalent logical operator. For example predicate pushdown (Filter over Join
//!   becomes Join over Filters) or project merging.
//!
//! - **Implementation rules** (`RuleType::Implementation`): map a logical operator to one
//!   or more physical operators. For example a logical Join may become a HashJoin, a
//!   MergeJoin or a NestedLoopJoin. They fire lazily, when the physical planner first
//!   needs a group.
//!
//! ## Firing a Rule
//!
//! The firing engine binds the rule's `Pattern` against the memo and builds one
//! `RuleCall` per binding. The rule's `matches` guard may still reject the call after
//! looking at payloads. `on_match` inspects the bound expressions and proposes results
//! through `transform_to`. A rule that cannot legally apply simply proposes nothing.
//!
//! Every result must produce exactly the row type of the matched root (names, types and
//! nullability). The memo rejects anything else with `InvalidRuleResult`.
//!
//! ## Rule Deduplication
//!
//! Each rule has a `rule_hash()` fingerprint. The memo records which (rule, binding)
//! pairs already fired, together with the size of each child group of the binding root.
//! A rule never fires twice on the same match, unless one of those child groups has since
//! gained expressions through a merge or a new alternative.
//!
//! ## Phases and Plugins
//!
//! Rules are registered per `PlannerPhase`. Storage plugins contribute named `RuleSet`s
//! that are only active when the planner configuration selects that plugin as the
//! `source_type`.

use crate::catalog::Catalog;
use crate::config::PlannerConfig;
use crate::memo::{ExprId, Group, GroupId, Memo, MemoExpr};
use crate::operator::{LogicalOp, Operator};
use crate::pattern::Pattern;
use crate::stats::Statistics;
use crate::types::RowType;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Classification of optimization rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    /// Logical → Logical rewrite.
    Transformation,
    /// Logical → Physical implementation.
    Implementation,
}

/// Planning phases, run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlannerPhase {
    LogicalSimplification,
    JoinPlanning,
    Physical,
}

impl PlannerPhase {
    pub const LOGICAL: [PlannerPhase; 2] = [
        PlannerPhase::LogicalSimplification,
        PlannerPhase::JoinPlanning,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PlannerPhase::LogicalSimplification => "logical_simplification",
            PlannerPhase::JoinPlanning => "join_planning",
            PlannerPhase::Physical => "physical",
        }
    }
}

/// Read-only session state passed to rules.
pub struct OptContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub config: &'a PlannerConfig,
}

/// A child reference in a rule result: either an existing group or a new sub-expression.
///
/// This is how a rule builds new intermediate groups. Pushing a filter below a project
/// turns `Filter(Project(X))` into `Project(Filter(X))`, which needs a *new group* for
/// `Filter(X)`. The rule returns `RuleChild::NewExpr(Filter, [Group(X)])` and the memo
/// creates (or finds) the group when the result is registered.
#[derive(Debug, Clone)]
pub enum RuleChild {
    /// Reference to an existing group in the memo.
    Group(GroupId),
    /// A new sub-expression that the memo places in a new or digest-equal group.
    NewExpr(Operator, Vec<RuleChild>),
}

impl RuleChild {
    pub fn new_expr(op: LogicalOp, children: Vec<RuleChild>) -> Self {
        RuleChild::NewExpr(Operator::Logical(op), children)
    }
}

/// Result of applying a rule to an expression.
#[derive(Debug, Clone)]
pub enum RuleResult {
    /// A new expression in the matched group, over existing child groups.
    Substitution(Operator, Vec<GroupId>),
    /// A new expression whose children may be new sub-expressions. The memo materializes
    /// them bottom-up.
    NewChildren(Operator, Vec<RuleChild>),
    /// The matched root is equivalent to an existing group (e.g. an identity projection
    /// is equivalent to its input). The two groups are merged.
    Equivalent(GroupId),
}

/// One match instance of a rule.
pub struct RuleCall<'a> {
    pub memo: &'a Memo,
    pub ctx: &'a OptContext<'a>,
    /// Bound expressions in pattern pre-order. `bindings[0]` is the matched root.
    pub bindings: Vec<ExprId>,
    results: Vec<RuleResult>,
}

impl<'a> RuleCall<'a> {
    pub fn new(memo: &'a Memo, ctx: &'a OptContext<'a>, bindings: Vec<ExprId>) -> Self {
        Self {
            memo,
            ctx,
            bindings,
            results: Vec::new(),
        }
    }

    /// The `i`-th bound expression.
    pub fn expr(&self, i: usize) -> &'a MemoExpr {
        self.memo.expr(self.bindings[i])
    }

    pub fn root(&self) -> &'a MemoExpr {
        self.expr(0)
    }

    /// Logical payload of the `i`-th bound expression.
    pub fn logical(&self, i: usize) -> Option<&'a LogicalOp> {
        self.expr(i).op.as_logical()
    }

    pub fn group(&self, id: GroupId) -> &'a Group {
        self.memo.group(id)
    }

    pub fn row_type(&self, id: GroupId) -> &'a RowType {
        &self.memo.group(id).row_type
    }

    /// Derived statistics of a group, if already known.
    pub fn stats(&self, id: GroupId) -> Option<&'a Statistics> {
        self.memo.group(id).stats.as_ref()
    }

    /// Logical members of a group together with their payloads.
    pub fn logical_in(&self, id: GroupId) -> impl Iterator<Item = (&'a MemoExpr, &'a LogicalOp)> + 'a {
        let memo = self.memo;
        memo.group(id)
            .logical_exprs
            .iter()
            .map(move |&e| memo.expr(e))
            .filter(|e| !e.redundant)
            .filter_map(|e| e.op.as_logical().map(|op| (e, op)))
    }

    /// Whether the group contains a provably empty relation.
    pub fn is_empty_group(&self, id: GroupId) -> bool {
        self.logical_in(id).any(|(_, op)| op.is_empty_values())
    }

    /// Row bound provable from the payload of some member alone (VALUES, a grand-total
    /// aggregate, a sort with FETCH).
    pub fn known_max_rows(&self, id: GroupId) -> Option<f64> {
        self.logical_in(id)
            .filter_map(|(e, op)| op.max_rows(&vec![None; e.children.len()]))
            .reduce(f64::min)
    }

    /// Propose a result equivalent to the matched root.
    pub fn transform_to(&mut self, result: RuleResult) {
        self.results.push(result);
    }

    pub fn into_results(self) -> Vec<RuleResult> {
        self.results
    }
}

/// A rule transforms or implements expressions.
pub trait Rule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    /// Whether this rule is a transformation or implementation rule.
    fn rule_type(&self) -> RuleType;

    /// Pattern that this rule matches against.
    fn pattern(&self) -> Pattern;

    /// Payload guard evaluated after the pattern matched.
    fn matches(&self, _call: &RuleCall) -> bool {
        true
    }

    /// Propose rewrites through `call.transform_to`.
    fn on_match(&self, call: &mut RuleCall);

    /// Hash for fingerprinting (to avoid re-applying rules).
    fn rule_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name().hash(&mut hasher);
        hasher.finish()
    }
}

/// A named set of phase-scoped rules contributed by a storage plugin.
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<(PlannerPhase, Box<dyn Rule>)>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, phase: PlannerPhase, rule: Box<dyn Rule>) -> Self {
        self.rules.push((phase, rule));
        self
    }
}

/// Registry of optimization rules.
#[derive(Default)]
pub struct RuleRegistry {
    base_rules: Vec<(PlannerPhase, Box<dyn Rule>)>,
    source_rules: HashMap<String, RuleSet>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, phase: PlannerPhase, rule: Box<dyn Rule>) {
        self.base_rules.push((phase, rule));
    }

    pub fn add_source_rule_set(&mut self, rule_set: RuleSet) {
        self.source_rules.insert(rule_set.name.clone(), rule_set);
    }

    /// Active rules of `phase`, base rules first, then the rules of the selected plugin.
    pub fn rules_for(&self, phase: PlannerPhase, source: Option<&str>) -> Vec<&dyn Rule> {
        let plugin = source
            .and_then(|s| self.source_rules.get(s))
            .map(|rs| rs.rules.as_slice())
            .unwrap_or_default();
        self.base_rules
            .iter()
            .chain(plugin)
            .filter(|(p, _)| *p == phase)
            .map(|(_, r)| r.as_ref())
            .collect()
    }

    /// Names of every registered rule, including plugin rules.
    pub fn rule_names(&self) -> Vec<&str> {
        self.base_rules
            .iter()
            .chain(self.source_rules.values().flat_map(|rs| rs.rules.iter()))
            .map(|(_, r)| r.name())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, RuleType);

    impl Rule for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn rule_type(&self) -> RuleType {
            self.1
        }
        fn pattern(&self) -> Pattern {
            Pattern::Any
        }
        fn on_match(&self, _call: &mut RuleCall) {}
    }

    #[test]
    fn test_rules_for_selects_phase_and_plugin() {
        let mut registry = RuleRegistry::new();
        registry.add_rule(
            PlannerPhase::LogicalSimplification,
            Box::new(Named("A", RuleType::Transformation)),
        );
        registry.add_rule(
            PlannerPhase::Physical,
            Box::new(Named("B", RuleType::Implementation)),
        );
        registry.add_source_rule_set(RuleSet::new("parquet").with_rule(
            PlannerPhase::LogicalSimplification,
            Box::new(Named("C", RuleType::Transformation)),
        ));

        let names = |rules: Vec<&dyn Rule>| rules.iter().map(|r| r.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names(registry.rules_for(PlannerPhase::LogicalSimplification, None)), vec!["A"]);
        assert_eq!(
            names(registry.rules_for(PlannerPhase::LogicalSimplification, Some("parquet"))),
            vec!["A", "C"]
        );
        assert_eq!(names(registry.rules_for(PlannerPhase::Physical, Some("parquet"))), vec!["B"]);
        assert_eq!(registry.rule_names().len(), 3);
    }

    #[test]
    fn test_rule_hash_is_name_based() {
        let a = Named("Same", RuleType::Transformation);
        let b = Named("Same", RuleType::Implementation);
        assert_eq!(a.rule_hash(), b.rule_hash());
        assert_ne!(a.rule_hash(), Named("Other", RuleType::Transformation).rule_hash());
    }
}
