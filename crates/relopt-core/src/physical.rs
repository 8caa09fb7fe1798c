//! # Physical Planner and Trait Enforcer
//!
//! The physical phase turns the explored memo into one physical tree. It works top-down
//! on subsets: a subset is a (group, required traits) pair, and its state moves through
//!
//! ```text
//! Unstarted -> Expanding -> Converting -> Costed -> Final
//! ```
//!
//! - **Expanding**: implementation rules fire on the group's logical expressions (once
//!   per group, the first time any subset of the group is needed).
//! - **Converting**: enforcers are registered into the group itself. An `Exchange`
//!   changes distribution, a `Sort` establishes a collation and a `MergeExchange` gathers
//!   sorted partitions onto one unit without losing their order. An enforcer's child is
//!   its own group under a weaker requirement, so it is costed like any other candidate.
//! - **Costed**: every physical expression of the group has been tried against the
//!   requirement. For each one, `required_child_traits` says what it needs from its
//!   inputs, the children are optimized recursively, `derive_traits` computes what the
//!   expression then delivers, and only candidates whose delivered traits satisfy the
//!   requirement are recorded.
//! - **Final**: the subset is part of the extracted plan.
//!
//! ## Cycles
//!
//! Requesting a subset that is still Expanding or Converting means the search went
//! around a cycle (an enforcer over its own group, or an identity expression merged into
//! its input). Such a request is infeasible and costs infinity. Once the subset is
//! costed, `Memo::propagate_improvement` re-costs the candidates that saw the infinite
//! value.
//!
//! ## Failure
//!
//! If the root subset ends up with infinite cost the call fails with `NoPhysicalPlan`,
//! naming the deepest logical operator whose group could not be given a finite plan.

use crate::catalog::DistributionAffinity;
use crate::cost::Cost;
use crate::error::{PlannerError, Result};
use crate::expr::{Expr, JoinType};
use crate::memo::{ExprId, GroupId, SubsetState, Winner};
use crate::node::PhysicalPlan;
use crate::operator::{effective_grouping_sets, JoinStrategy, Operator, PhysicalOp};
use crate::rule::{PlannerPhase, Rule, RuleType};
use crate::search::{CascadesSearch, PhaseReport};
use crate::stats::Statistics;
use crate::traits::{Collation, Convention, Distribution, FieldCollation, RelTrait, TraitSet};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

impl CascadesSearch {
    /// Physical planning from the root group, then extraction.
    pub(crate) fn optimize_physical(&mut self, root: GroupId, required: &TraitSet) -> Result<PhysicalPlan> {
        let required = self.normalize(root, &required.with_convention(Convention::Physical));
        let cost = self.optimize_group(root, &required)?;
        if cost.is_infinite() {
            let (operator, group) = self.deepest_unconvertible(root, &mut HashSet::new())?;
            debug!(%operator, group, "no physical plan");
            return Err(PlannerError::NoPhysicalPlan { operator, group });
        }
        let plan = self.memo.extract(root, &required)?;
        debug!(
            cost = %cost,
            iterations = self.iterations,
            groups = self.memo.num_groups(),
            "optimization complete"
        );
        Ok(PhysicalPlan {
            root: plan,
            cost,
            iterations: self.iterations,
        })
    }

    /// Drop requirements that cannot matter for this group.
    fn normalize(&self, group: GroupId, traits: &TraitSet) -> TraitSet {
        traits.simplify(self.group_max_rows(group))
    }

    /// Best cost of `group` under `required`, planning the subset if needed.
    pub fn optimize_group(&mut self, group: GroupId, required: &TraitSet) -> Result<Cost> {
        let group = self.memo.find(group);
        if let Some(subset) = self.memo.subset(group, required) {
            match subset.state {
                SubsetState::Expanding | SubsetState::Converting => return Ok(Cost::infinite()),
                SubsetState::Costed | SubsetState::Final => return Ok(subset.best_cost()),
                SubsetState::Unstarted => {}
            }
        }
        self.check_budget()?;
        self.iterations += 1;
        trace!(group, traits = %required, "optimizing subset");

        self.memo.ensure_subset(group, required).state = SubsetState::Expanding;
        self.derive_group_stats(group);
        self.implement_group(group)?;

        self.memo.ensure_subset(group, required).state = SubsetState::Converting;
        self.add_enforcers(group, required)?;

        let candidates = self.memo.group(group).physical_exprs.clone();
        for expr_id in candidates {
            self.cost_expr(group, expr_id, required)?;
        }

        let subset = self.memo.ensure_subset(group, required);
        subset.state = SubsetState::Costed;
        let best = subset.best_cost();
        self.memo.propagate_improvement(group, required);
        trace!(group, traits = %required, cost = %best, "subset costed");
        Ok(best)
    }

    /// Fire the implementation rules on the logical expressions of a group.
    fn implement_group(&mut self, group: GroupId) -> Result<()> {
        if self.memo.group(group).implemented {
            return Ok(());
        }
        self.memo.group_mut(group).implemented = true;

        let registry = Arc::clone(&self.rule_registry);
        let rules: Vec<&dyn Rule> = registry
            .rules_for(PlannerPhase::Physical, self.config.source_type.as_deref())
            .into_iter()
            .filter(|r| r.rule_type() == RuleType::Implementation)
            .filter(|r| !self.config.is_rule_disabled(r.name()))
            .collect();
        let mut report = PhaseReport {
            phase: PlannerPhase::Physical,
            firings: 0,
            new_exprs: 0,
            groups: 0,
        };
        let logical = self.memo.group(group).logical_exprs.clone();
        for expr_id in logical {
            for rule in &rules {
                self.fire_rule(*rule, expr_id, &mut report)?;
            }
        }
        trace!(group, firings = report.firings, new_exprs = report.new_exprs, "implemented group");
        Ok(())
    }

    /// Register the enforcers that can turn weaker traits of this group into `required`.
    fn add_enforcers(&mut self, group: GroupId, required: &TraitSet) -> Result<()> {
        let mut enforcers = Vec::new();
        if !required.distribution.is_any() {
            enforcers.push(PhysicalOp::Exchange {
                distribution: required.distribution.clone(),
            });
            if required.distribution == Distribution::Singleton && !required.collation.is_empty() {
                enforcers.push(PhysicalOp::MergeExchange {
                    collation: required.collation.clone(),
                });
            }
        }
        if !required.collation.is_empty() {
            enforcers.push(PhysicalOp::Sort {
                collation: required.collation.clone(),
                offset: 0,
                fetch: None,
            });
        }
        for op in enforcers {
            self.memo
                .add_expr_to_group(group, Operator::Physical(op), vec![group])?;
        }
        Ok(())
    }

    /// Cost one physical expression against `required` and record it as a candidate.
    fn cost_expr(&mut self, group: GroupId, expr_id: ExprId, required: &TraitSet) -> Result<()> {
        let expr = self.memo.expr(expr_id).clone();
        if expr.redundant {
            return Ok(());
        }
        let Operator::Physical(op) = &expr.op else {
            return Ok(());
        };
        let Some(child_required) = self.required_child_traits(op, &expr.children, required) else {
            return Ok(());
        };

        let mut child_traits = Vec::with_capacity(expr.children.len());
        let mut child_costs = Vec::with_capacity(expr.children.len());
        let mut delivered_children = Vec::with_capacity(expr.children.len());
        for (&child, req) in expr.children.iter().zip(child_required) {
            let req = self.normalize(child, &req);
            let cost = self.optimize_group(child, &req)?;
            let delivered = self
                .memo
                .subset(child, &req)
                .and_then(|s| s.best.as_ref())
                .map_or_else(|| req.clone(), |w| w.delivered.clone());
            child_costs.push(cost);
            delivered_children.push(delivered);
            child_traits.push(req);
        }

        let delivered = self
            .derive_traits(group, op, &expr.children, &delivered_children)
            .simplify(self.group_max_rows(group));
        if !delivered.satisfies(required) {
            return Ok(());
        }

        let output = self.stats_of(group);
        let inputs: Vec<Statistics> = expr.children.iter().map(|&c| self.stats_of(c)).collect();
        let input_refs: Vec<&Statistics> = inputs.iter().collect();
        let local_cost = self.cost_model.local_cost(op, &input_refs, &output);
        let cost = child_costs.iter().fold(local_cost, |acc, c| acc.add(c));

        let improved = self.memo.record_candidate(
            group,
            required,
            Winner {
                expr_id,
                cost,
                local_cost,
                child_traits,
                delivered,
            },
        );
        trace!(group, expr = expr_id, op = %op, cost = %cost, improved, "costed candidate");
        Ok(())
    }

    fn stats_of(&mut self, group: GroupId) -> Statistics {
        match &self.memo.group(group).stats {
            Some(stats) => stats.clone(),
            None => self.derive_group_stats(group),
        }
    }

    /// Traits each input must deliver for `op` to produce `required`, or `None` if the
    /// operator cannot be used for this requirement at all.
    pub fn required_child_traits(
        &self,
        op: &PhysicalOp,
        children: &[GroupId],
        required: &TraitSet,
    ) -> Option<Vec<TraitSet>> {
        let physical = TraitSet::physical();
        let singleton = required.distribution == Distribution::Singleton;
        let gathered = physical.with_distribution(Distribution::Singleton);
        let dist = |d: Distribution| physical.with_distribution(d);
        let on = |keys: &[u32]| {
            if singleton {
                Distribution::Singleton
            } else {
                Distribution::Hash(keys.to_vec())
            }
        };

        let reqs = match op {
            PhysicalOp::SeqScan { .. } | PhysicalOp::Values { .. } => vec![],
            PhysicalOp::Filter { .. } => vec![required.with_convention(Convention::Physical)],
            PhysicalOp::Project { exprs, .. } => vec![project_child_traits(exprs, required)],
            PhysicalOp::HashJoin {
                left_keys,
                right_keys,
                strategy: JoinStrategy::Partitioned,
                ..
            } => vec![dist(on(left_keys)), dist(on(right_keys))],
            PhysicalOp::HashJoin {
                strategy: JoinStrategy::BroadcastRight,
                ..
            } => {
                if singleton {
                    return None;
                }
                vec![physical.clone(), dist(Distribution::Broadcast)]
            }
            PhysicalOp::MergeJoin {
                left_keys,
                right_keys,
                ..
            } => vec![
                dist(on(left_keys)).with_collation(Collation::of(left_keys)),
                dist(on(right_keys)).with_collation(Collation::of(right_keys)),
            ],
            PhysicalOp::NestedLoopJoin { join_type, .. } => {
                if singleton || matches!(join_type, JoinType::Right | JoinType::Full) {
                    vec![gathered.clone(), gathered.clone()]
                } else {
                    vec![physical.clone(), dist(Distribution::Broadcast)]
                }
            }
            PhysicalOp::Correlate { .. } => {
                if singleton {
                    vec![gathered.clone(), gathered.clone()]
                } else {
                    vec![physical.clone(), dist(Distribution::Broadcast)]
                }
            }
            PhysicalOp::HashAggregate {
                group_keys,
                grouping_sets,
                ..
            } => {
                if group_keys.is_empty() || effective_grouping_sets(group_keys, grouping_sets).len() > 1 {
                    vec![gathered.clone()]
                } else {
                    vec![dist(on(group_keys))]
                }
            }
            PhysicalOp::StreamAggregate { group_keys, .. } => {
                if group_keys.is_empty() {
                    vec![gathered.clone()]
                } else {
                    vec![dist(on(group_keys)).with_collation(Collation::of(group_keys))]
                }
            }
            PhysicalOp::Sort { offset, fetch, .. } => {
                if *offset > 0 || fetch.is_some() {
                    vec![gathered.clone()]
                } else {
                    vec![dist(required.distribution.clone())]
                }
            }
            PhysicalOp::Limit { .. } => {
                vec![gathered.with_collation(required.collation.clone())]
            }
            PhysicalOp::UnionAll => {
                let each = if singleton { gathered.clone() } else { physical.clone() };
                vec![each; children.len()]
            }
            PhysicalOp::Window {
                partition_keys,
                order,
                ..
            } => {
                let mut keys: Vec<FieldCollation> =
                    partition_keys.iter().map(|&k| FieldCollation::asc(k)).collect();
                keys.extend(order.keys().iter().copied());
                let d = if partition_keys.is_empty() {
                    Distribution::Singleton
                } else {
                    on(partition_keys)
                };
                vec![dist(d).with_collation(Collation(keys))]
            }
            PhysicalOp::Exchange { .. } => vec![physical.clone()],
            PhysicalOp::MergeExchange { collation } => {
                vec![physical.with_collation(collation.clone())]
            }
        };
        Some(reqs)
    }

    /// Traits `op` delivers when its inputs deliver `inputs`.
    pub fn derive_traits(
        &self,
        group: GroupId,
        op: &PhysicalOp,
        children: &[GroupId],
        inputs: &[TraitSet],
    ) -> TraitSet {
        let physical = TraitSet::physical();
        let input = |i: usize| inputs.get(i).cloned().unwrap_or_else(TraitSet::physical);
        let with_physical = |t: TraitSet| t.with_convention(Convention::Physical);

        match op {
            PhysicalOp::SeqScan { table, .. } => {
                physical.with_distribution(self.scan_distribution(group, table))
            }
            PhysicalOp::Values { .. } => physical.with_distribution(Distribution::Singleton),
            PhysicalOp::Filter { .. } | PhysicalOp::Limit { .. } | PhysicalOp::Window { .. } => {
                with_physical(input(0))
            }
            PhysicalOp::Project { exprs, .. } => {
                let forward = |j: u32| {
                    exprs
                        .iter()
                        .position(|e| e.as_column().map(|c| c.index) == Some(j))
                        .map(|i| i as u32)
                };
                with_physical(input(0).remap(forward))
            }
            PhysicalOp::HashJoin { join_type, .. }
            | PhysicalOp::NestedLoopJoin { join_type, .. } => {
                physical.with_distribution(join_distribution(*join_type, &input(0)))
            }
            PhysicalOp::MergeJoin { join_type, .. } => {
                let left = input(0);
                let collation = match join_type {
                    JoinType::Right | JoinType::Full => Collation::empty(),
                    _ => left.collation.clone(),
                };
                physical
                    .with_distribution(join_distribution(*join_type, &left))
                    .with_collation(collation)
            }
            PhysicalOp::Correlate { .. } => with_physical(input(0)),
            PhysicalOp::HashAggregate { group_keys, .. } => {
                let position = |j: u32| group_keys.iter().position(|&k| k == j).map(|i| i as u32);
                physical.with_distribution(input(0).distribution.remap(position))
            }
            PhysicalOp::StreamAggregate { group_keys, .. } => {
                let position = |j: u32| group_keys.iter().position(|&k| k == j).map(|i| i as u32);
                with_physical(input(0).remap(position))
            }
            PhysicalOp::Sort { collation, .. } => with_physical(input(0)).with_collation(collation.clone()),
            PhysicalOp::UnionAll => {
                let all_singleton = children
                    .iter()
                    .enumerate()
                    .all(|(i, _)| input(i).distribution == Distribution::Singleton);
                physical.with_distribution(if all_singleton {
                    Distribution::Singleton
                } else {
                    Distribution::Random
                })
            }
            PhysicalOp::Exchange { distribution } => physical.with_distribution(distribution.clone()),
            PhysicalOp::MergeExchange { collation } => physical
                .with_distribution(Distribution::Singleton)
                .with_collation(collation.clone()),
        }
    }

    /// Hard affinity pins a scan to one fragment. Otherwise small tables are read in a
    /// single fragment; soft affinity widens "small" by the parallelism.
    fn scan_distribution(&self, group: GroupId, table: &crate::expr::TableRef) -> Distribution {
        let rows = self
            .catalog
            .row_count_estimate(table)
            .or_else(|| self.memo.group(group).stats.as_ref().map(|s| s.row_count))
            .unwrap_or(f64::INFINITY);
        let threshold = match self.catalog.distribution_affinity(table) {
            DistributionAffinity::Hard => return Distribution::Singleton,
            DistributionAffinity::Soft => self.config.slice_target * f64::from(self.config.parallelism),
            DistributionAffinity::None => self.config.slice_target,
        };
        if rows < threshold {
            Distribution::Singleton
        } else {
            Distribution::Random
        }
    }

    fn has_finite_plan(&mut self, group: GroupId) -> Result<bool> {
        let known = self
            .memo
            .group(group)
            .subsets
            .values()
            .any(|s| !s.best_cost().is_infinite());
        if known {
            return Ok(true);
        }
        let any = self.normalize(group, &TraitSet::physical());
        Ok(!self.optimize_group(group, &any)?.is_infinite())
    }

    /// Walk down from `group` to the deepest group whose inputs can all be planned but
    /// which itself cannot.
    fn deepest_unconvertible(
        &mut self,
        group: GroupId,
        visited: &mut HashSet<GroupId>,
    ) -> Result<(String, GroupId)> {
        let group = self.memo.find(group);
        visited.insert(group);
        let logical = self.memo.group(group).logical_exprs.clone();
        for &expr_id in &logical {
            let children = self.memo.expr(expr_id).children.clone();
            for child in children {
                let child = self.memo.find(child);
                if visited.contains(&child) {
                    continue;
                }
                if !self.has_finite_plan(child)? {
                    return self.deepest_unconvertible(child, visited);
                }
            }
        }
        let operator = logical
            .first()
            .map(|&e| self.memo.expr(e).op.name())
            .unwrap_or_else(|| "unknown".to_string());
        Ok((operator, group))
    }
}

fn join_distribution(join_type: JoinType, left: &TraitSet) -> Distribution {
    match join_type {
        JoinType::Right | JoinType::Full if left.distribution != Distribution::Singleton => {
            Distribution::Random
        }
        _ => left.distribution.clone(),
    }
}

/// Requirement on a projection's input that yields `required` on its output. Parts of
/// the requirement that name computed fields cannot be pushed through.
fn project_child_traits(exprs: &[Expr], required: &TraitSet) -> TraitSet {
    let back = |out: u32| {
        exprs
            .get(out as usize)
            .and_then(Expr::as_column)
            .map(|c| c.index)
    };
    let distribution = match &required.distribution {
        Distribution::Hash(keys) => keys
            .iter()
            .map(|&k| back(k))
            .collect::<Option<Vec<_>>>()
            .map_or(Distribution::Any, Distribution::Hash),
        Distribution::Range(keys) => keys
            .iter()
            .map(|&k| back(k))
            .collect::<Option<Vec<_>>>()
            .map_or(Distribution::Any, Distribution::Range),
        other => other.clone(),
    };
    let collation = required.collation.remap(back);
    let collation = if collation.keys().len() == required.collation.keys().len() {
        collation
    } else {
        Collation::empty()
    };
    TraitSet::physical()
        .with_distribution(distribution)
        .with_collation(collation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::config::PlannerConfig;
    use crate::expr::{ScalarValue, TableRef};
    use crate::node::RelNode;
    use crate::pattern::Pattern;
    use crate::rule::{RuleCall, RuleRegistry, RuleResult};
    use crate::types::{DataType, Field, RowType};
    use assert_matches::assert_matches;

    /// Implements Scan and Filter, nothing else.
    struct ImplScanFilter;

    impl Rule for ImplScanFilter {
        fn name(&self) -> &str {
            "ImplScanFilter"
        }
        fn rule_type(&self) -> RuleType {
            RuleType::Implementation
        }
        fn pattern(&self) -> Pattern {
            Pattern::Any
        }
        fn on_match(&self, call: &mut RuleCall) {
            let root = call.root();
            let op = match call.logical(0) {
                Some(crate::operator::LogicalOp::Scan {
                    table,
                    row_type,
                    projection,
                }) => PhysicalOp::SeqScan {
                    table: table.clone(),
                    row_type: row_type.clone(),
                    projection: projection.clone(),
                },
                Some(crate::operator::LogicalOp::Filter { predicate }) => PhysicalOp::Filter {
                    predicate: predicate.clone(),
                },
                _ => return,
            };
            call.transform_to(RuleResult::Substitution(
                Operator::Physical(op),
                root.children.clone(),
            ));
        }
    }

    fn row_type() -> RowType {
        RowType::new(vec![
            Field::new("k", DataType::Int32, false),
            Field::new("v", DataType::Int64, true),
        ])
    }

    fn session(rows: f64, affinity: DistributionAffinity) -> CascadesSearch {
        let t = TableRef::new("s", "t");
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(&t, row_type(), Statistics::new(rows, rows * 16.0));
        catalog.set_affinity(&t, affinity);
        let mut registry = RuleRegistry::new();
        registry.add_rule(PlannerPhase::Physical, Box::new(ImplScanFilter));
        CascadesSearch::with_default_cost_model(
            Arc::new(registry),
            Arc::new(catalog),
            PlannerConfig::default(),
        )
    }

    fn filtered() -> RelNode {
        let scan = RelNode::scan(TableRef::new("s", "t"), row_type()).unwrap();
        RelNode::filter(
            scan,
            Expr::gt(Expr::col(1, "v"), Expr::lit(ScalarValue::Int64(5))),
        )
        .unwrap()
    }

    fn op_names(node: &RelNode) -> Vec<String> {
        node.fold(&mut |n: &RelNode, children: Vec<Vec<String>>| {
            let mut out = vec![n.op().name()];
            out.extend(children.into_iter().flatten());
            out
        })
    }

    #[test]
    fn test_small_table_needs_no_exchange() {
        let mut search = session(100.0, DistributionAffinity::None);
        let plan = search.optimize(&filtered(), &TraitSet::root()).unwrap();
        println!("{}", plan.explain());
        assert_eq!(op_names(&plan.root), vec!["Filter", "SeqScan"]);
        assert_eq!(plan.root.trait_set().distribution, Distribution::Singleton);
    }

    #[test]
    fn test_large_table_is_gathered_by_exchange() {
        let mut search = session(10_000_000.0, DistributionAffinity::None);
        let plan = search.optimize(&filtered(), &TraitSet::root()).unwrap();
        println!("{}", plan.explain());
        let names = op_names(&plan.root);
        assert_eq!(names[0], "Exchange");
        assert!(names.contains(&"SeqScan".to_string()));
    }

    #[test]
    fn test_hard_affinity_forces_singleton_scan() {
        let mut search = session(10_000_000.0, DistributionAffinity::Hard);
        let plan = search.optimize(&filtered(), &TraitSet::root()).unwrap();
        assert_eq!(op_names(&plan.root), vec!["Filter", "SeqScan"]);
    }

    #[test]
    fn test_sort_requirement_is_enforced() {
        let mut search = session(100.0, DistributionAffinity::None);
        let required = TraitSet::root().with_collation(Collation::of(&[1]));
        let plan = search.optimize(&filtered(), &required).unwrap();
        assert_eq!(plan.root.op().name(), "Sort");
        assert!(plan.root.trait_set().satisfies(&required));
    }

    #[test]
    fn test_unimplementable_operator_is_named() {
        let mut search = session(100.0, DistributionAffinity::None);
        let scan = RelNode::scan(TableRef::new("s", "t"), row_type()).unwrap();
        let tree = RelNode::project_fields(filtered(), &[0]).unwrap();
        let tree = RelNode::join(tree, scan, JoinType::Inner, Expr::true_lit()).unwrap();
        let err = search.optimize(&tree, &TraitSet::root()).unwrap_err();
        assert_matches!(err, PlannerError::NoPhysicalPlan { operator, .. } if operator == "Project");
    }
}
