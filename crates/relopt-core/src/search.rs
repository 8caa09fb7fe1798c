//! # Cascades Search Algorithm
//!
//! `CascadesSearch` is one planning session. It owns the memo for the duration of a single
//! `optimize` call and threads the rule registry, cost model, catalog and configuration
//! through every step.
//!
//! ## How It Works
//!
//! 1. **Register**: the input tree is copied into the memo bottom-up. Digest-equal
//!    subtrees collapse into one group.
//!
//! 2. **Logical phases** (`run_phase`): the transformation rules of
//!    `LogicalSimplification` and then `JoinPlanning` run to a fixed point. Each phase
//!    starts with a sweep over every logical expression, then keeps draining the
//!    obligation queue: expressions created by a rule, expressions whose child groups
//!    gained members, and parents of merged groups. Every (rule, binding) pair fires at
//!    most once, which is what guarantees termination.
//!
//! 3. **Physical phase** (see `physical.rs`): starting from the root subset, groups are
//!    implemented lazily, enforcers are inserted where a requirement cannot be met
//!    natively, and the cheapest satisfying alternative is extracted.
//!
//! ## Budgets
//!
//! Between two obligations the session checks its step budget (`max_iterations`), the
//! memo size budget (`max_memo_groups`) and the optional wall-clock budget
//! (`timeout_ms`). Running out aborts planning with `PlanningTimeout`. This is the only
//! place a long search is interrupted.
//!
//! ## Statistics
//!
//! Group statistics are derived lazily, right before a group is costed, from one
//! representative logical expression. All expressions in a group are equivalent, so any
//! one of them will do.

use crate::catalog::Catalog;
use crate::condition::JoinCondition;
use crate::config::PlannerConfig;
use crate::cost::{CostModel, DefaultCostModel};
use crate::error::{PlannerError, Result};
use crate::memo::{ExprId, GroupId, Memo};
use crate::node::{PhysicalPlan, RelNode};
use crate::operator::{effective_grouping_sets, LogicalOp, Operator};
use crate::pattern::bind;
use crate::rule::{OptContext, PlannerPhase, Rule, RuleCall, RuleRegistry, RuleType};
use crate::stats::{self, Statistics};
use crate::traits::TraitSet;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Outcome of one logical phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    pub phase: PlannerPhase,
    /// Rule calls that reached `on_match`.
    pub firings: usize,
    /// Results that added a new expression to the memo.
    pub new_exprs: usize,
    /// Live groups when the phase finished.
    pub groups: usize,
}

/// The Cascades search engine.
pub struct CascadesSearch {
    /// The memo table storing all groups and expressions in the search space.
    pub memo: Memo,
    pub rule_registry: Arc<RuleRegistry>,
    pub cost_model: Arc<dyn CostModel>,
    pub catalog: Arc<dyn Catalog>,
    pub config: PlannerConfig,
    /// Rule firings and subset optimizations, shared across all phases.
    pub(crate) iterations: usize,
    started: Instant,
}

impl CascadesSearch {
    pub fn new(
        rule_registry: Arc<RuleRegistry>,
        cost_model: Arc<dyn CostModel>,
        catalog: Arc<dyn Catalog>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            memo: Memo::new(),
            rule_registry,
            cost_model,
            catalog,
            config,
            iterations: 0,
            started: Instant::now(),
        }
    }

    /// Session using `DefaultCostModel` derived from `config`, with catalog scan costs.
    pub fn with_default_cost_model(
        rule_registry: Arc<RuleRegistry>,
        catalog: Arc<dyn Catalog>,
        config: PlannerConfig,
    ) -> Self {
        let cost_model = DefaultCostModel::from_config(&config).with_catalog(Arc::clone(&catalog));
        Self::new(rule_registry, Arc::new(cost_model), catalog, config)
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Plan `root` so that the result satisfies `required`.
    pub fn optimize(&mut self, root: &RelNode, required: &TraitSet) -> Result<PhysicalPlan> {
        self.config.validate()?;
        self.started = Instant::now();
        let root_group = self.memo.register(root)?;
        debug!(
            root_group,
            groups = self.memo.num_groups(),
            exprs = self.memo.num_exprs(),
            "starting optimization"
        );

        for phase in PlannerPhase::LOGICAL {
            let report = self.run_phase(phase)?;
            debug!(
                phase = phase.name(),
                firings = report.firings,
                new_exprs = report.new_exprs,
                groups = report.groups,
                "phase complete"
            );
        }

        let root_group = self.memo.find(root_group);
        self.optimize_physical(root_group, required)
    }

    /// Run the transformation rules of one phase until no obligation is left.
    pub fn run_phase(&mut self, phase: PlannerPhase) -> Result<PhaseReport> {
        let registry = Arc::clone(&self.rule_registry);
        let rules: Vec<&dyn Rule> = registry
            .rules_for(phase, self.config.source_type.as_deref())
            .into_iter()
            .filter(|r| r.rule_type() == RuleType::Transformation)
            .filter(|r| !self.config.is_rule_disabled(r.name()))
            .collect();
        let mut report = PhaseReport {
            phase,
            firings: 0,
            new_exprs: 0,
            groups: 0,
        };

        // Full sweep first; anything already pending is covered by it.
        self.memo.take_pending();
        let mut queue: VecDeque<ExprId> = self
            .memo
            .group_ids()
            .into_iter()
            .flat_map(|g| self.memo.group(g).logical_exprs.clone())
            .collect();

        loop {
            let Some(expr_id) = queue.pop_front() else {
                let pending = self.memo.take_pending();
                if pending.is_empty() {
                    break;
                }
                let mut seen = HashSet::new();
                queue.extend(pending.into_iter().filter(|e| seen.insert(*e)));
                continue;
            };
            let expr = self.memo.expr(expr_id);
            if expr.redundant || !expr.op.is_logical() {
                continue;
            }
            for rule in &rules {
                self.fire_rule(*rule, expr_id, &mut report)?;
            }
        }

        report.groups = self.memo.num_groups();
        Ok(report)
    }

    pub(crate) fn fire_rule(&mut self, rule: &dyn Rule, expr_id: ExprId, report: &mut PhaseReport) -> Result<()> {
        let rule_hash = rule.rule_hash();
        for binding in bind(&self.memo, expr_id, &rule.pattern()) {
            if self.memo.is_fired(rule_hash, &binding) {
                continue;
            }
            // An earlier firing may have merged some bound expression away.
            if binding.iter().any(|&e| self.memo.expr(e).redundant) {
                continue;
            }
            self.check_budget()?;
            self.memo.mark_fired(rule_hash, binding.clone());

            let results = {
                let ctx = OptContext {
                    catalog: self.catalog.as_ref(),
                    config: &self.config,
                };
                let mut call = RuleCall::new(&self.memo, &ctx, binding.clone());
                if !rule.matches(&call) {
                    continue;
                }
                rule.on_match(&mut call);
                call.into_results()
            };
            self.iterations += 1;
            report.firings += 1;
            trace!(rule = rule.name(), expr = expr_id, results = results.len(), "fired rule");

            for result in results {
                let group = self.memo.group_of(expr_id);
                let next_id = self.memo.next_expr_id();
                if let Some(new_id) = self.memo.apply_result(group, result, rule.name())? {
                    if new_id >= next_id {
                        report.new_exprs += 1;
                    }
                }
            }
            // Growth the rule caused itself does not re-open the binding.
            self.memo.mark_fired(rule_hash, binding);
        }
        Ok(())
    }

    /// Abort with `PlanningTimeout` once any budget is spent.
    pub(crate) fn check_budget(&self) -> Result<()> {
        if self.iterations >= self.config.max_iterations {
            return Err(self.timeout("iteration budget exhausted"));
        }
        if self.memo.num_groups() > self.config.max_memo_groups {
            return Err(self.timeout("memo group budget exhausted"));
        }
        if let Some(limit) = self.config.timeout_ms {
            if self.started.elapsed().as_millis() >= u128::from(limit) {
                return Err(self.timeout("time budget exhausted"));
            }
        }
        Ok(())
    }

    fn timeout(&self, reason: &str) -> PlannerError {
        let elapsed_ms = self.started.elapsed().as_millis();
        warn!(
            steps = self.iterations,
            elapsed_ms,
            groups = self.memo.num_groups(),
            reason,
            "planning budget exhausted"
        );
        PlannerError::PlanningTimeout {
            steps: self.iterations,
            elapsed_ms,
            reason: reason.to_string(),
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Statistics of a group, derived and cached on first use.
    pub fn derive_group_stats(&mut self, group: GroupId) -> Statistics {
        let mut visiting = HashSet::new();
        self.group_stats(group, &mut visiting)
    }

    fn group_stats(&mut self, group: GroupId, visiting: &mut HashSet<GroupId>) -> Statistics {
        let group = self.memo.find(group);
        if let Some(stats) = &self.memo.group(group).stats {
            return stats.clone();
        }
        if !visiting.insert(group) {
            return Statistics::unknown();
        }
        // Prefer an expression that does not read its own group.
        let representative = self
            .memo
            .group(group)
            .logical_exprs
            .iter()
            .copied()
            .find(|&e| {
                self.memo
                    .expr(e)
                    .children
                    .iter()
                    .all(|&c| self.memo.find(c) != group)
            });
        let stats = match representative {
            Some(expr_id) => self.expr_stats(expr_id, visiting),
            None => Statistics::unknown(),
        };
        visiting.remove(&group);
        self.memo.group_mut(group).stats = Some(stats.clone());
        stats
    }

    fn expr_stats(&mut self, expr_id: ExprId, visiting: &mut HashSet<GroupId>) -> Statistics {
        let expr = self.memo.expr(expr_id).clone();
        let Operator::Logical(op) = &expr.op else {
            return Statistics::unknown();
        };
        let inputs: Vec<Statistics> = expr
            .children
            .iter()
            .map(|&c| self.group_stats(c, visiting))
            .collect();
        let input = |i: usize| inputs.get(i).cloned().unwrap_or_else(Statistics::unknown);

        match op {
            LogicalOp::Scan {
                table, projection, ..
            } => {
                let base = self
                    .catalog
                    .get_table_stats(table)
                    .unwrap_or_else(Statistics::unknown);
                match projection {
                    Some(cols) => {
                        let mapping: Vec<Option<u32>> = cols.iter().map(|&c| Some(c)).collect();
                        base.remap_columns(&mapping)
                    }
                    None => base,
                }
            }
            LogicalOp::Values { rows, row_type } => {
                let n = rows.len() as f64;
                Statistics::new(n, n * row_type.len().max(1) as f64 * 8.0)
            }
            LogicalOp::Filter { predicate } => {
                let input = input(0);
                let selectivity = stats::estimate_selectivity(predicate, &input);
                stats::derive_filter_stats(&input, selectivity)
            }
            LogicalOp::Project { exprs, .. } => {
                let mapping: Vec<Option<u32>> = exprs
                    .iter()
                    .map(|e| e.as_column().map(|c| c.index))
                    .collect();
                input(0).remap_columns(&mapping)
            }
            LogicalOp::Join {
                join_type,
                condition,
            } => {
                let left_count = self.memo.group(expr.children[0]).row_type.len();
                let analyzed = JoinCondition::analyze(condition, left_count);
                stats::derive_join_stats(
                    &input(0),
                    &input(1),
                    left_count,
                    &analyzed.left_keys,
                    &analyzed.right_keys,
                    *join_type,
                    !analyzed.remainder.is_empty(),
                )
            }
            LogicalOp::Correlate { join_type, .. } => {
                let left_count = self.memo.group(expr.children[0]).row_type.len();
                stats::derive_join_stats(&input(0), &input(1), left_count, &[], &[], *join_type, false)
            }
            LogicalOp::Aggregate {
                group_keys,
                grouping_sets,
                aggregates,
            } => {
                let input = input(0);
                let sets = effective_grouping_sets(group_keys, grouping_sets);
                stats::derive_aggregate_stats(&input, &sets, aggregates.len())
            }
            LogicalOp::Sort { offset, fetch, .. } => {
                stats::derive_limit_stats(&input(0), *offset, *fetch)
            }
            LogicalOp::Union { .. } => {
                let refs: Vec<&Statistics> = inputs.iter().collect();
                stats::derive_union_stats(&refs)
            }
            LogicalOp::Window { .. } => input(0),
        }
    }

    /// Upper bound on the rows of a group known from payloads alone (Values, LIMIT,
    /// grand-total aggregates).
    pub fn group_max_rows(&self, group: GroupId) -> Option<f64> {
        let mut visiting = HashSet::new();
        self.max_rows_inner(group, &mut visiting)
    }

    fn max_rows_inner(&self, group: GroupId, visiting: &mut HashSet<GroupId>) -> Option<f64> {
        let group = self.memo.find(group);
        if !visiting.insert(group) {
            return None;
        }
        let mut best: Option<f64> = None;
        for &e in &self.memo.group(group).logical_exprs {
            let expr = self.memo.expr(e);
            let Some(op) = expr.op.as_logical() else {
                continue;
            };
            let inputs: Vec<Option<f64>> = expr
                .children
                .iter()
                .map(|&c| self.max_rows_inner(c, visiting))
                .collect();
            if let Some(n) = op.max_rows(&inputs) {
                best = Some(best.map_or(n, |b| b.min(n)));
            }
        }
        visiting.remove(&group);
        best
    }
}
