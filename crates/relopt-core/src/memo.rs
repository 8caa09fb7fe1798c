//! # Memo
//!
//! The memo is the search state of one planning call. It stores every expression the
//! planner has seen, grouped into equivalence classes.
//!
//! ## Groups and Expressions
//!
//! A `Group` (an equivalence class, "RelSet") holds expressions known to produce the same
//! rows, possibly in a different order or physical layout. A `MemoExpr` is one operator
//! whose children are *groups*, not fixed subtrees. That is what keeps the memo a DAG:
//! a rewrite below a group is visible to every parent of that group at once.
//!
//! Two expressions are digest-equal when they have the same operator payload and the same
//! child groups. The memo keeps exactly one expression per digest. All expressions in a
//! group share one row type, and the memo refuses to place an expression with a different
//! row type into a group.
//!
//! ## Merging
//!
//! A rule may discover that two groups are equivalent (for example a projection that
//! turns out to be the identity). `merge` unions them: the higher group id is forwarded
//! to the lower one through a union-find, expressions and subsets move over, and every
//! parent expression is rewritten to point at the surviving group. Rewriting a parent can
//! make it digest-equal to another expression, which proves that their groups are
//! equivalent too, so merges cascade through a worklist until the memo is consistent.
//!
//! ## Subsets
//!
//! Each group is partitioned into `Subset`s ("RelSubsets"), one per trait set that has
//! been requested from it. A subset records every costed physical candidate and the
//! cheapest one (`best`). When a subset gets cheaper, `propagate_improvement` walks up
//! through the parent expressions and re-costs every candidate that used it.
//!
//! ## Change Tracking
//!
//! New expressions, and expressions whose child groups gained members, are queued in a
//! pending list that the firing engine drains to schedule new rule obligations.

use crate::cost::Cost;
use crate::error::{PlannerError, Result};
use crate::node::RelNode;
use crate::operator::Operator;
use crate::rule::{RuleChild, RuleResult};
use crate::stats::Statistics;
use crate::traits::TraitSet;
use crate::types::RowType;
use std::collections::{HashMap, HashSet};
use tracing::trace;

pub type GroupId = u32;
pub type ExprId = u32;

/// One operator in the memo. Children are canonical group ids at the time of the last
/// merge that touched this expression.
#[derive(Debug, Clone)]
pub struct MemoExpr {
    pub id: ExprId,
    pub op: Operator,
    pub children: Vec<GroupId>,
    pub group: GroupId,
    /// Became digest-equal to another expression after a merge and was dropped from its
    /// group.
    pub redundant: bool,
}

/// Progress of the physical planner on one subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsetState {
    Unstarted,
    /// Implementation rules requested for the owning group.
    Expanding,
    /// Enforcers inserted, candidates being costed.
    Converting,
    Costed,
    /// Part of the extracted plan.
    Final,
}

impl SubsetState {
    /// The planner is currently inside this subset; requesting it again is a cycle.
    pub fn in_progress(&self) -> bool {
        matches!(self, SubsetState::Expanding | SubsetState::Converting)
    }
}

/// A costed physical alternative for a subset.
#[derive(Debug, Clone)]
pub struct Winner {
    pub expr_id: ExprId,
    /// Local cost plus the best costs of the child subsets.
    pub cost: Cost,
    pub local_cost: Cost,
    /// Trait set requested from each child.
    pub child_traits: Vec<TraitSet>,
    /// Traits the expression delivers with those children.
    pub delivered: TraitSet,
}

#[derive(Debug, Clone)]
pub struct Subset {
    pub traits: TraitSet,
    pub state: SubsetState,
    pub best: Option<Winner>,
    pub candidates: Vec<Winner>,
}

impl Subset {
    fn new(traits: TraitSet) -> Self {
        Self {
            traits,
            state: SubsetState::Unstarted,
            best: None,
            candidates: Vec::new(),
        }
    }

    pub fn best_cost(&self) -> Cost {
        self.best.as_ref().map_or_else(Cost::infinite, |w| w.cost)
    }

    fn absorb(&mut self, other: Subset) {
        if other.best_cost() < self.best_cost() {
            self.best = other.best;
        }
        self.candidates.extend(other.candidates);
        if self.best.is_some() && self.state == SubsetState::Unstarted {
            self.state = SubsetState::Costed;
        }
    }
}

/// An equivalence class of expressions.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: GroupId,
    pub logical_exprs: Vec<ExprId>,
    pub physical_exprs: Vec<ExprId>,
    pub row_type: RowType,
    pub stats: Option<Statistics>,
    /// Implementation rules have run over the logical expressions.
    pub implemented: bool,
    pub subsets: HashMap<TraitSet, Subset>,
}

impl Group {
    fn new(id: GroupId, row_type: RowType) -> Self {
        Self {
            id,
            logical_exprs: Vec::new(),
            physical_exprs: Vec::new(),
            row_type,
            stats: None,
            implemented: false,
            subsets: HashMap::new(),
        }
    }

    pub fn exprs(&self) -> impl Iterator<Item = ExprId> + '_ {
        self.logical_exprs
            .iter()
            .chain(self.physical_exprs.iter())
            .copied()
    }
}

#[derive(Debug, Default)]
pub struct Memo {
    groups: Vec<Group>,
    exprs: Vec<MemoExpr>,
    digests: HashMap<(Operator, Vec<GroupId>), ExprId>,
    union_find: Vec<GroupId>,
    /// Expressions that have the group as a child, indexed by group id.
    parents: Vec<Vec<ExprId>>,
    /// Rule hash, binding, and the logical size of each child group of the binding root
    /// at firing time.
    fired: HashSet<(u64, Vec<ExprId>, Vec<usize>)>,
    pending: Vec<ExprId>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical id of a group, following merges.
    pub fn find(&self, mut id: GroupId) -> GroupId {
        while self.union_find[id as usize] != id {
            id = self.union_find[id as usize];
        }
        id
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[self.find(id) as usize]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut Group {
        let id = self.find(id);
        &mut self.groups[id as usize]
    }

    pub fn expr(&self, id: ExprId) -> &MemoExpr {
        &self.exprs[id as usize]
    }

    /// Canonical group of an expression.
    pub fn group_of(&self, id: ExprId) -> GroupId {
        self.find(self.exprs[id as usize].group)
    }

    pub fn num_groups(&self) -> usize {
        self.group_ids().len()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.iter().filter(|e| !e.redundant).count()
    }

    /// Id the next registered expression will get.
    pub fn next_expr_id(&self) -> ExprId {
        self.exprs.len() as ExprId
    }

    /// Ids of all groups that have not been merged into another.
    pub fn group_ids(&self) -> Vec<GroupId> {
        self.union_find
            .iter()
            .enumerate()
            .filter(|(i, &p)| *i as GroupId == p)
            .map(|(i, _)| i as GroupId)
            .collect()
    }

    /// Live expressions that use `group` as a child.
    pub fn parents_of(&self, group: GroupId) -> Vec<ExprId> {
        let mut out: Vec<ExprId> = self.parents[self.find(group) as usize]
            .iter()
            .copied()
            .filter(|&e| !self.exprs[e as usize].redundant)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Drain the expressions that were created or whose inputs changed.
    pub fn take_pending(&mut self) -> Vec<ExprId> {
        std::mem::take(&mut self.pending)
    }

    /// Whether `rule_hash` already fired on `binding` while the root's child groups looked
    /// as they do now. A child group that gained expressions re-opens the binding.
    pub fn is_fired(&self, rule_hash: u64, binding: &[ExprId]) -> bool {
        let stamp = self.child_stamp(binding);
        self.fired.contains(&(rule_hash, binding.to_vec(), stamp))
    }

    pub fn mark_fired(&mut self, rule_hash: u64, binding: Vec<ExprId>) {
        let stamp = self.child_stamp(&binding);
        self.fired.insert((rule_hash, binding, stamp));
    }

    /// Forget every recorded firing, so the next phase re-examines all bindings.
    pub fn clear_fired(&mut self) {
        self.fired.clear();
    }

    fn child_stamp(&self, binding: &[ExprId]) -> Vec<usize> {
        binding.first().map_or_else(Vec::new, |&root| {
            self.exprs[root as usize]
                .children
                .iter()
                .map(|&c| self.group(self.find(c)).logical_exprs.len())
                .collect()
        })
    }

    fn canonical(&self, children: Vec<GroupId>) -> Vec<GroupId> {
        children.into_iter().map(|c| self.find(c)).collect()
    }

    fn derive_row_type(&self, op: &Operator, children: &[GroupId]) -> Result<RowType> {
        let inputs: Vec<&RowType> = children.iter().map(|&c| &self.group(c).row_type).collect();
        op.derive_row_type(&inputs)
    }

    /// Register an expression, creating a new group unless a digest-equal expression
    /// already exists.
    pub fn add_expr(&mut self, op: Operator, children: Vec<GroupId>) -> Result<ExprId> {
        let children = self.canonical(children);
        if let Some(&existing) = self.digests.get(&(op.clone(), children.clone())) {
            return Ok(existing);
        }
        let row_type = self.derive_row_type(&op, &children)?;
        let gid = self.groups.len() as GroupId;
        self.groups.push(Group::new(gid, row_type));
        self.union_find.push(gid);
        self.parents.push(Vec::new());
        Ok(self.insert_expr(gid, op, children))
    }

    /// Register an expression into a known group. If a digest-equal expression already
    /// lives in another group, the two groups are merged.
    pub fn add_expr_to_group(
        &mut self,
        group: GroupId,
        op: Operator,
        children: Vec<GroupId>,
    ) -> Result<ExprId> {
        let group = self.find(group);
        let children = self.canonical(children);
        if let Some(&existing) = self.digests.get(&(op.clone(), children.clone())) {
            let other = self.group_of(existing);
            if other != group {
                self.merge(group, other)?;
            }
            return Ok(existing);
        }
        let row_type = self.derive_row_type(&op, &children)?;
        if row_type != self.group(group).row_type {
            return Err(PlannerError::invalid_plan(format!(
                "{op} produces {row_type}, group {group} has {}",
                self.group(group).row_type
            )));
        }
        Ok(self.insert_expr(group, op, children))
    }

    fn insert_expr(&mut self, group: GroupId, op: Operator, children: Vec<GroupId>) -> ExprId {
        let id = self.exprs.len() as ExprId;
        self.digests.insert((op.clone(), children.clone()), id);
        for &c in &children {
            self.parents[c as usize].push(id);
        }
        let g = &mut self.groups[group as usize];
        if op.is_logical() {
            g.logical_exprs.push(id);
        } else {
            g.physical_exprs.push(id);
        }
        trace!(expr = id, group, op = %op, "registered expression");
        self.exprs.push(MemoExpr {
            id,
            op,
            children,
            group,
            redundant: false,
        });
        self.pending.push(id);
        let parents = self.parents_of(group);
        self.pending.extend(parents);
        id
    }

    /// Register a whole tree bottom-up and return the group of its root.
    pub fn register(&mut self, node: &RelNode) -> Result<GroupId> {
        let children = node
            .children()
            .iter()
            .map(|c| self.register(c))
            .collect::<Result<Vec<_>>>()?;
        let id = self.add_expr(node.op().clone(), children)?;
        Ok(self.group_of(id))
    }

    /// Union two equivalent groups and cascade any merges this makes necessary.
    /// Returns the surviving group id.
    pub fn merge(&mut self, a: GroupId, b: GroupId) -> Result<GroupId> {
        let mut worklist = vec![(a, b)];
        while let Some((a, b)) = worklist.pop() {
            let (a, b) = (self.find(a), self.find(b));
            if a == b {
                continue;
            }
            if self.groups[a as usize].row_type != self.groups[b as usize].row_type {
                return Err(PlannerError::invalid_plan(format!(
                    "cannot merge group {a} {} with group {b} {}",
                    self.groups[a as usize].row_type, self.groups[b as usize].row_type
                )));
            }
            let (keep, gone) = (a.min(b), a.max(b));
            trace!(keep, gone, "merging groups");
            self.union_find[gone as usize] = keep;

            let gone_group = std::mem::replace(
                &mut self.groups[gone as usize],
                Group::new(gone, RowType::empty()),
            );
            for e in gone_group.exprs() {
                self.exprs[e as usize].group = keep;
            }
            {
                let kept = &mut self.groups[keep as usize];
                kept.logical_exprs.extend(gone_group.logical_exprs);
                kept.physical_exprs.extend(gone_group.physical_exprs);
                if kept.stats.is_none() {
                    kept.stats = gone_group.stats;
                }
                kept.implemented &= gone_group.implemented;
                for (traits, subset) in gone_group.subsets {
                    match kept.subsets.get_mut(&traits) {
                        Some(existing) => existing.absorb(subset),
                        None => {
                            kept.subsets.insert(traits, subset);
                        }
                    }
                }
            }

            let gone_parents = std::mem::take(&mut self.parents[gone as usize]);
            for &p in &gone_parents {
                if let Some((pg, og)) = self.rewrite_children(p) {
                    worklist.push((pg, og));
                }
            }
            self.parents[keep as usize].extend(gone_parents);

            let members: Vec<ExprId> = self.groups[keep as usize].logical_exprs.clone();
            self.pending.extend(members);
            let parents = self.parents_of(keep);
            self.pending.extend(parents);
        }
        Ok(self.find(a))
    }

    /// Re-canonicalize the children of `expr` after a merge. If the expression became
    /// digest-equal to another one it is dropped, and the pair of groups that must now be
    /// merged is returned.
    fn rewrite_children(&mut self, expr: ExprId) -> Option<(GroupId, GroupId)> {
        if self.exprs[expr as usize].redundant {
            return None;
        }
        let old_key = (
            self.exprs[expr as usize].op.clone(),
            self.exprs[expr as usize].children.clone(),
        );
        if self.digests.get(&old_key) == Some(&expr) {
            self.digests.remove(&old_key);
        }
        let children = self.canonical(old_key.1);
        self.exprs[expr as usize].children = children.clone();
        let new_key = (old_key.0, children);
        match self.digests.get(&new_key) {
            Some(&other) if other != expr => {
                let own = self.group_of(expr);
                let theirs = self.group_of(other);
                self.exprs[expr as usize].redundant = true;
                let g = &mut self.groups[own as usize];
                g.logical_exprs.retain(|&e| e != expr);
                g.physical_exprs.retain(|&e| e != expr);
                (own != theirs).then_some((own, theirs))
            }
            _ => {
                self.digests.insert(new_key, expr);
                None
            }
        }
    }

    fn materialize(&mut self, child: RuleChild) -> Result<GroupId> {
        match child {
            RuleChild::Group(g) => Ok(self.find(g)),
            RuleChild::NewExpr(op, children) => {
                let children = children
                    .into_iter()
                    .map(|c| self.materialize(c))
                    .collect::<Result<Vec<_>>>()?;
                let id = self.add_expr(op, children)?;
                Ok(self.group_of(id))
            }
        }
    }

    /// Register a rule result into `group`, the group of the matched root.
    ///
    /// New child subtrees are materialized bottom-up first. The result must have exactly
    /// the row type of the group, otherwise `InvalidRuleResult` is returned. Returns the
    /// id of the registered root expression (`None` for `Equivalent`, which merges).
    pub fn apply_result(&mut self, group: GroupId, result: RuleResult, rule: &str) -> Result<Option<ExprId>> {
        let group = self.find(group);
        let expected = self.group(group).row_type.clone();
        let invalid = |actual: &RowType| PlannerError::InvalidRuleResult {
            rule: rule.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        };
        let (op, children) = match result {
            RuleResult::Equivalent(other) => {
                let actual = &self.group(other).row_type;
                if *actual != expected {
                    return Err(invalid(actual));
                }
                self.merge(group, other)?;
                return Ok(None);
            }
            RuleResult::Substitution(op, children) => (op, self.canonical(children)),
            RuleResult::NewChildren(op, children) => {
                let children = children
                    .into_iter()
                    .map(|c| self.materialize(c))
                    .collect::<Result<Vec<_>>>()?;
                (op, children)
            }
        };
        let actual = self.derive_row_type(&op, &children)?;
        if actual != expected {
            return Err(invalid(&actual));
        }
        // Materializing children may have merged `group` away.
        let group = self.find(group);
        self.add_expr_to_group(group, op, children).map(Some)
    }

    // ========================================================================
    // Subsets and costing
    // ========================================================================

    pub fn ensure_subset(&mut self, group: GroupId, traits: &TraitSet) -> &mut Subset {
        self.group_mut(group)
            .subsets
            .entry(traits.clone())
            .or_insert_with(|| Subset::new(traits.clone()))
    }

    pub fn subset(&self, group: GroupId, traits: &TraitSet) -> Option<&Subset> {
        self.group(group).subsets.get(traits)
    }

    pub fn best_cost(&self, group: GroupId, traits: &TraitSet) -> Cost {
        self.subset(group, traits)
            .map_or_else(Cost::infinite, Subset::best_cost)
    }

    /// Record a costed candidate. Returns whether it became the subset's best.
    pub fn record_candidate(&mut self, group: GroupId, traits: &TraitSet, candidate: Winner) -> bool {
        let subset = self.ensure_subset(group, traits);
        let improved = candidate.cost < subset.best_cost();
        subset.candidates.push(candidate.clone());
        if improved {
            subset.best = Some(candidate);
        }
        improved
    }

    /// A subset got cheaper: re-cost every candidate that uses it, and ripple further
    /// up wherever a parent subset's best improves in turn.
    pub fn propagate_improvement(&mut self, group: GroupId, traits: &TraitSet) {
        let mut work = vec![(self.find(group), traits.clone())];
        while let Some((g, t)) = work.pop() {
            for p in self.parents_of(g) {
                let pg = self.group_of(p);
                let children = self.exprs[p as usize].children.clone();
                let keys: Vec<TraitSet> = self.groups[pg as usize].subsets.keys().cloned().collect();
                for key in keys {
                    let updates: Vec<(usize, Cost)> = self.groups[pg as usize].subsets[&key]
                        .candidates
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| {
                            c.expr_id == p
                                && children
                                    .iter()
                                    .zip(&c.child_traits)
                                    .any(|(&cg, ct)| self.find(cg) == g && *ct == t)
                        })
                        .map(|(i, c)| {
                            let cost = children
                                .iter()
                                .zip(&c.child_traits)
                                .fold(c.local_cost, |acc, (&cg, ct)| {
                                    acc.add(&self.best_cost(cg, ct))
                                });
                            (i, cost)
                        })
                        .collect();
                    let Some(subset) = self.groups[pg as usize].subsets.get_mut(&key) else {
                        continue;
                    };
                    let mut improved = false;
                    for (i, cost) in updates {
                        let candidate = &mut subset.candidates[i];
                        if cost < candidate.cost {
                            candidate.cost = cost;
                            if cost < subset.best.as_ref().map_or_else(Cost::infinite, |b| b.cost) {
                                subset.best = Some(candidate.clone());
                                improved = true;
                            }
                        }
                    }
                    if improved {
                        trace!(group = pg, traits = %key, "parent subset improved");
                        work.push((pg, key));
                    }
                }
            }
        }
    }

    /// Resolve a subset to its cheapest physical tree, marking every visited subset
    /// `Final`.
    pub fn extract(&mut self, group: GroupId, traits: &TraitSet) -> Result<RelNode> {
        let mut path = Vec::new();
        self.extract_inner(group, traits, &mut path)
    }

    fn extract_inner(
        &mut self,
        group: GroupId,
        traits: &TraitSet,
        path: &mut Vec<(GroupId, TraitSet)>,
    ) -> Result<RelNode> {
        let g = self.find(group);
        let key = (g, traits.clone());
        if path.contains(&key) {
            return Err(PlannerError::invalid_plan(format!(
                "winner cycle through group {g} with traits {traits}"
            )));
        }
        let winner = self
            .subset(g, traits)
            .and_then(|s| s.best.clone())
            .filter(|w| !w.cost.is_infinite())
            .ok_or_else(|| {
                PlannerError::invalid_plan(format!("group {g} has no plan for traits {traits}"))
            })?;
        path.push(key);
        let expr = self.exprs[winner.expr_id as usize].clone();
        let mut children = Vec::with_capacity(expr.children.len());
        for (&c, t) in expr.children.iter().zip(&winner.child_traits) {
            children.push(self.extract_inner(c, t, path)?);
        }
        path.pop();
        self.ensure_subset(g, traits).state = SubsetState::Final;
        Ok(RelNode::from_parts(
            expr.op,
            children,
            self.group(g).row_type.clone(),
            winner.delivered,
        ))
    }
}
