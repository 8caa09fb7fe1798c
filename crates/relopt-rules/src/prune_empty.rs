//! # Empty Relation Propagation
//!
//! A `Values` node without rows is a provably empty relation. These rules push that fact
//! upwards so whole subtrees collapse before physical planning sees them.
//!
//! - Project, Filter, Sort and Window over an empty input are empty.
//! - An Aggregate over an empty input is empty unless one of its grouping sets is the
//!   empty set: a grand total still produces one row (`COUNT(*)` returns 0).
//! - A Sort with `FETCH 0` is empty whatever its input.
//! - A Join is empty when an input that the join type does not preserve is empty. An empty
//!   right input of an ANTI join leaves the left input. An empty input on the
//!   null-generating side of an outer join turns the join into a projection of the
//!   preserved input padded with typed NULLs.
//! - Correlate follows the same rules with the correlated input on the right.
//! - A Union drops its empty inputs, and is empty once none remain.

use crate::union_constants::retype;
use relopt_core::expr::{Expr, JoinType, ScalarValue};
use relopt_core::memo::GroupId;
use relopt_core::operator::{aggregate_has_grand_total, LogicalOp, LogicalOpKind, Operator};
use relopt_core::pattern::{OpMatcher, Pattern};
use relopt_core::rule::{Rule, RuleCall, RuleChild, RuleResult, RuleType};
use relopt_core::types::RowType;

/// Empty relation with the row type of the matched group.
fn empty(call: &RuleCall) -> RuleResult {
    let row_type = call.row_type(call.root().group).clone();
    RuleResult::Substitution(
        Operator::Logical(LogicalOp::Values { row_type, rows: vec![] }),
        vec![],
    )
}

/// A single-input operator over an empty input.
pub struct PruneEmptySingleRule {
    kind: LogicalOpKind,
    name: String,
}

impl PruneEmptySingleRule {
    pub fn new(kind: LogicalOpKind) -> Self {
        Self {
            kind,
            name: format!("PruneEmpty{}", kind.name()),
        }
    }

    /// One instance per operator kind this rule applies to.
    pub fn all() -> Vec<PruneEmptySingleRule> {
        [
            LogicalOpKind::Project,
            LogicalOpKind::Filter,
            LogicalOpKind::Sort,
            LogicalOpKind::Window,
            LogicalOpKind::Aggregate,
        ]
        .into_iter()
        .map(PruneEmptySingleRule::new)
        .collect()
    }
}

impl Rule for PruneEmptySingleRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over_empty(self.kind)
    }

    fn matches(&self, call: &RuleCall) -> bool {
        match call.logical(0) {
            Some(LogicalOp::Aggregate {
                group_keys,
                grouping_sets,
                ..
            }) => !aggregate_has_grand_total(group_keys, grouping_sets),
            _ => true,
        }
    }

    fn on_match(&self, call: &mut RuleCall) {
        let result = empty(call);
        call.transform_to(result);
    }
}

/// `ORDER BY ... FETCH 0`.
pub struct PruneEmptyFetchZeroRule;

impl Rule for PruneEmptyFetchZeroRule {
    fn name(&self) -> &str {
        "PruneEmptyFetchZero"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::Operator(
            OpMatcher::Where(LogicalOpKind::Sort, |op| {
                matches!(op, LogicalOp::Sort { fetch: Some(0), .. })
            }),
            vec![Pattern::Any],
        )
    }

    fn on_match(&self, call: &mut RuleCall) {
        let result = empty(call);
        call.transform_to(result);
    }
}

/// Join or Correlate with an empty input.
pub struct PruneEmptyJoinRule {
    kind: LogicalOpKind,
    empty_left: bool,
    name: &'static str,
}

impl PruneEmptyJoinRule {
    pub fn all() -> Vec<PruneEmptyJoinRule> {
        vec![
            PruneEmptyJoinRule {
                kind: LogicalOpKind::Join,
                empty_left: true,
                name: "PruneEmptyJoinLeft",
            },
            PruneEmptyJoinRule {
                kind: LogicalOpKind::Join,
                empty_left: false,
                name: "PruneEmptyJoinRight",
            },
            PruneEmptyJoinRule {
                kind: LogicalOpKind::Correlate,
                empty_left: true,
                name: "PruneEmptyCorrelateLeft",
            },
            PruneEmptyJoinRule {
                kind: LogicalOpKind::Correlate,
                empty_left: false,
                name: "PruneEmptyCorrelateRight",
            },
        ]
    }
}

impl Rule for PruneEmptyJoinRule {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        let children = if self.empty_left {
            vec![Pattern::empty_values(), Pattern::Any]
        } else {
            vec![Pattern::Any, Pattern::empty_values()]
        };
        Pattern::logical(self.kind, children)
    }

    fn on_match(&self, call: &mut RuleCall) {
        let join_type = match call.logical(0) {
            Some(LogicalOp::Join { join_type, .. } | LogicalOp::Correlate { join_type, .. }) => *join_type,
            _ => return,
        };
        let (left, right) = (call.root().children[0], call.root().children[1]);
        let result = match (self.empty_left, join_type) {
            (true, JoinType::Inner | JoinType::Cross | JoinType::Left | JoinType::Semi | JoinType::Anti) => empty(call),
            (false, JoinType::Inner | JoinType::Cross | JoinType::Right | JoinType::Semi) => empty(call),
            (false, JoinType::Anti) => RuleResult::Equivalent(left),
            (true, JoinType::Right | JoinType::Full) => pad_with_nulls(call, right, false),
            (false, JoinType::Left | JoinType::Full) => pad_with_nulls(call, left, true),
        };
        call.transform_to(result);
    }
}

/// The preserved input of an outer join whose other input is empty, with NULLs for the
/// fields of the empty side.
fn pad_with_nulls(call: &RuleCall, preserved: GroupId, preserved_is_left: bool) -> RuleResult {
    let output = call.row_type(call.root().group);
    let input = call.row_type(preserved);
    let n = input.len();
    let (preserved_range, null_range) = if preserved_is_left {
        (0..n, n..output.len())
    } else {
        (output.len() - n..output.len(), 0..output.len() - n)
    };
    let exprs: Vec<Expr> = output
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            if preserved_range.contains(&i) {
                let ordinal = (i - preserved_range.start) as u32;
                retype(Expr::col(ordinal, field.name.as_str()), input, field)
            } else {
                debug_assert!(null_range.contains(&i));
                retype(Expr::lit(ScalarValue::Null), input, field)
            }
        })
        .collect();
    RuleResult::Substitution(
        Operator::Logical(LogicalOp::Project {
            exprs,
            aliases: output.fields.iter().map(|f| f.name.clone()).collect(),
        }),
        vec![preserved],
    )
}

/// Union with at least one empty input.
pub struct PruneEmptyUnionRule;

impl Rule for PruneEmptyUnionRule {
    fn name(&self) -> &str {
        "PruneEmptyUnion"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::Unordered(
            OpMatcher::LogicalOp(LogicalOpKind::Union),
            Box::new(Pattern::empty_values()),
        )
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(union @ LogicalOp::Union { all }) = call.logical(0) else {
            return;
        };
        let root = call.root();
        let output = call.row_type(root.group);
        let remaining: Vec<GroupId> = root
            .children
            .iter()
            .copied()
            .filter(|&g| !call.is_empty_group(g))
            .collect();

        let result = match remaining.as_slice() {
            [] => empty(call),
            [only] if *all => rename(output, call.row_type(*only), RuleChild::Group(*only)),
            _ => {
                let types: Vec<&RowType> = remaining.iter().map(|&g| call.row_type(g)).collect();
                let Ok(narrow) = Operator::Logical(union.clone()).derive_row_type(&types) else {
                    return;
                };
                let inputs = remaining.iter().map(|&g| RuleChild::Group(g)).collect();
                rename(output, &narrow, RuleChild::NewExpr(Operator::Logical(union.clone()), inputs))
            }
        };
        call.transform_to(result);
    }
}

/// `input` as is when its row type is `output`, otherwise under a renaming projection.
fn rename(output: &RowType, input_type: &RowType, input: RuleChild) -> RuleResult {
    if output == input_type {
        return match input {
            RuleChild::Group(g) => RuleResult::Equivalent(g),
            RuleChild::NewExpr(op, children) => RuleResult::NewChildren(op, children),
        };
    }
    let exprs = output
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| retype(Expr::col(i as u32, field.name.as_str()), input_type, field))
        .collect();
    RuleResult::NewChildren(
        Operator::Logical(LogicalOp::Project {
            exprs,
            aliases: output.fields.iter().map(|f| f.name.clone()).collect(),
        }),
        vec![input],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{apply_rule, dept, dept_scan, emp, emp_scan, gt_lit, logical_ops, session};
    use relopt_core::expr::{AggCall, AggFunc};
    use relopt_core::memo::Memo;
    use relopt_core::node::RelNode;
    use relopt_core::rule::{PlannerPhase, RuleRegistry};
    use relopt_core::traits::Collation;

    fn empty_emp() -> RelNode {
        RelNode::values(emp(), vec![]).unwrap()
    }

    fn is_empty(memo: &Memo, group: GroupId) -> bool {
        logical_ops(memo, group).into_iter().any(LogicalOp::is_empty_values)
    }

    /// Run every pruning rule together.
    fn prune(tree: &RelNode) -> (Memo, GroupId) {
        let mut registry = RuleRegistry::new();
        for rule in PruneEmptySingleRule::all() {
            registry.add_rule(PlannerPhase::LogicalSimplification, Box::new(rule));
        }
        for rule in PruneEmptyJoinRule::all() {
            registry.add_rule(PlannerPhase::LogicalSimplification, Box::new(rule));
        }
        registry.add_rule(PlannerPhase::LogicalSimplification, Box::new(PruneEmptyFetchZeroRule));
        registry.add_rule(PlannerPhase::LogicalSimplification, Box::new(PruneEmptyUnionRule));
        let mut search = session(registry);
        let root = search.memo.register(tree).unwrap();
        search.run_phase(PlannerPhase::LogicalSimplification).unwrap();
        let root = search.memo.find(root);
        (search.memo, root)
    }

    #[test]
    fn test_single_input_operators_collapse() {
        let tree = RelNode::sort(
            RelNode::project_fields(RelNode::filter(empty_emp(), gt_lit(3, "sal", 1)).unwrap(), &[3, 0]).unwrap(),
            Collation::of(&[0]),
            0,
            None,
        )
        .unwrap();
        let (memo, root) = prune(&tree);
        assert!(is_empty(&memo, root));
    }

    #[test]
    fn test_grand_total_over_empty_is_not_empty() {
        let total = RelNode::aggregate(empty_emp(), vec![], vec![AggCall::new(AggFunc::Count, vec![], "c")]).unwrap();
        let (memo, root) = prune(&total);
        assert!(!is_empty(&memo, root));

        let grouped = RelNode::aggregate(empty_emp(), vec![1], vec![AggCall::new(AggFunc::Count, vec![], "c")]).unwrap();
        let (memo, root) = prune(&grouped);
        assert!(is_empty(&memo, root));
    }

    #[test]
    fn test_fetch_zero_is_empty() {
        let tree = RelNode::sort(emp_scan(), Collation::empty(), 0, Some(0)).unwrap();
        let (memo, root) = apply_rule(&tree, PruneEmptyFetchZeroRule);
        assert!(is_empty(&memo, root));
    }

    #[test]
    fn test_join_with_empty_input() {
        let on = Expr::eq(Expr::col(1, "deptno"), Expr::col(4, "deptno"));
        let empty_dept = RelNode::values(dept(), vec![]).unwrap();

        let inner = RelNode::join(emp_scan(), empty_dept.clone(), JoinType::Inner, on.clone()).unwrap();
        let (memo, root) = prune(&inner);
        assert!(is_empty(&memo, root));

        // Every emp row survives a LEFT join with nothing, NULL-padded.
        let left = RelNode::join(emp_scan(), empty_dept.clone(), JoinType::Left, on.clone()).unwrap();
        let (memo, root) = prune(&left);
        assert!(!is_empty(&memo, root));
        assert!(logical_ops(&memo, root)
            .into_iter()
            .any(|op| matches!(op, LogicalOp::Project { exprs, .. } if exprs.len() == 7)));

        let anti = RelNode::join(emp_scan(), empty_dept, JoinType::Anti, on).unwrap();
        let (memo, root) = prune(&anti);
        assert_eq!(memo.num_groups(), 2);
        assert!(logical_ops(&memo, root)
            .into_iter()
            .any(|op| matches!(op, LogicalOp::Scan { .. })));
    }

    #[test]
    fn test_union_drops_empty_inputs() {
        let tree = RelNode::union(vec![empty_emp(), emp_scan(), empty_emp()], true).unwrap();
        let (memo, root) = prune(&tree);
        assert!(logical_ops(&memo, root)
            .into_iter()
            .any(|op| matches!(op, LogicalOp::Scan { .. })));

        let all_empty = RelNode::union(vec![empty_emp(), empty_emp()], false).unwrap();
        let (memo, root) = prune(&all_empty);
        assert!(is_empty(&memo, root));

        let filtered = RelNode::filter(dept_scan(), gt_lit(2, "budget", 0)).unwrap();
        let distinct = RelNode::union(
            vec![RelNode::values(dept(), vec![]).unwrap(), filtered.clone(), filtered],
            false,
        )
        .unwrap();
        let (memo, root) = prune(&distinct);
        let narrowed = memo
            .group(root)
            .logical_exprs
            .iter()
            .map(|&e| memo.expr(e))
            .any(|e| matches!(e.op.as_logical(), Some(LogicalOp::Union { all: false })) && e.children.len() == 2);
        assert!(narrowed);
        assert!(!is_empty(&memo, root));
    }
}
