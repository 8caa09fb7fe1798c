//! Fixtures shared by the rule tests: an `emp`/`dept` catalog and helpers that run a
//! single rule to its fixed point.

use relopt_core::catalog::InMemoryCatalog;
use relopt_core::config::PlannerConfig;
use relopt_core::expr::{Expr, ScalarValue, TableRef};
use relopt_core::memo::{GroupId, Memo};
use relopt_core::node::{PhysicalPlan, RelNode};
use relopt_core::operator::LogicalOp;
use relopt_core::rule::{PlannerPhase, Rule, RuleRegistry};
use relopt_core::search::CascadesSearch;
use relopt_core::stats::{ColumnStatistics, Statistics};
use relopt_core::traits::TraitSet;
use relopt_core::types::{DataType, Field, RowType};
use std::sync::Arc;

pub(crate) fn emp() -> RowType {
    RowType::new(vec![
        Field::new("empno", DataType::Int32, false),
        Field::new("deptno", DataType::Int32, true),
        Field::new("ename", DataType::Utf8, true),
        Field::new("sal", DataType::Int64, true),
    ])
}

pub(crate) fn dept() -> RowType {
    RowType::new(vec![
        Field::new("deptno", DataType::Int32, false),
        Field::new("dname", DataType::Utf8, true),
        Field::new("budget", DataType::Int64, true),
    ])
}

pub(crate) fn emp_scan() -> RelNode {
    RelNode::scan(TableRef::new("hr", "emp"), emp()).unwrap()
}

pub(crate) fn dept_scan() -> RelNode {
    RelNode::scan(TableRef::new("hr", "dept"), dept()).unwrap()
}

/// `$index > value`
pub(crate) fn gt_lit(index: u32, name: &str, value: i64) -> Expr {
    Expr::gt(Expr::col(index, name), Expr::lit(ScalarValue::Int64(value)))
}

pub(crate) fn catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(
        &TableRef::new("hr", "emp"),
        emp(),
        Statistics::new(10_000.0, 640_000.0)
            .with_column(0, ColumnStatistics::new(10_000.0, 0.0))
            .with_column(1, ColumnStatistics::new(50.0, 0.01)),
    );
    catalog.add_table(
        &TableRef::new("hr", "dept"),
        dept(),
        Statistics::new(50.0, 2_000.0).with_column(0, ColumnStatistics::new(50.0, 0.0)),
    );
    catalog
}

pub(crate) fn session(registry: RuleRegistry) -> CascadesSearch {
    session_with(registry, PlannerConfig::default())
}

pub(crate) fn session_with(registry: RuleRegistry, config: PlannerConfig) -> CascadesSearch {
    CascadesSearch::with_default_cost_model(Arc::new(registry), Arc::new(catalog()), config)
}

/// Plan `tree` with only the given implementation rules and no logical rewrites.
pub(crate) fn implement(
    tree: &RelNode,
    rules: Vec<Box<dyn Rule>>,
    config: PlannerConfig,
) -> relopt_core::Result<PhysicalPlan> {
    let mut registry = RuleRegistry::new();
    for rule in rules {
        registry.add_rule(PlannerPhase::Physical, rule);
    }
    session_with(registry, config).optimize(tree, &TraitSet::root())
}

/// Operator names of a plan in pre-order.
pub(crate) fn op_names(node: &RelNode) -> Vec<String> {
    node.fold(&mut |n: &RelNode, children: Vec<Vec<String>>| {
        let mut out = vec![n.op().name()];
        out.extend(children.into_iter().flatten());
        out
    })
}

/// Register `tree` and run `rule` alone until it stops producing anything.
pub(crate) fn apply_rule(tree: &RelNode, rule: impl Rule + 'static) -> (Memo, GroupId) {
    let mut registry = RuleRegistry::new();
    registry.add_rule(PlannerPhase::LogicalSimplification, Box::new(rule));
    let mut search = session(registry);
    let root = search.memo.register(tree).unwrap();
    search.run_phase(PlannerPhase::LogicalSimplification).unwrap();
    let root = search.memo.find(root);
    (search.memo, root)
}

/// Payloads of the live logical members of a group.
pub(crate) fn logical_ops(memo: &Memo, group: GroupId) -> Vec<&LogicalOp> {
    memo.group(group)
        .logical_exprs
        .iter()
        .map(|&e| memo.expr(e))
        .filter(|e| !e.redundant)
        .filter_map(|e| e.op.as_logical())
        .collect()
}

/// Child groups of the first live member of `group` matching `pred`.
pub(crate) fn children_of(memo: &Memo, group: GroupId, pred: impl Fn(&LogicalOp) -> bool) -> Option<Vec<GroupId>> {
    memo.group(group)
        .logical_exprs
        .iter()
        .map(|&e| memo.expr(e))
        .filter(|e| !e.redundant)
        .find(|e| e.op.as_logical().is_some_and(&pred))
        .map(|e| e.children.iter().map(|&c| memo.find(c)).collect())
}
