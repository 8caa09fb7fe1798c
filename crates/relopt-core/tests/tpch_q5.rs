//! End-to-end test: TPC-H Q5 planning.
//!
//! Builds the logical tree for TPC-H Q5 as a naive left-deep join chain with the whole
//! WHERE clause on top, attaches SF=1 statistics, and runs the planner with the default
//! rule registry.
//!
//! ```sql
//! SELECT n_name, SUM(l_extendedprice) AS revenue
//! FROM customer, orders, lineitem, supplier, nation, region
//! WHERE c_custkey = o_custkey AND l_orderkey = o_orderkey
//!   AND l_suppkey = s_suppkey AND c_nationkey = s_nationkey
//!   AND s_nationkey = n_nationkey AND n_regionkey = r_regionkey
//!   AND r_name = 'ASIA'
//!   AND o_orderdate >= DATE '1994-01-01' AND o_orderdate < DATE '1995-01-01'
//! GROUP BY n_name
//! ORDER BY revenue DESC
//! ```

use relopt_core::catalog::InMemoryCatalog;
use relopt_core::config::PlannerConfig;
use relopt_core::expr::{AggCall, AggFunc, BinaryOp, Expr, JoinType, ScalarValue, TableRef};
use relopt_core::memo::{GroupId, Memo};
use relopt_core::operator::{LogicalOp, Operator, PhysicalOp};
use relopt_core::stats::{ColumnStatistics, Statistics};
use relopt_core::traits::{Collation, FieldCollation};
use relopt_core::types::{DataType, Field, RowType};
use relopt_core::{CascadesSearch, RelNode, TraitSet};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// 1994-01-01 as days since the Unix epoch.
const DATE_1994_01_01: i32 = 8766;
/// 1995-01-01 as days since the Unix epoch.
const DATE_1995_01_01: i32 = 9131;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Schema and statistics (SF=1)
// ---------------------------------------------------------------------------

struct Table {
    name: &'static str,
    columns: Vec<(&'static str, DataType, f64)>,
    rows: f64,
}

fn tpch_tables() -> Vec<Table> {
    use DataType::*;
    vec![
        Table {
            name: "customer",
            columns: vec![("c_custkey", Int64, 150_000.0), ("c_nationkey", Int64, 25.0)],
            rows: 150_000.0,
        },
        Table {
            name: "orders",
            columns: vec![
                ("o_orderkey", Int64, 1_500_000.0),
                ("o_custkey", Int64, 100_000.0),
                ("o_orderdate", Date, 2_406.0),
            ],
            rows: 1_500_000.0,
        },
        Table {
            name: "lineitem",
            columns: vec![
                ("l_orderkey", Int64, 1_500_000.0),
                ("l_suppkey", Int64, 10_000.0),
                ("l_extendedprice", Float64, 933_900.0),
            ],
            rows: 6_001_215.0,
        },
        Table {
            name: "supplier",
            columns: vec![("s_suppkey", Int64, 10_000.0), ("s_nationkey", Int64, 25.0)],
            rows: 10_000.0,
        },
        Table {
            name: "nation",
            columns: vec![
                ("n_nationkey", Int64, 25.0),
                ("n_regionkey", Int64, 5.0),
                ("n_name", Utf8, 25.0),
            ],
            rows: 25.0,
        },
        Table {
            name: "region",
            columns: vec![("r_regionkey", Int64, 5.0), ("r_name", Utf8, 5.0)],
            rows: 5.0,
        },
    ]
}

fn table_ref(name: &str) -> TableRef {
    TableRef::new("tpch", name)
}

fn row_type(table: &Table) -> RowType {
    RowType::new(
        table
            .columns
            .iter()
            .map(|(name, data_type, _)| Field::new(*name, data_type.clone(), false))
            .collect(),
    )
}

fn build_tpch_catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    for table in tpch_tables() {
        let row_size = 8.0 * table.columns.len() as f64;
        let stats = table.columns.iter().enumerate().fold(
            Statistics::new(table.rows, table.rows * row_size),
            |stats, (i, (_, _, ndv))| stats.with_column(i as u32, ColumnStatistics::new(*ndv, 0.0)),
        );
        catalog.add_table(&table_ref(table.name), row_type(&table), stats);
    }
    catalog
}

fn scan(name: &str) -> RelNode {
    let tables = tpch_tables();
    let table = tables.iter().find(|t| t.name == name).unwrap();
    RelNode::scan(table_ref(name), row_type(table)).unwrap()
}

fn eq_cols(left: (u32, &str), right: (u32, &str)) -> Expr {
    Expr::eq(Expr::col(left.0, left.1), Expr::col(right.0, right.1))
}

fn inner_join(left: RelNode, right: RelNode, condition: Expr) -> RelNode {
    RelNode::join(left, right, JoinType::Inner, condition).unwrap()
}

// ---------------------------------------------------------------------------
// Q5
// ---------------------------------------------------------------------------

// Field ordinals in the full join row:
//   customer  0..2   c_custkey 0, c_nationkey 1
//   orders    2..5   o_orderkey 2, o_custkey 3, o_orderdate 4
//   lineitem  5..8   l_orderkey 5, l_suppkey 6, l_extendedprice 7
//   supplier  8..10  s_suppkey 8, s_nationkey 9
//   nation   10..13  n_nationkey 10, n_regionkey 11, n_name 12
//   region   13..15  r_regionkey 13, r_name 14

fn r_name_is_asia(index: u32) -> Expr {
    Expr::eq(
        Expr::col(index, "r_name"),
        Expr::lit(ScalarValue::Utf8("ASIA".into())),
    )
}

/// The join chain in FROM-clause order with every predicate applied above it.
fn build_naive_q5() -> RelNode {
    let joined = inner_join(scan("customer"), scan("orders"), eq_cols((0, "c_custkey"), (3, "o_custkey")));
    let joined = inner_join(joined, scan("lineitem"), eq_cols((2, "o_orderkey"), (5, "l_orderkey")));
    let joined = inner_join(
        joined,
        scan("supplier"),
        Expr::and_all([
            eq_cols((6, "l_suppkey"), (8, "s_suppkey")),
            eq_cols((1, "c_nationkey"), (9, "s_nationkey")),
        ]),
    );
    let joined = inner_join(joined, scan("nation"), eq_cols((9, "s_nationkey"), (10, "n_nationkey")));
    let joined = inner_join(joined, scan("region"), eq_cols((11, "n_regionkey"), (13, "r_regionkey")));

    let order_date = || Expr::col(4, "o_orderdate");
    let predicate = Expr::and_all([
        r_name_is_asia(14),
        Expr::binary(
            BinaryOp::GtEq,
            order_date(),
            Expr::lit(ScalarValue::Date(DATE_1994_01_01)),
        ),
        Expr::lt(order_date(), Expr::lit(ScalarValue::Date(DATE_1995_01_01))),
    ]);
    let filtered = RelNode::filter(joined, predicate).unwrap();

    let revenue_input = RelNode::project_fields(filtered, &[12, 7]).unwrap();
    let aggregated = RelNode::aggregate(
        revenue_input,
        vec![0],
        vec![AggCall::new(AggFunc::Sum, vec![1], "revenue")],
    )
    .unwrap();
    RelNode::sort(aggregated, Collation(vec![FieldCollation::desc(1)]), 0, None).unwrap()
}

fn session(config: PlannerConfig) -> CascadesSearch {
    CascadesSearch::with_default_cost_model(
        Arc::new(relopt_rules::default_rule_registry()),
        Arc::new(build_tpch_catalog()),
        config,
    )
}

fn count_ops(node: &RelNode, pred: fn(&PhysicalOp) -> bool) -> usize {
    node.fold(&mut |n: &RelNode, children: Vec<usize>| {
        let here = matches!(n.op(), Operator::Physical(op) if pred(op));
        children.into_iter().sum::<usize>() + usize::from(here)
    })
}

fn is_join(op: &PhysicalOp) -> bool {
    matches!(
        op,
        PhysicalOp::HashJoin { .. } | PhysicalOp::MergeJoin { .. } | PhysicalOp::NestedLoopJoin { .. }
    )
}

fn is_scan(op: &PhysicalOp) -> bool {
    matches!(op, PhysicalOp::SeqScan { .. })
}

/// Whether some live filter in the memo reads `group` directly and has a conjunct
/// accepted by `wanted`.
fn has_filter_over(memo: &Memo, group: GroupId, wanted: impl Fn(&Expr) -> bool) -> bool {
    memo.group_ids().into_iter().any(|g| {
        memo.group(g).logical_exprs.iter().any(|&e| {
            let expr = memo.expr(e);
            !expr.redundant
                && expr.children.iter().map(|&c| memo.find(c)).eq([memo.find(group)])
                && matches!(
                    &expr.op,
                    Operator::Logical(LogicalOp::Filter { predicate }) if predicate.conjuncts().into_iter().any(&wanted)
                )
        })
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn test_tpch_q5_plans_every_join() {
    init_tracing();
    let mut search = session(PlannerConfig::default());
    let plan = search.optimize(&build_naive_q5(), &TraitSet::root()).unwrap();

    println!("Q5 plan (cost {:.1}, {} iterations):", plan.cost.total(), plan.iterations);
    println!("{}", plan.explain());

    assert!(!plan.cost.is_infinite());
    assert_eq!(count_ops(&plan.root, is_join), 5);
    assert_eq!(count_ops(&plan.root, is_scan), 6);
    assert!(count_ops(&plan.root, |op| matches!(op, PhysicalOp::Sort { .. })) >= 1);
}

#[test]
fn test_tpch_q5_predicates_reach_their_tables() {
    init_tracing();
    let mut search = session(PlannerConfig::default());
    let tree = build_naive_q5();
    let initial_groups = {
        let mut memo = Memo::new();
        memo.register(&tree).unwrap();
        memo.num_groups()
    };
    search.optimize(&tree, &TraitSet::root()).unwrap();

    let region = search.memo.register(&scan("region")).unwrap();
    assert!(
        has_filter_over(&search.memo, region, |e| *e == r_name_is_asia(1)),
        "r_name = 'ASIA' was not pushed onto region"
    );

    // o_orderdate is field 2 of orders.
    let orders = search.memo.register(&scan("orders")).unwrap();
    assert!(
        has_filter_over(&search.memo, orders, |e| e.input_refs().into_iter().eq([2])),
        "order date range was not pushed onto orders"
    );

    println!("memo groups: {} -> {}", initial_groups, search.memo.num_groups());
    assert!(search.memo.num_groups() > initial_groups);
}

#[test]
fn test_tpch_q5_commuted_joins_never_cost_more() {
    init_tracing();
    let tree = build_naive_q5();
    let fixed_sides = PlannerConfig {
        disabled_rules: vec!["JoinCommutativity".into()],
        ..PlannerConfig::default()
    };
    let fixed = session(fixed_sides).optimize(&tree, &TraitSet::root()).unwrap();
    let explored = session(PlannerConfig::default()).optimize(&tree, &TraitSet::root()).unwrap();

    println!("fixed sides: {:.1}", fixed.cost.total());
    println!("{}", fixed.explain());
    println!("explored: {:.1}", explored.cost.total());
    println!("{}", explored.explain());

    assert!(explored.cost.total() <= fixed.cost.total() * (1.0 + 1e-9));
}

#[test]
fn test_simple_two_way_join() {
    init_tracing();
    // nation JOIN region ON n_regionkey = r_regionkey
    let tree = inner_join(scan("nation"), scan("region"), eq_cols((1, "n_regionkey"), (3, "r_regionkey")));
    let plan = session(PlannerConfig::default()).optimize(&tree, &TraitSet::root()).unwrap();

    println!("{}", plan.explain());
    assert!(!plan.cost.is_infinite());
    assert_eq!(count_ops(&plan.root, is_join), 1);
    assert_eq!(count_ops(&plan.root, is_scan), 2);
}
