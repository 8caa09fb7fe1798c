//! # Relational Operators
//!
//! Logical operators describe *what* to compute, physical operators describe *how*. Both
//! are plain payload enums: the children of an operator are never stored inline. In the
//! memo they are group ids held by `MemoExpr`, in a standalone tree they are the child
//! `RelNode`s. The payload together with the child identities is the digest that decides
//! whether two expressions collapse into one memo entry.
//!
//! ## Row Types
//!
//! `Operator::derive_row_type` is the only place where the output shape of an operator is
//! computed. It is a pure function of the payload and the input row types and it rejects
//! malformed payloads (ordinals out of range, non-boolean predicates, union branches of
//! different arity) with `PlannerError::InvalidPlan`.
//!
//! ## Ordinal Conventions
//!
//! - Filter, Project, Sort and Window expressions address their single input.
//! - Join conditions address `left ++ right`, even for SEMI and ANTI joins, which only
//!   output the left fields.
//! - Aggregate output is the group keys (in `group_keys` order) followed by one field per
//!   aggregate call.
//! - Window output is the input fields followed by one field per window call.

use crate::error::{PlannerError, Result};
use crate::expr::{AggCall, Expr, JoinType, ScalarValue, TableRef, WindowCall};
use crate::traits::{Collation, Distribution};
use crate::types::{DataType, Field, RowType};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    /// Reads a base table. `row_type` is the full table row type; `projection`, when set,
    /// keeps only the listed table ordinals.
    Scan {
        table: TableRef,
        row_type: RowType,
        projection: Option<Vec<u32>>,
    },
    /// Literal rows. No rows at all marks a provably empty relation.
    Values {
        row_type: RowType,
        rows: Vec<Vec<ScalarValue>>,
    },
    Filter {
        predicate: Expr,
    },
    Project {
        exprs: Vec<Expr>,
        aliases: Vec<String>,
    },
    Join {
        join_type: JoinType,
        condition: Expr,
    },
    /// For every left row, evaluate the right input with `$cor<id>` bound to that row.
    Correlate {
        join_type: JoinType,
        correlation_id: u32,
        /// Left ordinals the right input reads through `CorrelatedField`.
        required_columns: Vec<u32>,
    },
    /// GROUP BY `group_keys`. When `grouping_sets` is non-empty every set is a subset of
    /// `group_keys` and the aggregate produces one grouping per set.
    Aggregate {
        group_keys: Vec<u32>,
        grouping_sets: Vec<Vec<u32>>,
        aggregates: Vec<AggCall>,
    },
    /// ORDER BY with optional OFFSET and FETCH. An empty collation is a pure LIMIT.
    Sort {
        collation: Collation,
        offset: u64,
        fetch: Option<u64>,
    },
    /// N-ary union. `all: false` removes duplicates.
    Union {
        all: bool,
    },
    Window {
        partition_keys: Vec<u32>,
        order: Collation,
        calls: Vec<WindowCall>,
    },
}

/// How a hash join gets matching rows onto the same execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinStrategy {
    /// Both inputs hash-partitioned on the join keys.
    Partitioned,
    /// Right input replicated to every unit holding left rows.
    BroadcastRight,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalOp {
    SeqScan {
        table: TableRef,
        row_type: RowType,
        projection: Option<Vec<u32>>,
    },
    Values {
        row_type: RowType,
        rows: Vec<Vec<ScalarValue>>,
    },
    Filter {
        predicate: Expr,
    },
    Project {
        exprs: Vec<Expr>,
        aliases: Vec<String>,
    },
    /// Builds a hash table on the right input. `condition` is the full join condition;
    /// `left_keys`/`right_keys` are the equi keys extracted from it.
    HashJoin {
        join_type: JoinType,
        condition: Expr,
        left_keys: Vec<u32>,
        right_keys: Vec<u32>,
        strategy: JoinStrategy,
    },
    /// Merges two inputs sorted on their keys.
    MergeJoin {
        join_type: JoinType,
        condition: Expr,
        left_keys: Vec<u32>,
        right_keys: Vec<u32>,
    },
    NestedLoopJoin {
        join_type: JoinType,
        condition: Expr,
    },
    Correlate {
        join_type: JoinType,
        correlation_id: u32,
        required_columns: Vec<u32>,
    },
    HashAggregate {
        group_keys: Vec<u32>,
        grouping_sets: Vec<Vec<u32>>,
        aggregates: Vec<AggCall>,
    },
    /// Aggregates input sorted on the group keys in one pass.
    StreamAggregate {
        group_keys: Vec<u32>,
        aggregates: Vec<AggCall>,
    },
    Sort {
        collation: Collation,
        offset: u64,
        fetch: Option<u64>,
    },
    Limit {
        offset: u64,
        fetch: Option<u64>,
    },
    UnionAll,
    Window {
        partition_keys: Vec<u32>,
        order: Collation,
        calls: Vec<WindowCall>,
    },
    /// Redistributes rows to match `distribution`.
    Exchange {
        distribution: Distribution,
    },
    /// Gathers sorted partitions onto a single unit, keeping the order.
    MergeExchange {
        collation: Collation,
    },
}

/// Unified operator enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Logical(LogicalOp),
    Physical(PhysicalOp),
}

impl Operator {
    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::Logical(_))
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, Operator::Physical(_))
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Operator::Logical(l) => OpKind::Logical(l.kind()),
            Operator::Physical(p) => OpKind::Physical(p.kind()),
        }
    }

    pub fn as_logical(&self) -> Option<&LogicalOp> {
        match self {
            Operator::Logical(l) => Some(l),
            Operator::Physical(_) => None,
        }
    }

    pub fn as_physical(&self) -> Option<&PhysicalOp> {
        match self {
            Operator::Physical(p) => Some(p),
            Operator::Logical(_) => None,
        }
    }

    /// Short operator name used in error messages, e.g. `Join(INNER)`.
    pub fn name(&self) -> String {
        match self {
            Operator::Logical(LogicalOp::Join { join_type, .. })
            | Operator::Logical(LogicalOp::Correlate { join_type, .. })
            | Operator::Physical(PhysicalOp::HashJoin { join_type, .. })
            | Operator::Physical(PhysicalOp::MergeJoin { join_type, .. })
            | Operator::Physical(PhysicalOp::NestedLoopJoin { join_type, .. }) => {
                format!("{}({join_type})", self.kind().inner_name())
            }
            _ => self.kind().inner_name().to_string(),
        }
    }

    /// Output row type of this operator over `inputs`.
    pub fn derive_row_type(&self, inputs: &[&RowType]) -> Result<RowType> {
        match self {
            Operator::Logical(op) => op.derive_row_type(inputs),
            Operator::Physical(op) => op.derive_row_type(inputs),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Logical(op) => write!(f, "{op}"),
            Operator::Physical(op) => write!(f, "{op}"),
        }
    }
}

/// Kind discriminant for pattern matching (without data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Logical(LogicalOpKind),
    Physical(PhysicalOpKind),
}

impl OpKind {
    fn inner_name(&self) -> &'static str {
        match self {
            OpKind::Logical(k) => k.name(),
            OpKind::Physical(k) => k.name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOpKind {
    Scan,
    Values,
    Filter,
    Project,
    Join,
    Correlate,
    Aggregate,
    Sort,
    Union,
    Window,
}

impl LogicalOpKind {
    pub fn name(&self) -> &'static str {
        match self {
            LogicalOpKind::Scan => "Scan",
            LogicalOpKind::Values => "Values",
            LogicalOpKind::Filter => "Filter",
            LogicalOpKind::Project => "Project",
            LogicalOpKind::Join => "Join",
            LogicalOpKind::Correlate => "Correlate",
            LogicalOpKind::Aggregate => "Aggregate",
            LogicalOpKind::Sort => "Sort",
            LogicalOpKind::Union => "Union",
            LogicalOpKind::Window => "Window",
        }
    }
}

impl LogicalOp {
    pub fn kind(&self) -> LogicalOpKind {
        match self {
            LogicalOp::Scan { .. } => LogicalOpKind::Scan,
            LogicalOp::Values { .. } => LogicalOpKind::Values,
            LogicalOp::Filter { .. } => LogicalOpKind::Filter,
            LogicalOp::Project { .. } => LogicalOpKind::Project,
            LogicalOp::Join { .. } => LogicalOpKind::Join,
            LogicalOp::Correlate { .. } => LogicalOpKind::Correlate,
            LogicalOp::Aggregate { .. } => LogicalOpKind::Aggregate,
            LogicalOp::Sort { .. } => LogicalOpKind::Sort,
            LogicalOp::Union { .. } => LogicalOpKind::Union,
            LogicalOp::Window { .. } => LogicalOpKind::Window,
        }
    }

    /// Values with no rows.
    pub fn is_empty_values(&self) -> bool {
        matches!(self, LogicalOp::Values { rows, .. } if rows.is_empty())
    }

    pub fn derive_row_type(&self, inputs: &[&RowType]) -> Result<RowType> {
        match self {
            LogicalOp::Scan {
                table,
                row_type,
                projection,
            } => {
                expect_inputs(self.kind().name(), inputs, 0)?;
                scan_row_type(table, row_type, projection.as_deref())
            }
            LogicalOp::Values { row_type, rows } => {
                expect_inputs(self.kind().name(), inputs, 0)?;
                values_row_type(row_type, rows)
            }
            LogicalOp::Filter { predicate } => filter_row_type(predicate, single(self, inputs)?),
            LogicalOp::Project { exprs, aliases } => {
                project_row_type(exprs, aliases, single(self, inputs)?)
            }
            LogicalOp::Join {
                join_type,
                condition,
            } => {
                expect_inputs(self.kind().name(), inputs, 2)?;
                join_row_type(*join_type, condition, inputs[0], inputs[1])
            }
            LogicalOp::Correlate {
                join_type,
                required_columns,
                ..
            } => {
                expect_inputs(self.kind().name(), inputs, 2)?;
                correlate_row_type(*join_type, required_columns, inputs[0], inputs[1])
            }
            LogicalOp::Aggregate {
                group_keys,
                grouping_sets,
                aggregates,
            } => aggregate_row_type(group_keys, grouping_sets, aggregates, single(self, inputs)?),
            LogicalOp::Sort { collation, .. } => {
                let input = single(self, inputs)?;
                check_collation(collation, input)?;
                Ok(input.clone())
            }
            LogicalOp::Union { .. } => union_row_type(inputs),
            LogicalOp::Window {
                partition_keys,
                order,
                calls,
            } => window_row_type(partition_keys, order, calls, single(self, inputs)?),
        }
    }

    /// Upper bound on the number of output rows, if one is known from the payload alone.
    pub fn max_rows(&self, inputs: &[Option<f64>]) -> Option<f64> {
        let first = inputs.first().copied().flatten();
        match self {
            LogicalOp::Values { rows, .. } => Some(rows.len() as f64),
            LogicalOp::Aggregate {
                group_keys,
                grouping_sets,
                ..
            } if group_keys.is_empty() && grouping_sets.len() <= 1 => Some(1.0),
            LogicalOp::Aggregate { .. } => first,
            LogicalOp::Filter { .. } | LogicalOp::Project { .. } | LogicalOp::Window { .. } => {
                first
            }
            LogicalOp::Sort { fetch, .. } => match (fetch, first) {
                (Some(n), Some(m)) => Some((*n as f64).min(m)),
                (Some(n), None) => Some(*n as f64),
                (None, m) => m,
            },
            LogicalOp::Join { join_type, .. } | LogicalOp::Correlate { join_type, .. } => {
                let left = first?;
                if join_type.projects_right() {
                    let right = inputs.get(1).copied().flatten()?;
                    Some(left * right.max(1.0))
                } else {
                    Some(left)
                }
            }
            LogicalOp::Union { .. } => inputs.iter().copied().sum::<Option<f64>>(),
            LogicalOp::Scan { .. } => None,
        }
    }
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::Scan {
                table, projection, ..
            } => fmt_scan(f, "Scan", table, projection.as_deref()),
            LogicalOp::Values { rows, .. } => fmt_values(f, rows),
            LogicalOp::Filter { predicate } => write!(f, "Filter(condition=[{predicate}])"),
            LogicalOp::Project { exprs, aliases } => fmt_project(f, "Project", exprs, aliases),
            LogicalOp::Join {
                join_type,
                condition,
            } => write!(f, "Join(type={join_type}, condition=[{condition}])"),
            LogicalOp::Correlate {
                join_type,
                correlation_id,
                required_columns,
            } => write!(
                f,
                "Correlate(type={join_type}, correlation=$cor{correlation_id}, required={required_columns:?})"
            ),
            LogicalOp::Aggregate {
                group_keys,
                grouping_sets,
                aggregates,
            } => fmt_aggregate(f, "Aggregate", group_keys, grouping_sets, aggregates),
            LogicalOp::Sort {
                collation,
                offset,
                fetch,
            } => fmt_sort(f, "Sort", collation, *offset, *fetch),
            LogicalOp::Union { all } => write!(f, "Union(all={all})"),
            LogicalOp::Window {
                partition_keys,
                order,
                calls,
            } => fmt_window(f, partition_keys, order, calls),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalOpKind {
    SeqScan,
    Values,
    Filter,
    Project,
    HashJoin,
    MergeJoin,
    NestedLoopJoin,
    Correlate,
    HashAggregate,
    StreamAggregate,
    Sort,
    Limit,
    UnionAll,
    Window,
    Exchange,
    MergeExchange,
}

impl PhysicalOpKind {
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOpKind::SeqScan => "SeqScan",
            PhysicalOpKind::Values => "Values",
            PhysicalOpKind::Filter => "Filter",
            PhysicalOpKind::Project => "Project",
            PhysicalOpKind::HashJoin => "HashJoin",
            PhysicalOpKind::MergeJoin => "MergeJoin",
            PhysicalOpKind::NestedLoopJoin => "NestedLoopJoin",
            PhysicalOpKind::Correlate => "Correlate",
            PhysicalOpKind::HashAggregate => "HashAggregate",
            PhysicalOpKind::StreamAggregate => "StreamAggregate",
            PhysicalOpKind::Sort => "Sort",
            PhysicalOpKind::Limit => "Limit",
            PhysicalOpKind::UnionAll => "UnionAll",
            PhysicalOpKind::Window => "Window",
            PhysicalOpKind::Exchange => "Exchange",
            PhysicalOpKind::MergeExchange => "MergeExchange",
        }
    }
}

impl PhysicalOp {
    pub fn kind(&self) -> PhysicalOpKind {
        match self {
            PhysicalOp::SeqScan { .. } => PhysicalOpKind::SeqScan,
            PhysicalOp::Values { .. } => PhysicalOpKind::Values,
            PhysicalOp::Filter { .. } => PhysicalOpKind::Filter,
            PhysicalOp::Project { .. } => PhysicalOpKind::Project,
            PhysicalOp::HashJoin { .. } => PhysicalOpKind::HashJoin,
            PhysicalOp::MergeJoin { .. } => PhysicalOpKind::MergeJoin,
            PhysicalOp::NestedLoopJoin { .. } => PhysicalOpKind::NestedLoopJoin,
            PhysicalOp::Correlate { .. } => PhysicalOpKind::Correlate,
            PhysicalOp::HashAggregate { .. } => PhysicalOpKind::HashAggregate,
            PhysicalOp::StreamAggregate { .. } => PhysicalOpKind::StreamAggregate,
            PhysicalOp::Sort { .. } => PhysicalOpKind::Sort,
            PhysicalOp::Limit { .. } => PhysicalOpKind::Limit,
            PhysicalOp::UnionAll => PhysicalOpKind::UnionAll,
            PhysicalOp::Window { .. } => PhysicalOpKind::Window,
            PhysicalOp::Exchange { .. } => PhysicalOpKind::Exchange,
            PhysicalOp::MergeExchange { .. } => PhysicalOpKind::MergeExchange,
        }
    }

    /// Exchange, MergeExchange and Sort can be placed on top of any input to change its
    /// traits without changing its rows.
    pub fn is_enforcer(&self) -> bool {
        matches!(
            self,
            PhysicalOp::Exchange { .. }
                | PhysicalOp::MergeExchange { .. }
                | PhysicalOp::Sort {
                    offset: 0,
                    fetch: None,
                    ..
                }
        )
    }

    pub fn derive_row_type(&self, inputs: &[&RowType]) -> Result<RowType> {
        let name = self.kind().name();
        match self {
            PhysicalOp::SeqScan {
                table,
                row_type,
                projection,
            } => {
                expect_inputs(name, inputs, 0)?;
                scan_row_type(table, row_type, projection.as_deref())
            }
            PhysicalOp::Values { row_type, rows } => {
                expect_inputs(name, inputs, 0)?;
                values_row_type(row_type, rows)
            }
            PhysicalOp::Filter { predicate } => {
                expect_inputs(name, inputs, 1)?;
                filter_row_type(predicate, inputs[0])
            }
            PhysicalOp::Project { exprs, aliases } => {
                expect_inputs(name, inputs, 1)?;
                project_row_type(exprs, aliases, inputs[0])
            }
            PhysicalOp::HashJoin {
                join_type,
                condition,
                left_keys,
                right_keys,
                ..
            }
            | PhysicalOp::MergeJoin {
                join_type,
                condition,
                left_keys,
                right_keys,
            } => {
                expect_inputs(name, inputs, 2)?;
                check_ordinals("join key", left_keys, inputs[0])?;
                check_ordinals("join key", right_keys, inputs[1])?;
                join_row_type(*join_type, condition, inputs[0], inputs[1])
            }
            PhysicalOp::NestedLoopJoin {
                join_type,
                condition,
            } => {
                expect_inputs(name, inputs, 2)?;
                join_row_type(*join_type, condition, inputs[0], inputs[1])
            }
            PhysicalOp::Correlate {
                join_type,
                required_columns,
                ..
            } => {
                expect_inputs(name, inputs, 2)?;
                correlate_row_type(*join_type, required_columns, inputs[0], inputs[1])
            }
            PhysicalOp::HashAggregate {
                group_keys,
                grouping_sets,
                aggregates,
            } => {
                expect_inputs(name, inputs, 1)?;
                aggregate_row_type(group_keys, grouping_sets, aggregates, inputs[0])
            }
            PhysicalOp::StreamAggregate {
                group_keys,
                aggregates,
            } => {
                expect_inputs(name, inputs, 1)?;
                aggregate_row_type(group_keys, &[], aggregates, inputs[0])
            }
            PhysicalOp::Sort { collation, .. } | PhysicalOp::MergeExchange { collation } => {
                expect_inputs(name, inputs, 1)?;
                check_collation(collation, inputs[0])?;
                Ok(inputs[0].clone())
            }
            PhysicalOp::Exchange { distribution } => {
                expect_inputs(name, inputs, 1)?;
                if let Distribution::Hash(keys) | Distribution::Range(keys) = distribution {
                    check_ordinals("distribution key", keys, inputs[0])?;
                }
                Ok(inputs[0].clone())
            }
            PhysicalOp::Limit { .. } => {
                expect_inputs(name, inputs, 1)?;
                Ok(inputs[0].clone())
            }
            PhysicalOp::UnionAll => union_row_type(inputs),
            PhysicalOp::Window {
                partition_keys,
                order,
                calls,
            } => {
                expect_inputs(name, inputs, 1)?;
                window_row_type(partition_keys, order, calls, inputs[0])
            }
        }
    }
}

impl fmt::Display for PhysicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalOp::SeqScan {
                table, projection, ..
            } => fmt_scan(f, "SeqScan", table, projection.as_deref()),
            PhysicalOp::Values { rows, .. } => fmt_values(f, rows),
            PhysicalOp::Filter { predicate } => write!(f, "Filter(condition=[{predicate}])"),
            PhysicalOp::Project { exprs, aliases } => fmt_project(f, "Project", exprs, aliases),
            PhysicalOp::HashJoin {
                join_type,
                condition,
                strategy,
                ..
            } => write!(
                f,
                "HashJoin(type={join_type}, condition=[{condition}], strategy={strategy:?})"
            ),
            PhysicalOp::MergeJoin {
                join_type,
                condition,
                ..
            } => write!(f, "MergeJoin(type={join_type}, condition=[{condition}])"),
            PhysicalOp::NestedLoopJoin {
                join_type,
                condition,
            } => write!(f, "NestedLoopJoin(type={join_type}, condition=[{condition}])"),
            PhysicalOp::Correlate {
                join_type,
                correlation_id,
                required_columns,
            } => write!(
                f,
                "Correlate(type={join_type}, correlation=$cor{correlation_id}, required={required_columns:?})"
            ),
            PhysicalOp::HashAggregate {
                group_keys,
                grouping_sets,
                aggregates,
            } => fmt_aggregate(f, "HashAggregate", group_keys, grouping_sets, aggregates),
            PhysicalOp::StreamAggregate {
                group_keys,
                aggregates,
            } => fmt_aggregate(f, "StreamAggregate", group_keys, &[], aggregates),
            PhysicalOp::Sort {
                collation,
                offset,
                fetch,
            } => fmt_sort(f, "Sort", collation, *offset, *fetch),
            PhysicalOp::Limit { offset, fetch } => {
                fmt_sort(f, "Limit", &Collation::empty(), *offset, *fetch)
            }
            PhysicalOp::UnionAll => write!(f, "UnionAll"),
            PhysicalOp::Window {
                partition_keys,
                order,
                calls,
            } => fmt_window(f, partition_keys, order, calls),
            PhysicalOp::Exchange { distribution } => {
                write!(f, "Exchange(distribution={distribution})")
            }
            PhysicalOp::MergeExchange { collation } => {
                write!(f, "MergeExchange(collation={collation})")
            }
        }
    }
}

/// Grouping sets of an aggregate, with the simple GROUP BY spelled out as one set.
pub fn effective_grouping_sets(group_keys: &[u32], grouping_sets: &[Vec<u32>]) -> Vec<Vec<u32>> {
    if grouping_sets.is_empty() {
        vec![group_keys.to_vec()]
    } else {
        grouping_sets.to_vec()
    }
}

/// Whether the aggregate emits a row even when its input is empty. Every empty grouping
/// set contributes one grand-total row.
pub fn aggregate_has_grand_total(group_keys: &[u32], grouping_sets: &[Vec<u32>]) -> bool {
    effective_grouping_sets(group_keys, grouping_sets)
        .iter()
        .any(|s| s.is_empty())
}

// ============================================================================
// Row type derivation
// ============================================================================

fn expect_inputs(op: &str, inputs: &[&RowType], n: usize) -> Result<()> {
    if inputs.len() != n {
        return Err(PlannerError::invalid_plan(format!(
            "{op} expects {n} inputs, got {}",
            inputs.len()
        )));
    }
    Ok(())
}

fn single<'a>(op: &LogicalOp, inputs: &[&'a RowType]) -> Result<&'a RowType> {
    expect_inputs(op.kind().name(), inputs, 1)?;
    Ok(inputs[0])
}

fn check_ordinals(what: &str, ordinals: &[u32], input: &RowType) -> Result<()> {
    match ordinals.iter().find(|&&o| o as usize >= input.len()) {
        Some(o) => Err(PlannerError::invalid_plan(format!(
            "{what} ${o} out of range for {input}"
        ))),
        None => Ok(()),
    }
}

fn check_collation(collation: &Collation, input: &RowType) -> Result<()> {
    check_ordinals("sort key", &collation.fields(), input)
}

fn check_boolean(what: &str, expr: &Expr, input: &RowType) -> Result<()> {
    match expr.data_type(input)? {
        DataType::Boolean | DataType::Null => Ok(()),
        other => Err(PlannerError::invalid_plan(format!(
            "{what} [{expr}] has type {other}, expected BOOLEAN"
        ))),
    }
}

fn scan_row_type(table: &TableRef, row_type: &RowType, projection: Option<&[u32]>) -> Result<RowType> {
    match projection {
        None => Ok(row_type.clone()),
        Some(p) => row_type.project(p).ok_or_else(|| {
            PlannerError::invalid_plan(format!("projection {p:?} out of range for table {table}"))
        }),
    }
}

fn values_row_type(row_type: &RowType, rows: &[Vec<ScalarValue>]) -> Result<RowType> {
    if let Some(bad) = rows.iter().find(|r| r.len() != row_type.len()) {
        return Err(PlannerError::invalid_plan(format!(
            "values row has {} fields, expected {}",
            bad.len(),
            row_type.len()
        )));
    }
    Ok(row_type.clone())
}

fn filter_row_type(predicate: &Expr, input: &RowType) -> Result<RowType> {
    check_boolean("filter predicate", predicate, input)?;
    Ok(input.clone())
}

fn project_row_type(exprs: &[Expr], aliases: &[String], input: &RowType) -> Result<RowType> {
    if exprs.len() != aliases.len() {
        return Err(PlannerError::invalid_plan(format!(
            "project has {} expressions but {} aliases",
            exprs.len(),
            aliases.len()
        )));
    }
    exprs
        .iter()
        .zip(aliases)
        .map(|(e, name)| e.to_field(name, input))
        .collect::<Result<Vec<_>>>()
        .map(RowType::new)
}

fn join_row_type(join_type: JoinType, condition: &Expr, left: &RowType, right: &RowType) -> Result<RowType> {
    let combined = RowType::join(left, right, JoinType::Inner);
    check_boolean("join condition", condition, &combined)?;
    Ok(RowType::join(left, right, join_type))
}

fn correlate_row_type(
    join_type: JoinType,
    required_columns: &[u32],
    left: &RowType,
    right: &RowType,
) -> Result<RowType> {
    if !matches!(
        join_type,
        JoinType::Inner | JoinType::Left | JoinType::Semi | JoinType::Anti
    ) {
        return Err(PlannerError::invalid_plan(format!(
            "correlate does not support {join_type} joins"
        )));
    }
    check_ordinals("correlated column", required_columns, left)?;
    Ok(RowType::join(left, right, join_type))
}

fn aggregate_row_type(
    group_keys: &[u32],
    grouping_sets: &[Vec<u32>],
    aggregates: &[AggCall],
    input: &RowType,
) -> Result<RowType> {
    check_ordinals("group key", group_keys, input)?;
    if let Some(bad) = grouping_sets
        .iter()
        .find(|set| set.iter().any(|k| !group_keys.contains(k)))
    {
        return Err(PlannerError::invalid_plan(format!(
            "grouping set {bad:?} is not a subset of group keys {group_keys:?}"
        )));
    }
    let sets = effective_grouping_sets(group_keys, grouping_sets);
    let mut fields = Vec::with_capacity(group_keys.len() + aggregates.len());
    for &k in group_keys {
        let field = &input.fields[k as usize];
        let rolled_up = sets.iter().any(|s| !s.contains(&k));
        fields.push(field.with_nullable(field.nullable || rolled_up));
    }
    for call in aggregates {
        if let Some(filter) = call.filter {
            let t = input.field(filter as usize).map(|f| &f.data_type);
            if t.is_some_and(|t| *t != DataType::Boolean) {
                return Err(PlannerError::invalid_plan(format!(
                    "aggregate filter ${filter} of {} is not BOOLEAN",
                    call.name
                )));
            }
        }
        fields.push(call.result_field(input)?);
    }
    Ok(RowType::new(fields))
}

fn union_row_type(inputs: &[&RowType]) -> Result<RowType> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(PlannerError::invalid_plan("union requires at least one input"));
    };
    let mut fields: Vec<Field> = first.fields.clone();
    for other in rest {
        if other.len() != fields.len() {
            return Err(PlannerError::invalid_plan(format!(
                "union inputs differ in arity: {first} vs {other}"
            )));
        }
        for (acc, f) in fields.iter_mut().zip(&other.fields) {
            if acc.data_type != f.data_type {
                return Err(PlannerError::invalid_plan(format!(
                    "union inputs differ in type of field {}: {} vs {}",
                    acc.name, acc.data_type, f.data_type
                )));
            }
            acc.nullable |= f.nullable;
        }
    }
    Ok(RowType::new(fields))
}

fn window_row_type(
    partition_keys: &[u32],
    order: &Collation,
    calls: &[WindowCall],
    input: &RowType,
) -> Result<RowType> {
    check_ordinals("partition key", partition_keys, input)?;
    check_collation(order, input)?;
    let mut fields = input.fields.clone();
    for call in calls {
        fields.push(call.result_field(input)?);
    }
    Ok(RowType::new(fields))
}

// ============================================================================
// Display helpers
// ============================================================================

fn fmt_scan(f: &mut fmt::Formatter<'_>, name: &str, table: &TableRef, projection: Option<&[u32]>) -> fmt::Result {
    match projection {
        Some(p) => write!(f, "{name}(table=[{table}], projection={p:?})"),
        None => write!(f, "{name}(table=[{table}])"),
    }
}

fn fmt_values(f: &mut fmt::Formatter<'_>, rows: &[Vec<ScalarValue>]) -> fmt::Result {
    if rows.is_empty() {
        return write!(f, "Values(empty)");
    }
    write!(f, "Values(rows=[")?;
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{{")?;
        for (j, v) in row.iter().enumerate() {
            if j > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "}}")?;
    }
    write!(f, "])")
}

fn fmt_project(f: &mut fmt::Formatter<'_>, name: &str, exprs: &[Expr], aliases: &[String]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, (e, a)) in exprs.iter().zip(aliases).enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        let rendered = e.to_string();
        if &rendered == a {
            write!(f, "{rendered}")?;
        } else {
            write!(f, "{a}=[{rendered}]")?;
        }
    }
    write!(f, ")")
}

fn fmt_aggregate(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    group_keys: &[u32],
    grouping_sets: &[Vec<u32>],
    aggregates: &[AggCall],
) -> fmt::Result {
    write!(f, "{name}(group={group_keys:?}")?;
    if !grouping_sets.is_empty() {
        write!(f, ", groups={grouping_sets:?}")?;
    }
    for call in aggregates {
        write!(f, ", {call}")?;
    }
    write!(f, ")")
}

fn fmt_sort(f: &mut fmt::Formatter<'_>, name: &str, collation: &Collation, offset: u64, fetch: Option<u64>) -> fmt::Result {
    write!(f, "{name}(")?;
    let mut parts = Vec::new();
    if !collation.is_empty() {
        parts.push(format!("collation={collation}"));
    }
    if offset > 0 {
        parts.push(format!("offset={offset}"));
    }
    if let Some(n) = fetch {
        parts.push(format!("fetch={n}"));
    }
    write!(f, "{})", parts.join(", "))
}

fn fmt_window(f: &mut fmt::Formatter<'_>, partition_keys: &[u32], order: &Collation, calls: &[WindowCall]) -> fmt::Result {
    write!(f, "Window(partition={partition_keys:?}, order={order}")?;
    for call in calls {
        write!(f, ", {call}")?;
    }
    write!(f, ")")
}
