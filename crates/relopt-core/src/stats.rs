//! # Statistics for Cost-Based Optimization
//!
//! This module defines the statistics structures and derivation formulas used by the
//! cost model to estimate the expense of query plans. Statistics are derived bottom-up,
//! once per memo group: every expression in a group produces the same rows, so any one of
//! them can stand in for the group.
//!
//! ## Statistics Hierarchy
//!
//! - **Relation-level**: row count and total size in bytes.
//! - **Column-level**, keyed by output ordinal: number of distinct values (NDV), null
//!   fraction, min/max values and average value size.
//!
//! ## Derivation Formulas
//!
//! - **Filter**: output_rows = input_rows * selectivity. Column NDVs scale with the
//!   row reduction ratio.
//! - **Join**: output_rows = |left| * |right| / max(NDV_left_key, NDV_right_key) per key
//!   pair, adjusted for outer joins (never fewer rows than the preserved side) and for
//!   SEMI/ANTI joins (never more rows than the left side).
//! - **Aggregate**: output_rows = product of group key NDVs, capped by input rows, times
//!   the number of grouping sets. A grand total produces exactly one row.
//! - **Union**: sum of the inputs. **Limit**: capped by the fetch count.
//!
//! ## Selectivity Estimation
//!
//! - **Equality**: 1 / NDV (uniform distribution assumption).
//! - **Range**: fixed 1/3 heuristic.
//! - **IS NULL**: the column's null fraction.
//! - **Default**: 0.1 when no better estimate is available.

use crate::expr::{BinaryOp, Expr, JoinType, ScalarValue, UnaryOp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default filter selectivity when we can't determine it.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Selectivity of a range comparison such as `sal > 1000`.
pub const RANGE_SELECTIVITY: f64 = 0.33;

/// Row width assumed when nothing better is known.
pub const DEFAULT_ROW_SIZE: f64 = 100.0;

/// Statistics for a relation (or group in the memo).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub row_count: f64,
    pub total_size_bytes: f64,
    /// Per-column statistics keyed by output ordinal.
    pub column_stats: BTreeMap<u32, ColumnStatistics>,
}

impl Statistics {
    pub fn new(row_count: f64, total_size_bytes: f64) -> Self {
        Self {
            row_count,
            total_size_bytes,
            column_stats: BTreeMap::new(),
        }
    }

    /// Placeholder used when a table has no statistics in the catalog.
    pub fn unknown() -> Self {
        Self::new(1000.0, 1000.0 * DEFAULT_ROW_SIZE)
    }

    pub fn with_column(mut self, ordinal: u32, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(ordinal, stats);
        self
    }

    pub fn avg_row_size(&self) -> f64 {
        if self.row_count > 0.0 {
            self.total_size_bytes / self.row_count
        } else {
            DEFAULT_ROW_SIZE
        }
    }

    pub fn ndv(&self, ordinal: u32) -> f64 {
        self.column_stats
            .get(&ordinal)
            .map(|c| c.distinct_count)
            .unwrap_or(self.row_count)
            .max(1.0)
    }

    /// Same rows, column statistics renumbered through `mapping` (output ordinal →
    /// input ordinal).
    pub fn remap_columns(&self, mapping: &[Option<u32>]) -> Statistics {
        let column_stats = mapping
            .iter()
            .enumerate()
            .filter_map(|(out, input)| {
                input
                    .and_then(|i| self.column_stats.get(&i))
                    .map(|cs| (out as u32, cs.clone()))
            })
            .collect();
        Statistics {
            row_count: self.row_count,
            total_size_bytes: self.total_size_bytes,
            column_stats,
        }
    }
}

/// Per-column statistics used for selectivity estimation and cost modeling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV). Used for equality selectivity: sel = 1/NDV.
    pub distinct_count: f64,
    /// Fraction of rows that are NULL [0.0, 1.0].
    pub null_fraction: f64,
    pub min_value: Option<ScalarValue>,
    pub max_value: Option<ScalarValue>,
    /// Average size of a single value in bytes.
    pub avg_size: f64,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
            min_value: None,
            max_value: None,
            avg_size: 8.0,
        }
    }
}

/// Derive statistics for filter output.
///
/// Output rows = input rows * selectivity, floored at 1. Column NDVs are scaled by the
/// same ratio and clamped to `[1, row_count]`.
pub fn derive_filter_stats(input: &Statistics, selectivity: f64) -> Statistics {
    let row_count = (input.row_count * selectivity).max(1.0);
    let ratio = if input.row_count > 0.0 {
        row_count / input.row_count
    } else {
        1.0
    };
    let column_stats = input
        .column_stats
        .iter()
        .map(|(&i, cs)| {
            let mut cs = cs.clone();
            cs.distinct_count = (cs.distinct_count * ratio).max(1.0).min(row_count);
            (i, cs)
        })
        .collect();
    Statistics {
        row_count,
        total_size_bytes: input.total_size_bytes * ratio,
        column_stats,
    }
}

/// Derive statistics for join output.
///
/// Uses the standard cardinality formula for equi-joins, multiplying per-key
/// selectivities (independence assumption):
///
/// ```text
/// |A JOIN B| = |A| * |B| / max(NDV(A.key), NDV(B.key))
/// ```
///
/// A join without keys is estimated as a filtered cartesian product.
pub fn derive_join_stats(
    left: &Statistics,
    right: &Statistics,
    left_field_count: usize,
    left_keys: &[u32],
    right_keys: &[u32],
    join_type: JoinType,
    has_remainder: bool,
) -> Statistics {
    let mut selectivity: f64 = left_keys
        .iter()
        .zip(right_keys)
        .map(|(&l, &r)| 1.0 / left.ndv(l).max(right.ndv(r)))
        .product();
    if has_remainder {
        selectivity *= DEFAULT_FILTER_SELECTIVITY;
    }
    let inner_rows = (left.row_count * right.row_count * selectivity).max(1.0);
    let row_count = match join_type {
        JoinType::Inner | JoinType::Cross => inner_rows,
        JoinType::Left => inner_rows.max(left.row_count),
        JoinType::Right => inner_rows.max(right.row_count),
        JoinType::Full => inner_rows.max(left.row_count + right.row_count),
        JoinType::Semi => inner_rows.min(left.row_count).max(1.0),
        JoinType::Anti => (left.row_count - inner_rows.min(left.row_count)).max(1.0),
    };

    let mut column_stats = BTreeMap::new();
    for (&i, cs) in &left.column_stats {
        let mut cs = cs.clone();
        cs.distinct_count = cs.distinct_count.min(row_count);
        column_stats.insert(i, cs);
    }
    let row_size = if join_type.projects_right() {
        let offset = left_field_count as u32;
        for (&i, cs) in &right.column_stats {
            let mut cs = cs.clone();
            cs.distinct_count = cs.distinct_count.min(row_count);
            column_stats.insert(i + offset, cs);
        }
        left.avg_row_size() + right.avg_row_size()
    } else {
        left.avg_row_size()
    };

    Statistics {
        row_count,
        total_size_bytes: row_count * row_size,
        column_stats,
    }
}

/// Derive statistics for aggregate output.
///
/// The number of groups per grouping set is the product of the group key NDVs, capped by
/// the input row count. An empty grouping set contributes exactly one row.
pub fn derive_aggregate_stats(input: &Statistics, grouping_sets: &[Vec<u32>], num_calls: usize) -> Statistics {
    let row_count: f64 = grouping_sets
        .iter()
        .map(|set| {
            if set.is_empty() {
                1.0
            } else {
                set.iter()
                    .map(|&k| input.ndv(k))
                    .product::<f64>()
                    .min(input.row_count)
                    .max(1.0)
            }
        })
        .sum::<f64>()
        .max(1.0);
    let width = grouping_sets.iter().map(Vec::len).max().unwrap_or(0) + num_calls;
    Statistics {
        row_count,
        total_size_bytes: row_count * (width.max(1) as f64) * 8.0,
        column_stats: BTreeMap::new(),
    }
}

pub fn derive_union_stats(inputs: &[&Statistics]) -> Statistics {
    Statistics {
        row_count: inputs.iter().map(|s| s.row_count).sum(),
        total_size_bytes: inputs.iter().map(|s| s.total_size_bytes).sum(),
        column_stats: BTreeMap::new(),
    }
}

pub fn derive_limit_stats(input: &Statistics, offset: u64, fetch: Option<u64>) -> Statistics {
    let after_offset = (input.row_count - offset as f64).max(0.0);
    let row_count = match fetch {
        Some(n) => after_offset.min(n as f64),
        None => after_offset,
    };
    Statistics {
        row_count,
        total_size_bytes: row_count * input.avg_row_size(),
        column_stats: input.column_stats.clone(),
    }
}

/// Estimate the fraction of input rows that satisfy `expr`.
pub fn estimate_selectivity(expr: &Expr, stats: &Statistics) -> f64 {
    match expr {
        Expr::Literal(ScalarValue::Bool(true)) => 1.0,
        Expr::Literal(ScalarValue::Bool(false)) | Expr::Literal(ScalarValue::Null) => 0.0,
        Expr::BinaryOp {
            op: BinaryOp::Eq | BinaryOp::IsNotDistinctFrom,
            left,
            right,
        } => match (left.as_column(), right.as_column()) {
            (Some(c), None) | (None, Some(c)) => equality_selectivity(stats, c.index),
            (Some(a), Some(b)) => 1.0 / stats.ndv(a.index).max(stats.ndv(b.index)),
            (None, None) => DEFAULT_FILTER_SELECTIVITY,
        },
        Expr::BinaryOp {
            op: BinaryOp::NotEq,
            ..
        } => 1.0 - DEFAULT_FILTER_SELECTIVITY,
        Expr::BinaryOp {
            op: BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq,
            ..
        } => RANGE_SELECTIVITY,
        Expr::UnaryOp {
            op: UnaryOp::IsNull,
            operand,
        } => operand
            .as_column()
            .and_then(|c| stats.column_stats.get(&c.index))
            .map(|cs| cs.null_fraction)
            .unwrap_or(DEFAULT_FILTER_SELECTIVITY),
        Expr::UnaryOp {
            op: UnaryOp::IsNotNull,
            operand,
        } => {
            1.0 - estimate_selectivity(&Expr::is_null(operand.as_ref().clone()), stats)
        }
        Expr::UnaryOp {
            op: UnaryOp::Not,
            operand,
        } => 1.0 - estimate_selectivity(operand, stats),
        // Independence assumption: P(A AND B) = P(A) * P(B).
        Expr::And(conjuncts) => conjuncts
            .iter()
            .map(|c| estimate_selectivity(c, stats))
            .product(),
        // Inclusion-exclusion: P(A OR B) = 1 - (1 - P(A)) * (1 - P(B)).
        Expr::Or(disjuncts) => {
            1.0 - disjuncts
                .iter()
                .map(|d| 1.0 - estimate_selectivity(d, stats))
                .product::<f64>()
        }
        _ => DEFAULT_FILTER_SELECTIVITY,
    }
}

/// Estimate selectivity for an equality predicate: `sel = 1 / NDV`.
pub fn equality_selectivity(stats: &Statistics, ordinal: u32) -> f64 {
    stats
        .column_stats
        .get(&ordinal)
        .map(|cs| 1.0 / cs.distinct_count.max(1.0))
        .unwrap_or(DEFAULT_FILTER_SELECTIVITY)
}
