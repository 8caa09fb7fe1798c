//! # Cost Model
//!
//! This module defines the cost abstraction and a default cost model for the optimizer.
//!
//! ## Multi-Dimensional Cost
//!
//! Query execution cost is not a single number: it depends on rows produced, CPU time,
//! I/O, network transfer and memory. `Cost` keeps every dimension and collapses them into
//! one comparable value only when two plans are compared:
//!
//! ```text
//! total = cpu + io + 10 * network + memory
//! ```
//!
//! The network weight reflects the usual assumption that data shuffling dominates cost in
//! distributed execution.
//!
//! ## Infinity
//!
//! `Cost::infinite()` marks a plan that must never be chosen: a broadcast of a huge input,
//! a cartesian product the session does not allow, or a subset that could not be planned
//! at all. It compares greater than every finite cost and absorbs addition, so an infinite
//! child makes its parent infinite.
//!
//! ## Cost Accumulation
//!
//! Costs are additive. A cost model only estimates the *local* cost of one operator;
//! `CostModel::compute_cost` adds the best costs of the children.

use crate::catalog::Catalog;
use crate::config::PlannerConfig;
use crate::operator::{JoinStrategy, PhysicalOp};
use crate::stats::Statistics;
use crate::traits::Distribution;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub const CPU_WEIGHT: f64 = 1.0;
pub const IO_WEIGHT: f64 = 1.0;
pub const NETWORK_WEIGHT: f64 = 10.0;
pub const MEMORY_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Cost {
    pub rows: f64,
    pub cpu: f64,
    pub io: f64,
    pub network: f64,
    pub memory: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn new(rows: f64, cpu: f64, io: f64, network: f64, memory: f64) -> Self {
        Self {
            rows,
            cpu,
            io,
            network,
            memory,
        }
    }

    pub fn cpu(rows: f64, cpu: f64) -> Self {
        Self {
            rows,
            cpu,
            ..Self::zero()
        }
    }

    pub fn infinite() -> Self {
        Self {
            rows: f64::INFINITY,
            cpu: f64::INFINITY,
            io: f64::INFINITY,
            network: f64::INFINITY,
            memory: f64::INFINITY,
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.total().is_infinite()
    }

    /// Weighted sum used for comparison.
    pub fn total(&self) -> f64 {
        CPU_WEIGHT * self.cpu
            + IO_WEIGHT * self.io
            + NETWORK_WEIGHT * self.network
            + MEMORY_WEIGHT * self.memory
    }

    pub fn add(&self, other: &Cost) -> Cost {
        if self.is_infinite() || other.is_infinite() {
            return Cost::infinite();
        }
        Cost {
            rows: self.rows + other.rows,
            cpu: self.cpu + other.cpu,
            io: self.io + other.io,
            network: self.network + other.network,
            memory: self.memory + other.memory,
        }
    }

    pub fn multiply_by(&self, factor: f64) -> Cost {
        if self.is_infinite() {
            return Cost::infinite();
        }
        Cost {
            rows: self.rows * factor,
            cpu: self.cpu * factor,
            io: self.io * factor,
            network: self.network * factor,
            memory: self.memory * factor,
        }
    }
}

impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cost {}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total().total_cmp(&other.total())
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            return write!(f, "{{inf}}");
        }
        write!(
            f,
            "{{{:.1} rows, {:.1} cpu, {:.1} io, {:.1} network, {:.1} memory}}",
            self.rows, self.cpu, self.io, self.network, self.memory
        )
    }
}

/// Trait for pluggable cost models.
pub trait CostModel: Send + Sync {
    /// Cost of running `op` alone, given the statistics of its inputs and its output.
    fn local_cost(&self, op: &PhysicalOp, inputs: &[&Statistics], output: &Statistics) -> Cost;

    /// Local cost plus the best costs of the children.
    fn compute_cost(
        &self,
        op: &PhysicalOp,
        inputs: &[&Statistics],
        output: &Statistics,
        children_costs: &[Cost],
    ) -> Cost {
        children_costs
            .iter()
            .fold(self.local_cost(op, inputs, output), |acc, c| acc.add(c))
    }
}

/// Default cost model driven by the planner configuration.
///
/// - Hash operators pay CPU for building and probing plus memory for the hash table.
/// - Sorts pay `n log n` CPU and buffer their input in memory.
/// - Exchanges pay network for every byte they move; a broadcast moves the input once
///   per execution unit.
/// - A broadcast hash join whose right input exceeds `broadcast_threshold` rows is
///   infinitely expensive.
/// - A nested-loop join is infinitely expensive for a non-scalar right input while
///   `nested_loop_scalar_only` is set.
pub struct DefaultCostModel {
    pub broadcast_threshold: f64,
    pub nested_loop_scalar_only: bool,
    pub parallelism: f64,
    catalog: Option<Arc<dyn Catalog>>,
}

impl Default for DefaultCostModel {
    fn default() -> Self {
        Self::from_config(&PlannerConfig::default())
    }
}

impl DefaultCostModel {
    pub fn from_config(config: &PlannerConfig) -> Self {
        Self {
            broadcast_threshold: config.broadcast_threshold,
            nested_loop_scalar_only: config.nested_loop_scalar_only,
            parallelism: f64::from(config.parallelism.max(1)),
            catalog: None,
        }
    }

    /// Let the catalog override scan costs.
    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    fn sort_cpu(rows: f64, fetch: Option<u64>) -> f64 {
        let kept = fetch.map_or(rows, |n| (n as f64).min(rows));
        if rows > 1.0 {
            rows * kept.max(2.0).log2()
        } else {
            1.0
        }
    }
}

impl CostModel for DefaultCostModel {
    fn local_cost(&self, op: &PhysicalOp, inputs: &[&Statistics], output: &Statistics) -> Cost {
        let out_rows = output.row_count;
        let input_rows = |i: usize| inputs.get(i).map_or(out_rows, |s| s.row_count);
        let input_bytes = |i: usize| {
            inputs
                .get(i)
                .map_or(output.total_size_bytes, |s| s.total_size_bytes)
        };

        match op {
            PhysicalOp::SeqScan { table, .. } => self
                .catalog
                .as_ref()
                .and_then(|c| c.scan_cost(table))
                .unwrap_or_else(|| Cost::new(out_rows, out_rows, output.total_size_bytes, 0.0, 0.0)),
            PhysicalOp::Values { .. } => Cost::cpu(out_rows, out_rows),
            PhysicalOp::Filter { .. } | PhysicalOp::Project { .. } => {
                Cost::cpu(out_rows, input_rows(0))
            }
            PhysicalOp::HashJoin { strategy, .. } => {
                let (probe, build) = (input_rows(0), input_rows(1));
                let network = match strategy {
                    JoinStrategy::Partitioned => 0.0,
                    JoinStrategy::BroadcastRight => {
                        if build > self.broadcast_threshold {
                            return Cost::infinite();
                        }
                        input_bytes(1) * self.parallelism
                    }
                };
                Cost::new(out_rows, probe + 2.0 * build, 0.0, network, input_bytes(1))
            }
            PhysicalOp::MergeJoin { .. } => Cost::cpu(out_rows, input_rows(0) + input_rows(1)),
            PhysicalOp::NestedLoopJoin { .. } => {
                let right = input_rows(1);
                if self.nested_loop_scalar_only && right > 1.0 {
                    return Cost::infinite();
                }
                Cost::new(out_rows, input_rows(0) * right.max(1.0), 0.0, 0.0, input_bytes(1))
            }
            PhysicalOp::Correlate { .. } => {
                Cost::cpu(out_rows, input_rows(0) * input_rows(1).max(1.0))
            }
            PhysicalOp::HashAggregate { .. } => Cost::new(
                out_rows,
                input_rows(0) + out_rows,
                0.0,
                0.0,
                output.total_size_bytes,
            ),
            PhysicalOp::StreamAggregate { .. } => Cost::cpu(out_rows, input_rows(0)),
            PhysicalOp::Sort { fetch, .. } => Cost::new(
                out_rows,
                Self::sort_cpu(input_rows(0), *fetch),
                0.0,
                0.0,
                input_bytes(0),
            ),
            PhysicalOp::Limit { .. } => Cost::cpu(out_rows, out_rows),
            PhysicalOp::UnionAll => Cost::cpu(out_rows, out_rows),
            PhysicalOp::Window { .. } => Cost::new(
                out_rows,
                Self::sort_cpu(input_rows(0), None),
                0.0,
                0.0,
                input_bytes(0),
            ),
            PhysicalOp::Exchange { distribution } => {
                let bytes = input_bytes(0);
                let network = match distribution {
                    Distribution::Broadcast => bytes * self.parallelism,
                    _ => bytes,
                };
                Cost::new(out_rows, input_rows(0), 0.0, network, 0.0)
            }
            PhysicalOp::MergeExchange { .. } => Cost::new(
                out_rows,
                input_rows(0) * self.parallelism.log2().max(1.0),
                0.0,
                input_bytes(0),
                0.0,
            ),
        }
    }
}
