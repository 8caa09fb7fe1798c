//! # relopt-core: Cascades Query Optimizer Core
//!
//! This crate implements the data structures and algorithms of a Cascades/Volcano style
//! cost-based optimizer for relational plans. A logical tree goes in, a physical tree
//! with explicit data movement comes out.
//!
//! ## Module Overview
//!
//! - **`types`**, **`expr`**, **`condition`**: row types, scalar expressions and the
//!   analysis of join conditions into equi keys and a remainder.
//! - **`operator`**: logical and physical operators, their row-type derivation and the
//!   `max_rows` bound.
//! - **`node`**: immutable operator trees, the input and output of the optimizer.
//! - **`traits`**: physical properties (convention, distribution, collation) and the
//!   satisfaction relation between them.
//! - **`stats`**: statistics and cardinality derivation formulas.
//! - **`catalog`**: table metadata, statistics and scan placement.
//! - **`cost`**: cost vectors and the default cost model.
//! - **`config`**: planner options, read from JSON.
//! - **`memo`**: groups of equivalent expressions, merging and trait subsets.
//! - **`pattern`**, **`rule`**: declarative rule patterns, the rule trait and the phased
//!   rule registry.
//! - **`search`**: the phase driver and the logical rule engine.
//! - **`physical`**: top-down physical planning, trait enforcement and plan extraction.
//! - **`error`**: the error type shared by every module.
//!
//! ## Planning Pipeline
//!
//! ```text
//! RelNode ──register──► Memo ──LogicalSimplification──► ──JoinPlanning──►
//!        ──Physical (implement, enforce, cost)──► PhysicalPlan
//! ```
//!
//! Rules live in the `relopt-rules` crate; `CascadesSearch` only knows the `Rule` trait.

pub mod catalog;
pub mod condition;
pub mod config;
pub mod cost;
pub mod error;
pub mod expr;
pub mod memo;
pub mod node;
pub mod operator;
pub mod pattern;
pub mod physical;
pub mod rule;
pub mod search;
pub mod stats;
pub mod traits;
pub mod types;

pub use error::{PlannerError, Result};
pub use node::{PhysicalPlan, RelNode};
pub use search::CascadesSearch;
pub use traits::TraitSet;
