//! # Planner Configuration
//!
//! Session options that steer one planning call. The configuration is plain data: it is
//! deserialized from JSON, validated once, and then read by the search engine, the cost
//! model and individual rules through `OptContext`.
//!
//! Every field has a default, so a partial JSON object such as
//! `{"enable_hash_join": false}` is a complete configuration.

use crate::error::{PlannerError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Upper bound on rule firings and subset optimizations across all phases.
    pub max_iterations: usize,
    /// Upper bound on the number of groups the memo may contain.
    pub max_memo_groups: usize,
    /// Wall-clock budget for one planning call. `None` disables the check.
    pub timeout_ms: Option<u64>,
    /// Storage plugin whose rule set is added to the base rules.
    pub source_type: Option<String>,
    /// Rule names that never fire.
    pub disabled_rules: Vec<String>,
    pub enable_hash_join: bool,
    pub enable_merge_join: bool,
    pub enable_nested_loop_join: bool,
    /// Nested-loop joins are only costed finitely when the right input has at most one
    /// row. Clearing this allows general cartesian products.
    pub nested_loop_scalar_only: bool,
    pub enable_hash_agg: bool,
    pub enable_stream_agg: bool,
    /// Right inputs estimated above this many rows are never broadcast.
    pub broadcast_threshold: f64,
    /// Tables estimated below this many rows are scanned in a single fragment.
    pub slice_target: f64,
    /// Number of parallel execution units a distributed operator runs on.
    pub parallelism: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            max_memo_groups: 10_000,
            timeout_ms: None,
            source_type: None,
            disabled_rules: Vec::new(),
            enable_hash_join: true,
            enable_merge_join: true,
            enable_nested_loop_join: true,
            nested_loop_scalar_only: true,
            enable_hash_agg: true,
            enable_stream_agg: true,
            broadcast_threshold: 10_000_000.0,
            slice_target: 100_000.0,
            parallelism: 8,
        }
    }
}

impl PlannerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PlannerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(PlannerError::InvalidConfig(
                "max_iterations must be positive".into(),
            ));
        }
        if self.max_memo_groups == 0 {
            return Err(PlannerError::InvalidConfig(
                "max_memo_groups must be positive".into(),
            ));
        }
        if self.parallelism == 0 {
            return Err(PlannerError::InvalidConfig("parallelism must be positive".into()));
        }
        let negative = |v: f64| v.is_nan() || v < 0.0;
        if negative(self.broadcast_threshold) || negative(self.slice_target) {
            return Err(PlannerError::InvalidConfig(
                "broadcast_threshold and slice_target must be non-negative numbers".into(),
            ));
        }
        if !self.enable_hash_join && !self.enable_merge_join && !self.enable_nested_loop_join {
            return Err(PlannerError::InvalidConfig(
                "at least one join implementation must be enabled".into(),
            ));
        }
        if !self.enable_hash_agg && !self.enable_stream_agg {
            return Err(PlannerError::InvalidConfig(
                "at least one aggregate implementation must be enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn is_rule_disabled(&self, name: &str) -> bool {
        self.disabled_rules.iter().any(|r| r == name)
    }
}
