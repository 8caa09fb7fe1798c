//! # Planner Errors
//!
//! Failures that cross the optimizer boundary. A rule that cannot legally apply is not an
//! error: it simply produces no results. The variants below are the conditions the caller
//! has to handle.

use crate::memo::GroupId;
use thiserror::Error;

/// Result type used throughout the planner.
pub type Result<T> = std::result::Result<T, PlannerError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlannerError {
    /// Every physical alternative for some subset ended with infinite cost.
    #[error("no physical plan found: could not convert {operator} (group {group})")]
    NoPhysicalPlan { operator: String, group: GroupId },

    /// A rule produced a result whose row type differs from the matched root.
    #[error("rule '{rule}' produced an invalid result: expected row type {expected}, got {actual}")]
    InvalidRuleResult {
        rule: String,
        expected: String,
        actual: String,
    },

    /// The step or time budget ran out between two obligations.
    #[error("planning timed out after {steps} steps ({elapsed_ms} ms): {reason}")]
    PlanningTimeout {
        steps: usize,
        elapsed_ms: u128,
        reason: String,
    },

    /// A node payload is inconsistent with its inputs.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid planner configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse planner configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl PlannerError {
    /// Whether resubmitting with different planner options may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlannerError::PlanningTimeout { .. })
    }

    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        PlannerError::InvalidPlan(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_is_retryable() {
        let timeout = PlannerError::PlanningTimeout {
            steps: 10,
            elapsed_ms: 5,
            reason: "step budget exhausted".into(),
        };
        assert!(timeout.is_retryable());

        let no_plan = PlannerError::NoPhysicalPlan {
            operator: "Join(INNER)".into(),
            group: 3,
        };
        assert!(!no_plan.is_retryable());
        assert_eq!(
            no_plan.to_string(),
            "no physical plan found: could not convert Join(INNER) (group 3)"
        );
    }
}
