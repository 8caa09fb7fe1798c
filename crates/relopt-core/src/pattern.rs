//! # Declarative Pattern Matching for Optimization Rules
//!
//! Each optimization rule declares a `Pattern` that describes the shape of expressions
//! it can transform. The firing engine binds the pattern against the memo before calling
//! the rule, so `on_match` only ever sees expressions of the declared shape.
//!
//! ## Pattern Language
//!
//! - `Pattern::Operator(matcher, children)`: matches an expression whose operator
//!   satisfies `matcher` and whose children match the given child patterns
//!   (e.g., "a Filter on top of a Join").
//!
//! - `Pattern::Any`: matches any group without binding an expression. The rule reaches
//!   the group through the parent's child list. This is the most common child pattern.
//!
//! - `Pattern::Leaf`: matches only leaf expressions (no children, like Scan or Values).
//!
//! - `Pattern::Unordered(matcher, child)`: matches an n-ary expression (Union) of any
//!   arity, where at least one input contains an expression matching `child`.
//!
//! ## Bindings
//!
//! A child pattern other than `Any` is checked against every expression in the child
//! group. Each matching combination is a separate binding: `bind` returns one pre-order
//! list of expression ids per combination. A Filter over a group holding two different
//! Projects therefore yields two bindings, and the rule fires once for each.
//!
//! Matching is conservative. It inspects operator kinds and payloads only; it never
//! optimizes or converts a child group.

use crate::memo::{ExprId, Memo};
use crate::operator::{LogicalOp, LogicalOpKind, Operator, PhysicalOpKind};

/// Pattern for matching expressions in the memo.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Match an operator with child patterns.
    Operator(OpMatcher, Vec<Pattern>),
    /// Match any subtree (group).
    Any,
    /// Match a leaf node (no children).
    Leaf,
    /// Match an n-ary operator where some input matches the child pattern.
    Unordered(OpMatcher, Box<Pattern>),
}

/// Matcher for operator types.
#[derive(Debug, Clone)]
pub enum OpMatcher {
    LogicalOp(LogicalOpKind),
    PhysicalOp(PhysicalOpKind),
    AnyLogical,
    AnyPhysical,
    /// A logical operator of the given kind whose payload passes the guard.
    Where(LogicalOpKind, fn(&LogicalOp) -> bool),
}

impl OpMatcher {
    pub fn accepts(&self, op: &Operator) -> bool {
        match (op, self) {
            (Operator::Logical(l), OpMatcher::LogicalOp(kind)) => l.kind() == *kind,
            (Operator::Physical(p), OpMatcher::PhysicalOp(kind)) => p.kind() == *kind,
            (Operator::Logical(_), OpMatcher::AnyLogical) => true,
            (Operator::Physical(_), OpMatcher::AnyPhysical) => true,
            (Operator::Logical(l), OpMatcher::Where(kind, guard)) => l.kind() == *kind && guard(l),
            _ => false,
        }
    }
}

impl Pattern {
    /// A logical operator of `kind` over the given child patterns.
    pub fn logical(kind: LogicalOpKind, children: Vec<Pattern>) -> Self {
        Pattern::Operator(OpMatcher::LogicalOp(kind), children)
    }

    /// Match a logical join with two any-children.
    pub fn join() -> Self {
        Pattern::logical(LogicalOpKind::Join, vec![Pattern::Any, Pattern::Any])
    }

    /// Match a logical correlate with two any-children.
    pub fn correlate() -> Self {
        Pattern::logical(LogicalOpKind::Correlate, vec![Pattern::Any, Pattern::Any])
    }

    /// Match a logical scan.
    pub fn scan() -> Self {
        Pattern::logical(LogicalOpKind::Scan, vec![])
    }

    /// Match a logical values node.
    pub fn values() -> Self {
        Pattern::logical(LogicalOpKind::Values, vec![])
    }

    /// Match a logical filter with one child.
    pub fn filter() -> Self {
        Pattern::logical(LogicalOpKind::Filter, vec![Pattern::Any])
    }

    /// Match a logical aggregate.
    pub fn aggregate() -> Self {
        Pattern::logical(LogicalOpKind::Aggregate, vec![Pattern::Any])
    }

    /// Match a logical sort.
    pub fn sort() -> Self {
        Pattern::logical(LogicalOpKind::Sort, vec![Pattern::Any])
    }

    /// Match a project with one child.
    pub fn project() -> Self {
        Pattern::logical(LogicalOpKind::Project, vec![Pattern::Any])
    }

    /// Match a window with one child.
    pub fn window() -> Self {
        Pattern::logical(LogicalOpKind::Window, vec![Pattern::Any])
    }

    /// Match a union of any arity.
    pub fn union() -> Self {
        Pattern::Unordered(OpMatcher::LogicalOp(LogicalOpKind::Union), Box::new(Pattern::Any))
    }

    /// `outer` over a single input matching `inner`.
    pub fn over(outer: LogicalOpKind, inner: Pattern) -> Self {
        Pattern::logical(outer, vec![inner])
    }

    /// Match a filter on top of a join.
    pub fn filter_join() -> Self {
        Pattern::over(LogicalOpKind::Filter, Pattern::join())
    }

    /// Match a single-input operator whose input is provably empty.
    pub fn over_empty(outer: LogicalOpKind) -> Self {
        Pattern::over(outer, Pattern::empty_values())
    }

    /// Match a values node with no rows.
    pub fn empty_values() -> Self {
        Pattern::Operator(
            OpMatcher::Where(LogicalOpKind::Values, LogicalOp::is_empty_values),
            vec![],
        )
    }
}

/// Check if a memo expression matches a pattern.
pub fn matches(memo: &Memo, expr_id: ExprId, pattern: &Pattern) -> bool {
    !bind(memo, expr_id, pattern).is_empty()
}

/// Every way `pattern` matches with `expr_id` as the root. Each binding lists the bound
/// expressions in pre-order; `Any` children contribute nothing.
pub fn bind(memo: &Memo, expr_id: ExprId, pattern: &Pattern) -> Vec<Vec<ExprId>> {
    let expr = memo.expr(expr_id);
    match pattern {
        Pattern::Any => vec![vec![expr_id]],
        Pattern::Leaf => {
            if expr.children.is_empty() {
                vec![vec![expr_id]]
            } else {
                vec![]
            }
        }
        Pattern::Operator(matcher, child_patterns) => {
            if !matcher.accepts(&expr.op) || expr.children.len() != child_patterns.len() {
                return vec![];
            }
            let mut bindings = vec![vec![expr_id]];
            for (&child, child_pattern) in expr.children.iter().zip(child_patterns) {
                if matches!(child_pattern, Pattern::Any) {
                    continue;
                }
                let child_bindings = bind_group(memo, child, child_pattern);
                if child_bindings.is_empty() {
                    return vec![];
                }
                bindings = bindings
                    .into_iter()
                    .flat_map(|prefix| {
                        child_bindings.iter().map(move |cb| {
                            let mut b = prefix.clone();
                            b.extend(cb.iter().copied());
                            b
                        })
                    })
                    .collect();
            }
            bindings
        }
        Pattern::Unordered(matcher, child_pattern) => {
            if !matcher.accepts(&expr.op) {
                return vec![];
            }
            if matches!(child_pattern.as_ref(), Pattern::Any) {
                return vec![vec![expr_id]];
            }
            let mut bindings = Vec::new();
            for &child in &expr.children {
                for cb in bind_group(memo, child, child_pattern) {
                    let mut b = vec![expr_id];
                    b.extend(cb);
                    bindings.push(b);
                }
            }
            bindings.sort();
            bindings.dedup();
            bindings
        }
    }
}

fn bind_group(memo: &Memo, group: crate::memo::GroupId, pattern: &Pattern) -> Vec<Vec<ExprId>> {
    memo.group(group)
        .exprs()
        .flat_map(|eid| bind(memo, eid, pattern))
        .collect()
}
