//! # Relational Expression Trees
//!
//! `RelNode` is the standalone tree form of a relational expression: the planner's input
//! (a logical tree handed over by SQL validation) and its output (the chosen physical
//! tree). Inside the planner the same operators live in the memo, where children are
//! groups rather than fixed subtrees.
//!
//! Nodes are immutable values. Every constructor derives the row type from the payload
//! and the children and fails on a malformed payload, so a `RelNode` that exists is
//! well-typed. Rewriting a tree means building a new one (`clone_with`, `fold`).

use crate::cost::Cost;
use crate::error::Result;
use crate::expr::{AggCall, Expr, JoinType, ScalarValue, TableRef, WindowCall};
use crate::operator::{LogicalOp, Operator};
use crate::traits::{Collation, TraitSet};
use crate::types::RowType;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq)]
pub struct RelNode {
    op: Operator,
    children: Vec<RelNode>,
    row_type: RowType,
    traits: TraitSet,
}

impl RelNode {
    /// Build a node, deriving its row type. Logical nodes get logical traits, physical
    /// nodes start as physical with no distribution or ordering claimed.
    pub fn new(op: Operator, children: Vec<RelNode>) -> Result<RelNode> {
        let traits = if op.is_logical() {
            TraitSet::logical()
        } else {
            TraitSet::physical()
        };
        let row_type = {
            let inputs: Vec<&RowType> = children.iter().map(|c| &c.row_type).collect();
            op.derive_row_type(&inputs)?
        };
        Ok(RelNode {
            op,
            children,
            row_type,
            traits,
        })
    }

    pub(crate) fn from_parts(op: Operator, children: Vec<RelNode>, row_type: RowType, traits: TraitSet) -> RelNode {
        RelNode {
            op,
            children,
            row_type,
            traits,
        }
    }

    pub fn op(&self) -> &Operator {
        &self.op
    }

    pub fn row_type(&self) -> &RowType {
        &self.row_type
    }

    pub fn children(&self) -> &[RelNode] {
        &self.children
    }

    pub fn trait_set(&self) -> &TraitSet {
        &self.traits
    }

    /// Same operator over new children and traits. The row type is derived again.
    pub fn clone_with(&self, children: Vec<RelNode>, traits: TraitSet) -> Result<RelNode> {
        let mut node = RelNode::new(self.op.clone(), children)?;
        node.traits = traits;
        Ok(node)
    }

    /// Bottom-up fold: `f` receives each node together with the folded values of its
    /// children.
    pub fn fold<T, F>(&self, f: &mut F) -> T
    where
        F: FnMut(&RelNode, Vec<T>) -> T,
    {
        let folded: Vec<T> = self.children.iter().map(|c| c.fold(f)).collect();
        f(self, folded)
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        self.fold(&mut |_, children: Vec<usize>| 1 + children.iter().sum::<usize>())
    }

    /// Indented textual dump, one operator per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), self.op);
        for child in &self.children {
            child.explain_into(out, depth + 1);
        }
    }

    // ------------------------------------------------------------------------
    // Logical constructors
    // ------------------------------------------------------------------------

    pub fn scan(table: TableRef, row_type: RowType) -> Result<RelNode> {
        RelNode::logical(
            LogicalOp::Scan {
                table,
                row_type,
                projection: None,
            },
            vec![],
        )
    }

    pub fn values(row_type: RowType, rows: Vec<Vec<ScalarValue>>) -> Result<RelNode> {
        RelNode::logical(LogicalOp::Values { row_type, rows }, vec![])
    }

    pub fn filter(input: RelNode, predicate: Expr) -> Result<RelNode> {
        RelNode::logical(LogicalOp::Filter { predicate }, vec![input])
    }

    pub fn project(input: RelNode, exprs: Vec<Expr>, aliases: Vec<String>) -> Result<RelNode> {
        RelNode::logical(LogicalOp::Project { exprs, aliases }, vec![input])
    }

    /// Project input fields by ordinal, keeping their names.
    pub fn project_fields(input: RelNode, ordinals: &[u32]) -> Result<RelNode> {
        let mut exprs = Vec::with_capacity(ordinals.len());
        let mut aliases = Vec::with_capacity(ordinals.len());
        for &i in ordinals {
            let name = input
                .row_type
                .field(i as usize)
                .map(|f| f.name.clone())
                .unwrap_or_default();
            exprs.push(Expr::col(i, name.clone()));
            aliases.push(name);
        }
        RelNode::project(input, exprs, aliases)
    }

    pub fn join(left: RelNode, right: RelNode, join_type: JoinType, condition: Expr) -> Result<RelNode> {
        RelNode::logical(
            LogicalOp::Join {
                join_type,
                condition,
            },
            vec![left, right],
        )
    }

    pub fn correlate(
        left: RelNode,
        right: RelNode,
        join_type: JoinType,
        correlation_id: u32,
        required_columns: Vec<u32>,
    ) -> Result<RelNode> {
        RelNode::logical(
            LogicalOp::Correlate {
                join_type,
                correlation_id,
                required_columns,
            },
            vec![left, right],
        )
    }

    pub fn aggregate(input: RelNode, group_keys: Vec<u32>, aggregates: Vec<AggCall>) -> Result<RelNode> {
        RelNode::logical(
            LogicalOp::Aggregate {
                group_keys,
                grouping_sets: vec![],
                aggregates,
            },
            vec![input],
        )
    }

    pub fn aggregate_grouping_sets(
        input: RelNode,
        group_keys: Vec<u32>,
        grouping_sets: Vec<Vec<u32>>,
        aggregates: Vec<AggCall>,
    ) -> Result<RelNode> {
        RelNode::logical(
            LogicalOp::Aggregate {
                group_keys,
                grouping_sets,
                aggregates,
            },
            vec![input],
        )
    }

    pub fn sort(input: RelNode, collation: Collation, offset: u64, fetch: Option<u64>) -> Result<RelNode> {
        RelNode::logical(
            LogicalOp::Sort {
                collation,
                offset,
                fetch,
            },
            vec![input],
        )
    }

    pub fn union(inputs: Vec<RelNode>, all: bool) -> Result<RelNode> {
        RelNode::logical(LogicalOp::Union { all }, inputs)
    }

    pub fn window(
        input: RelNode,
        partition_keys: Vec<u32>,
        order: Collation,
        calls: Vec<WindowCall>,
    ) -> Result<RelNode> {
        RelNode::logical(
            LogicalOp::Window {
                partition_keys,
                order,
                calls,
            },
            vec![input],
        )
    }

    fn logical(op: LogicalOp, children: Vec<RelNode>) -> Result<RelNode> {
        RelNode::new(Operator::Logical(op), children)
    }
}

/// Result of one planning call.
#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    /// Root of the chosen physical tree; every node is physical.
    pub root: RelNode,
    pub cost: Cost,
    /// Rule firings and subset optimizations spent.
    pub iterations: usize,
}

impl PhysicalPlan {
    pub fn explain(&self) -> String {
        self.root.explain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::OpKind;
    use crate::types::{DataType, Field};

    fn emp() -> RelNode {
        RelNode::scan(
            TableRef::new("hr", "emp"),
            RowType::new(vec![
                Field::new("empno", DataType::Int32, false),
                Field::new("deptno", DataType::Int32, false),
                Field::new("sal", DataType::Int64, true),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn test_constructors_derive_row_type() {
        let proj = RelNode::project_fields(emp(), &[1, 2]).unwrap();
        assert_eq!(proj.row_type().names(), vec!["deptno", "sal"]);
        assert_eq!(proj.trait_set(), &TraitSet::logical());
        assert!(RelNode::project_fields(emp(), &[7]).is_err());
    }

    #[test]
    fn test_fold_counts_operators() {
        let filter = RelNode::filter(
            emp(),
            Expr::gt(Expr::col(2, "sal"), Expr::lit(ScalarValue::Int64(1000))),
        )
        .unwrap();
        let tree = RelNode::project_fields(filter, &[1, 2]).unwrap();
        assert_eq!(tree.size(), 3);
        let kinds = tree.fold(&mut |n: &RelNode, mut acc: Vec<Vec<OpKind>>| {
            let mut out = vec![n.op().kind()];
            for c in acc.drain(..) {
                out.extend(c);
            }
            out
        });
        assert_eq!(kinds.len(), 3);
    }

    #[test]
    fn test_explain_is_indented() {
        let tree = RelNode::filter(
            emp(),
            Expr::gt(Expr::col(2, "sal"), Expr::lit(ScalarValue::Int64(1000))),
        )
        .unwrap();
        let text = tree.explain();
        assert_eq!(
            text,
            "Filter(condition=[sal > 1000])\n  Scan(table=[hr.emp])\n"
        );
    }
}
