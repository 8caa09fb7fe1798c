//! # Union Constant Pull-Up
//!
//! When a column holds the same literal in every branch of a union, the branches stop
//! producing it and a projection above the union puts the literal back:
//!
//! ```text
//! Union(Project(1 AS a, x), Filter(a = 1, Y))
//!     ->  Project(1 AS a, $0, Union(Project(x), Project(Y.b)))
//! ```
//!
//! A branch pins a column when some expression of its group proves it: a projection
//! literal, a filter conjunct `col = literal`, or literal rows that all agree. Columns
//! pinned to NULL are never pulled up.

use relopt_core::expr::{Expr, ScalarValue};
use relopt_core::memo::GroupId;
use relopt_core::operator::{LogicalOp, Operator};
use relopt_core::pattern::Pattern;
use relopt_core::rule::{Rule, RuleCall, RuleChild, RuleResult, RuleType};
use relopt_core::types::{Field, RowType};
use std::collections::BTreeMap;

/// Pull columns that are constant in every branch above the union.
pub struct UnionPullUpConstantsRule;

impl Rule for UnionPullUpConstantsRule {
    fn name(&self) -> &str {
        "UnionPullUpConstants"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::union()
    }

    fn on_match(&self, call: &mut RuleCall) {
        let Some(union @ LogicalOp::Union { .. }) = call.logical(0) else {
            return;
        };
        let root = call.root();
        let output = call.row_type(root.group);

        let mut branches = root.children.iter().map(|&g| constants_of(call, g));
        let Some(first) = branches.next() else {
            return;
        };
        let common: BTreeMap<u32, ScalarValue> = branches.fold(first, |acc, other| {
            acc.into_iter()
                .filter(|(col, value)| other.get(col) == Some(value))
                .collect()
        });
        if common.is_empty() || common.len() == output.len() {
            return;
        }

        let kept: Vec<u32> = (0..output.len() as u32)
            .filter(|c| !common.contains_key(c))
            .collect();
        let inputs: Vec<RuleChild> = root
            .children
            .iter()
            .map(|&g| {
                let names = &call.row_type(g).fields;
                let aliases: Vec<String> = kept.iter().map(|&c| names[c as usize].name.clone()).collect();
                RuleChild::new_expr(
                    LogicalOp::Project {
                        exprs: kept.iter().zip(&aliases).map(|(&c, n)| Expr::col(c, n.as_str())).collect(),
                        aliases,
                    },
                    vec![RuleChild::Group(g)],
                )
            })
            .collect();

        let Some(narrow) = output.project(&kept) else {
            return;
        };
        let mut next_kept = 0u32;
        let exprs: Vec<Expr> = output
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| match common.get(&(i as u32)) {
                Some(value) => retype(Expr::lit(value.clone()), &narrow, field),
                None => {
                    next_kept += 1;
                    retype(Expr::col(next_kept - 1, field.name.as_str()), &narrow, field)
                }
            })
            .collect();
        call.transform_to(RuleResult::NewChildren(
            Operator::Logical(LogicalOp::Project {
                exprs,
                aliases: output.fields.iter().map(|f| f.name.clone()).collect(),
            }),
            vec![RuleChild::NewExpr(Operator::Logical(union.clone()), inputs)],
        ));
    }
}

/// Columns of `group` that some member pins to a non-NULL literal.
fn constants_of(call: &RuleCall, group: GroupId) -> BTreeMap<u32, ScalarValue> {
    let mut out = BTreeMap::new();
    for (_, op) in call.logical_in(group) {
        match op {
            LogicalOp::Project { exprs, .. } => {
                for (i, e) in exprs.iter().enumerate() {
                    if let Some(v) = e.as_literal().filter(|v| !v.is_null()) {
                        out.entry(i as u32).or_insert_with(|| v.clone());
                    }
                }
            }
            LogicalOp::Filter { predicate } => {
                for c in predicate.conjuncts() {
                    if let Some((col, v)) = pinned_by(c) {
                        out.entry(col).or_insert(v);
                    }
                }
            }
            LogicalOp::Values { row_type, rows } if !rows.is_empty() => {
                for col in 0..row_type.len() {
                    let first = &rows[0][col];
                    if !first.is_null() && rows.iter().all(|r| r[col] == *first) {
                        out.entry(col as u32).or_insert_with(|| first.clone());
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// `$c = literal` or `literal = $c`.
fn pinned_by(conjunct: &Expr) -> Option<(u32, ScalarValue)> {
    let Expr::BinaryOp { op, left, right } = conjunct else {
        return None;
    };
    if !op.is_equality() {
        return None;
    }
    let (col, lit) = match (left.as_column(), right.as_literal(), right.as_column(), left.as_literal()) {
        (Some(c), Some(v), _, _) | (_, _, Some(c), Some(v)) => (c, v),
        _ => return None,
    };
    (!lit.is_null()).then(|| (col.index, lit.clone()))
}

/// `expr` evaluated over `input`, cast to the type and nullability of `target` if needed.
pub(crate) fn retype(expr: Expr, input: &RowType, target: &Field) -> Expr {
    let same_type = expr.data_type(input).is_ok_and(|t| t == target.data_type);
    if same_type && expr.nullable(input) == target.nullable {
        return expr;
    }
    Expr::Cast {
        expr: Box::new(expr),
        to: target.data_type.clone(),
        nullable: target.nullable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{apply_rule, children_of, dept, dept_scan, logical_ops};
    use relopt_core::node::RelNode;
    use relopt_core::types::DataType;

    fn is_project(op: &LogicalOp) -> bool {
        matches!(op, LogicalOp::Project { .. })
    }

    #[test]
    fn test_shared_constant_is_pulled_up() {
        let pinned = RelNode::filter(
            dept_scan(),
            Expr::eq(Expr::col(1, "dname"), Expr::lit(ScalarValue::Utf8("sales".into()))),
        )
        .unwrap();
        let literal = RelNode::values(
            dept(),
            vec![
                vec![ScalarValue::Int32(1), ScalarValue::Utf8("sales".into()), ScalarValue::Int64(10)],
                vec![ScalarValue::Int32(2), ScalarValue::Utf8("sales".into()), ScalarValue::Int64(20)],
            ],
        )
        .unwrap();
        let tree = RelNode::union(vec![pinned, literal], true).unwrap();
        let (memo, root) = apply_rule(&tree, UnionPullUpConstantsRule);

        let project = logical_ops(&memo, root)
            .into_iter()
            .find(|op| is_project(op))
            .expect("project over the narrowed union");
        let LogicalOp::Project { exprs, .. } = project else {
            unreachable!()
        };
        // `dname` is nullable in the union, the literal is not.
        assert_eq!(
            exprs[1],
            Expr::Cast {
                expr: Box::new(Expr::lit(ScalarValue::Utf8("sales".into()))),
                to: DataType::Utf8,
                nullable: true
            }
        );

        let union = children_of(&memo, root, is_project).unwrap();
        assert_eq!(memo.group(union[0]).row_type.names(), vec!["deptno", "budget"]);
    }

    #[test]
    fn test_different_constants_stay() {
        let a = RelNode::filter(dept_scan(), Expr::eq(Expr::col(0, "deptno"), Expr::lit(ScalarValue::Int32(1)))).unwrap();
        let b = RelNode::filter(dept_scan(), Expr::eq(Expr::col(0, "deptno"), Expr::lit(ScalarValue::Int32(2)))).unwrap();
        let tree = RelNode::union(vec![a, b], true).unwrap();
        let (memo, root) = apply_rule(&tree, UnionPullUpConstantsRule);
        assert_eq!(memo.group(root).logical_exprs.len(), 1);
    }

    #[test]
    fn test_retype_widens_nullability() {
        let input = RowType::new(vec![Field::new("x", DataType::Int32, false)]);
        let target = Field::new("x", DataType::Int32, true);
        assert_eq!(
            retype(Expr::col(0, "x"), &input, &target),
            Expr::Cast {
                expr: Box::new(Expr::col(0, "x")),
                to: DataType::Int32,
                nullable: true
            }
        );
        assert_eq!(
            retype(Expr::col(0, "x"), &input, &input.fields[0]),
            Expr::col(0, "x")
        );
    }
}
