//! # Join Condition Analysis
//!
//! Splits a join predicate into equi-join key pairs and a non-equi remainder. Ordinals in
//! the predicate address the concatenated row `left ++ right`; the key lists returned here
//! address each input on its own (`left_keys[i]` is an ordinal of the left input and
//! `right_keys[i]` an ordinal of the right input).
//!
//! A conjunct is a key pair when it compares one column from each side with `=` or
//! `IS NOT DISTINCT FROM`. The expanded null-safe form
//! `a = b OR (a IS NULL AND b IS NULL)` is recognized as a null-safe key as well.
//! Everything else, including equalities between two columns of the same side, lands in
//! the remainder.
//!
//! `rebuild` turns an analysis back into a predicate. Conjoining the keys with the
//! remainder is logically equivalent to the original condition.

use crate::expr::{BinaryOp, ColumnRef, Expr, UnaryOp};
use crate::types::RowType;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinCondition {
    pub left_keys: Vec<u32>,
    pub right_keys: Vec<u32>,
    /// Per key: NULL matches NULL.
    pub null_safe: Vec<bool>,
    /// Non-equi conjuncts, in combined ordinals.
    pub remainder: Vec<Expr>,
}

impl JoinCondition {
    pub fn analyze(condition: &Expr, left_field_count: usize) -> JoinCondition {
        let left_count = left_field_count as u32;
        let mut out = JoinCondition::default();
        for conjunct in condition.conjuncts() {
            if conjunct.is_always_true() {
                continue;
            }
            match key_pair(conjunct, left_count) {
                Some((l, r, null_safe))
                    if !out
                        .left_keys
                        .iter()
                        .zip(&out.right_keys)
                        .any(|(&el, &er)| el == l && er == r) =>
                {
                    out.left_keys.push(l);
                    out.right_keys.push(r);
                    out.null_safe.push(null_safe);
                }
                Some(_) => {}
                None => out.remainder.push(conjunct.clone()),
            }
        }
        out
    }

    pub fn has_keys(&self) -> bool {
        !self.left_keys.is_empty()
    }

    /// Condition consists of key pairs only.
    pub fn is_equi(&self) -> bool {
        self.remainder.is_empty()
    }

    pub fn remainder_expr(&self) -> Expr {
        Expr::and_all(self.remainder.iter().cloned())
    }

    /// Key pairs as equality conjuncts over the combined row type.
    pub fn key_predicates(&self, left_field_count: usize, combined: &RowType) -> Vec<Expr> {
        let column = |i: u32| {
            let name = combined
                .field(i as usize)
                .map(|f| f.name.clone())
                .unwrap_or_default();
            Expr::Column(ColumnRef::new(i, name))
        };
        self.left_keys
            .iter()
            .zip(&self.right_keys)
            .zip(&self.null_safe)
            .map(|((&l, &r), &null_safe)| {
                let op = if null_safe {
                    BinaryOp::IsNotDistinctFrom
                } else {
                    BinaryOp::Eq
                };
                Expr::binary(op, column(l), column(r + left_field_count as u32))
            })
            .collect()
    }

    /// Key predicates conjoined with the remainder.
    pub fn rebuild(&self, left_field_count: usize, combined: &RowType) -> Expr {
        Expr::and_all(
            self.key_predicates(left_field_count, combined)
                .into_iter()
                .chain(self.remainder.iter().cloned()),
        )
    }
}

/// `(left ordinal, right ordinal relative to the right input, null_safe)`.
fn key_pair(conjunct: &Expr, left_count: u32) -> Option<(u32, u32, bool)> {
    match conjunct {
        Expr::BinaryOp { op, left, right } if op.is_equality() => {
            let (a, b) = (left.as_column()?, right.as_column()?);
            orient(a.index, b.index, left_count)
                .map(|(l, r)| (l, r, *op == BinaryOp::IsNotDistinctFrom))
        }
        Expr::Or(disjuncts) if disjuncts.len() == 2 => {
            expanded_null_safe(&disjuncts[0], &disjuncts[1], left_count)
                .or_else(|| expanded_null_safe(&disjuncts[1], &disjuncts[0], left_count))
        }
        _ => None,
    }
}

/// `a = b` together with `a IS NULL AND b IS NULL`.
fn expanded_null_safe(eq: &Expr, both_null: &Expr, left_count: u32) -> Option<(u32, u32, bool)> {
    let Expr::BinaryOp {
        op: BinaryOp::Eq,
        left,
        right,
    } = eq
    else {
        return None;
    };
    let (a, b) = (left.as_column()?.index, right.as_column()?.index);
    let Expr::And(parts) = both_null else {
        return None;
    };
    let mut null_checked: Vec<u32> = parts
        .iter()
        .filter_map(|p| match p {
            Expr::UnaryOp {
                op: UnaryOp::IsNull,
                operand,
            } => operand.as_column().map(|c| c.index),
            _ => None,
        })
        .collect();
    if parts.len() != 2 || null_checked.len() != 2 {
        return None;
    }
    null_checked.sort_unstable();
    let mut expected = vec![a, b];
    expected.sort_unstable();
    if null_checked != expected {
        return None;
    }
    orient(a, b, left_count).map(|(l, r)| (l, r, true))
}

fn orient(a: u32, b: u32, left_count: u32) -> Option<(u32, u32)> {
    match (a < left_count, b < left_count) {
        (true, false) => Some((a, b - left_count)),
        (false, true) => Some((b, a - left_count)),
        _ => None,
    }
}
