//! # Scalar Expressions
//!
//! Scalar expressions represent computations on individual rows: column references,
//! literal values, arithmetic, comparisons, boolean logic, casts and function calls. They
//! appear inside filter predicates, projections and join conditions.
//!
//! ## Column References Are Ordinals
//!
//! A `ColumnRef` points at a field of the operator's input row type by position. The name
//! it carries is display metadata only: two references with the same ordinal are equal and
//! hash identically, so memo digests do not depend on how a column happened to be named.
//! For a join condition the ordinals address the concatenation of the left and right inputs.
//!
//! ## Pure Rewriting
//!
//! Every transformation here (`rewrite`, `map_columns`, `shift`, `remap`, `simplify`,
//! `strip_redundant_casts`) takes `&self` and returns a new expression. Rules build their
//! results out of these functions and never mutate an expression in place.

use crate::error::{PlannerError, Result};
use crate::types::{DataType, Field, RowType};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Functions that produce several output rows per input row. A predicate that references
/// one of them cannot be evaluated below the projection that computes it.
const NON_INJECTIVE_FUNCTIONS: &[&str] = &["flatten"];

const NON_DETERMINISTIC_FUNCTIONS: &[&str] = &["rand", "random", "uuid"];

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Reference to a field of the input row type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
    pub index: u32,
}

impl ColumnRef {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
            index,
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>, index: u32) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
            index,
        }
    }

    pub fn with_index(&self, index: u32) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }
}

impl PartialEq for ColumnRef {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for ColumnRef {}

impl Hash for ColumnRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.table, self.name.is_empty()) {
            (_, true) => write!(f, "${}", self.index),
            (Some(t), false) => write!(f, "{}.{}", t, self.name),
            (None, false) => write!(f, "{}", self.name),
        }
    }
}

/// Scalar value for expressions.
///
/// Uses `OrderedFloat` for `f64` so that literals can take part in memo digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since Unix epoch.
    Date(i32),
}

impl ScalarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Bool(_) => DataType::Boolean,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::Date(_) => DataType::Date,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int32(v) => Some(f64::from(*v)),
            ScalarValue::Int64(v) => Some(*v as f64),
            ScalarValue::Float64(v) => Some(v.0),
            _ => None,
        }
    }

    /// SQL comparison. `None` when either side is NULL or the types are incomparable.
    pub fn compare(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (ScalarValue::Null, _) | (_, ScalarValue::Null) => None,
            (ScalarValue::Bool(a), ScalarValue::Bool(b)) => Some(a.cmp(b)),
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => Some(a.cmp(b)),
            (ScalarValue::Date(a), ScalarValue::Date(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int32(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int32(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{}", v.0),
            ScalarValue::Utf8(v) => write!(f, "'{v}'"),
            ScalarValue::Date(v) => write!(f, "DATE {v}"),
        }
    }
}

/// Scalar expressions used in predicates, projections and join conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to an input field by ordinal.
    Column(ColumnRef),
    Literal(ScalarValue),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Named function call with a declared return type.
    Function {
        name: String,
        args: Vec<Expr>,
        return_type: DataType,
    },
    /// Type conversion. The result is nullable if `nullable` is set or the operand is.
    Cast {
        expr: Box<Expr>,
        to: DataType,
        nullable: bool,
    },
    /// A field of the current left row of an enclosing Correlate.
    CorrelatedField {
        correlation_id: u32,
        field: ColumnRef,
        data_type: DataType,
        nullable: bool,
    },
    /// Conjunction, kept as a flat list.
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn col(index: u32, name: impl Into<String>) -> Expr {
        Expr::Column(ColumnRef::new(index, name))
    }

    pub fn lit(value: ScalarValue) -> Expr {
        Expr::Literal(value)
    }

    pub fn true_lit() -> Expr {
        Expr::Literal(ScalarValue::Bool(true))
    }

    pub fn false_lit() -> Expr {
        Expr::Literal(ScalarValue::Bool(false))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn gt(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Gt, left, right)
    }

    pub fn lt(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Lt, left, right)
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn not(operand: Expr) -> Expr {
        Expr::unary(UnaryOp::Not, operand)
    }

    pub fn is_null(operand: Expr) -> Expr {
        Expr::unary(UnaryOp::IsNull, operand)
    }

    pub fn cast(expr: Expr, to: DataType) -> Expr {
        Expr::Cast {
            expr: Box::new(expr),
            to,
            nullable: false,
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>, return_type: DataType) -> Expr {
        Expr::Function {
            name: name.into(),
            args,
            return_type,
        }
    }

    /// Build a conjunction, flattening nested ANDs and dropping TRUE and duplicates.
    pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        let mut out: Vec<Expr> = Vec::new();
        for e in exprs {
            let parts = match e {
                Expr::And(inner) => inner,
                other => vec![other],
            };
            for p in parts {
                if !p.is_always_true() && !out.contains(&p) {
                    out.push(p);
                }
            }
        }
        match out.len() {
            0 => Expr::true_lit(),
            1 => out.remove(0),
            _ => Expr::And(out),
        }
    }

    /// Build a disjunction, flattening nested ORs and dropping FALSE and duplicates.
    pub fn or_all(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        let mut out: Vec<Expr> = Vec::new();
        for e in exprs {
            let parts = match e {
                Expr::Or(inner) => inner,
                other => vec![other],
            };
            for p in parts {
                if !p.is_always_false() && !out.contains(&p) {
                    out.push(p);
                }
            }
        }
        match out.len() {
            0 => Expr::false_lit(),
            1 => out.remove(0),
            _ => Expr::Or(out),
        }
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&ScalarValue> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_always_true(&self) -> bool {
        matches!(self, Expr::Literal(ScalarValue::Bool(true)))
    }

    pub fn is_always_false(&self) -> bool {
        matches!(self, Expr::Literal(ScalarValue::Bool(false)))
    }

    /// FALSE or NULL: a filter with this predicate keeps no rows.
    pub fn rejects_all(&self) -> bool {
        matches!(
            self,
            Expr::Literal(ScalarValue::Bool(false)) | Expr::Literal(ScalarValue::Null)
        )
    }

    /// Return all column references in this expression.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Literal(_) | Expr::CorrelatedField { .. } => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_columns(out),
            Expr::Cast { expr, .. } => expr.collect_columns(out),
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_columns(out);
                }
            }
        }
    }

    /// Ordinals of all referenced input fields.
    pub fn input_refs(&self) -> BTreeSet<u32> {
        self.columns().into_iter().map(|c| c.index).collect()
    }

    /// True if every referenced ordinal lies in `[start, end)`.
    pub fn references_only(&self, start: u32, end: u32) -> bool {
        self.input_refs().iter().all(|&i| i >= start && i < end)
    }

    /// Correlation ids referenced through `CorrelatedField`.
    pub fn correlation_ids(&self) -> BTreeSet<u32> {
        let mut ids = BTreeSet::new();
        self.visit(&mut |e| {
            if let Expr::CorrelatedField { correlation_id, .. } = e {
                ids.insert(*correlation_id);
            }
        });
        ids
    }

    /// Pre-order walk over the expression tree.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Column(_) | Expr::Literal(_) | Expr::CorrelatedField { .. } => {}
            Expr::BinaryOp { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expr::UnaryOp { operand, .. } => operand.visit(f),
            Expr::Cast { expr, .. } => expr.visit(f),
            Expr::Function { args, .. } => {
                for a in args {
                    a.visit(f);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.visit(f);
                }
            }
        }
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    pub fn disjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Or(exprs) => exprs.iter().flat_map(|e| e.disjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Top-down rewrite. Where `f` returns a replacement the subtree is replaced and not
    /// descended into; everywhere else the children are rewritten.
    pub fn rewrite<F>(&self, f: &F) -> Expr
    where
        F: Fn(&Expr) -> Option<Expr>,
    {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        match self {
            Expr::Column(_) | Expr::Literal(_) | Expr::CorrelatedField { .. } => self.clone(),
            Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
                op: *op,
                left: Box::new(left.rewrite(f)),
                right: Box::new(right.rewrite(f)),
            },
            Expr::UnaryOp { op, operand } => Expr::UnaryOp {
                op: *op,
                operand: Box::new(operand.rewrite(f)),
            },
            Expr::Function {
                name,
                args,
                return_type,
            } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.rewrite(f)).collect(),
                return_type: return_type.clone(),
            },
            Expr::Cast { expr, to, nullable } => Expr::Cast {
                expr: Box::new(expr.rewrite(f)),
                to: to.clone(),
                nullable: *nullable,
            },
            Expr::And(exprs) => Expr::And(exprs.iter().map(|e| e.rewrite(f)).collect()),
            Expr::Or(exprs) => Expr::Or(exprs.iter().map(|e| e.rewrite(f)).collect()),
        }
    }

    /// Substitute every column reference.
    pub fn map_columns<F>(&self, f: F) -> Expr
    where
        F: Fn(&ColumnRef) -> Expr,
    {
        self.rewrite(&|e: &Expr| match e {
            Expr::Column(c) => Some(f(c)),
            _ => None,
        })
    }

    /// Add `offset` to every column ordinal; `None` if some ordinal would leave the `u32` range.
    pub fn shift(&self, offset: i64) -> Option<Expr> {
        self.remap(|i| u32::try_from(i64::from(i) + offset).ok())
    }

    /// Renumber column ordinals; `None` if some referenced ordinal has no image.
    pub fn remap<F>(&self, mapping: F) -> Option<Expr>
    where
        F: Fn(u32) -> Option<u32>,
    {
        if self.input_refs().iter().any(|&i| mapping(i).is_none()) {
            return None;
        }
        Some(self.map_columns(|c| Expr::Column(c.with_index(mapping(c.index).unwrap_or(c.index)))))
    }

    pub fn is_deterministic(&self) -> bool {
        !self.calls_any(NON_DETERMINISTIC_FUNCTIONS)
    }

    /// True if the expression calls a row-multiplying function such as FLATTEN.
    pub fn contains_banned_function(&self) -> bool {
        self.calls_any(NON_INJECTIVE_FUNCTIONS)
    }

    fn calls_any(&self, names: &[&str]) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if let Expr::Function { name, .. } = e {
                if names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                    found = true;
                }
            }
        });
        found
    }

    /// Data type of the expression evaluated over `input`.
    pub fn data_type(&self, input: &RowType) -> Result<DataType> {
        match self {
            Expr::Column(c) => input
                .field(c.index as usize)
                .map(|f| f.data_type.clone())
                .ok_or_else(|| {
                    PlannerError::invalid_plan(format!(
                        "column {c} (${}) out of range for {input}",
                        c.index
                    ))
                }),
            Expr::Literal(v) => Ok(v.data_type()),
            Expr::BinaryOp { op, left, right } => {
                let l = left.data_type(input)?;
                let r = right.data_type(input)?;
                if op.is_comparison() {
                    Ok(DataType::Boolean)
                } else {
                    Ok(DataType::arithmetic_result(&l, &r))
                }
            }
            Expr::UnaryOp { op, operand } => {
                let t = operand.data_type(input)?;
                match op {
                    UnaryOp::Neg => Ok(t),
                    UnaryOp::Not | UnaryOp::IsNull | UnaryOp::IsNotNull => Ok(DataType::Boolean),
                }
            }
            Expr::Function {
                args, return_type, ..
            } => {
                for a in args {
                    a.data_type(input)?;
                }
                Ok(return_type.clone())
            }
            Expr::Cast { expr, to, .. } => {
                expr.data_type(input)?;
                Ok(to.clone())
            }
            Expr::CorrelatedField { data_type, .. } => Ok(data_type.clone()),
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.data_type(input)?;
                }
                Ok(DataType::Boolean)
            }
        }
    }

    /// Whether the expression may evaluate to NULL over `input`.
    pub fn nullable(&self, input: &RowType) -> bool {
        match self {
            Expr::Column(c) => input
                .field(c.index as usize)
                .map(|f| f.nullable)
                .unwrap_or(true),
            Expr::Literal(v) => v.is_null(),
            Expr::BinaryOp {
                op: BinaryOp::IsNotDistinctFrom,
                ..
            } => false,
            Expr::BinaryOp { left, right, .. } => left.nullable(input) || right.nullable(input),
            Expr::UnaryOp {
                op: UnaryOp::IsNull | UnaryOp::IsNotNull,
                ..
            } => false,
            Expr::UnaryOp { operand, .. } => operand.nullable(input),
            Expr::Function { args, .. } => args.iter().any(|a| a.nullable(input)),
            Expr::Cast { expr, nullable, .. } => *nullable || expr.nullable(input),
            Expr::CorrelatedField { nullable, .. } => *nullable,
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().any(|e| e.nullable(input)),
        }
    }

    /// Output field produced by this expression under `name`.
    pub fn to_field(&self, name: &str, input: &RowType) -> Result<Field> {
        Ok(Field::new(name, self.data_type(input)?, self.nullable(input)))
    }

    /// Constant-fold boolean structure.
    ///
    /// Flattens AND/OR, removes TRUE conjuncts and FALSE disjuncts, short-circuits on the
    /// absorbing element, cancels double negation and evaluates comparisons between
    /// literals. NULL is kept as NULL (three-valued logic), except where the absorbing
    /// element decides the result regardless.
    pub fn simplify(&self) -> Expr {
        match self {
            Expr::And(list) => {
                let parts: Vec<Expr> = list.iter().map(|e| e.simplify()).collect();
                if parts.iter().any(|p| p.is_always_false()) {
                    return Expr::false_lit();
                }
                Expr::and_all(parts)
            }
            Expr::Or(list) => {
                let parts: Vec<Expr> = list.iter().map(|e| e.simplify()).collect();
                if parts.iter().any(|p| p.is_always_true()) {
                    return Expr::true_lit();
                }
                Expr::or_all(parts)
            }
            Expr::UnaryOp { op, operand } => {
                let inner = operand.simplify();
                match (op, inner) {
                    (UnaryOp::Not, Expr::Literal(ScalarValue::Bool(b))) => {
                        Expr::Literal(ScalarValue::Bool(!b))
                    }
                    (UnaryOp::Not, Expr::Literal(ScalarValue::Null)) => {
                        Expr::Literal(ScalarValue::Null)
                    }
                    (
                        UnaryOp::Not,
                        Expr::UnaryOp {
                            op: UnaryOp::Not,
                            operand,
                        },
                    ) => *operand,
                    (UnaryOp::IsNull, Expr::Literal(v)) => Expr::Literal(ScalarValue::Bool(v.is_null())),
                    (UnaryOp::IsNotNull, Expr::Literal(v)) => {
                        Expr::Literal(ScalarValue::Bool(!v.is_null()))
                    }
                    (op, inner) => Expr::unary(*op, inner),
                }
            }
            Expr::BinaryOp { op, left, right } => {
                let l = left.simplify();
                let r = right.simplify();
                if let (Some(a), Some(b)) = (l.as_literal(), r.as_literal()) {
                    if let Some(folded) = op.fold_literals(a, b) {
                        return Expr::Literal(folded);
                    }
                }
                Expr::binary(*op, l, r)
            }
            Expr::Cast { expr, to, nullable } => Expr::Cast {
                expr: Box::new(expr.simplify()),
                to: to.clone(),
                nullable: *nullable,
            },
            Expr::Function {
                name,
                args,
                return_type,
            } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.simplify()).collect(),
                return_type: return_type.clone(),
            },
            Expr::Column(_) | Expr::Literal(_) | Expr::CorrelatedField { .. } => self.clone(),
        }
    }

    /// Remove casts that cannot change a value.
    ///
    /// `CAST(CAST(x AS a) AS b)` becomes `CAST(x AS b)` when `a` widens the type of `x`
    /// losslessly, and a cast to the operand's own type disappears when it does not change
    /// nullability either.
    pub fn strip_redundant_casts(&self, input: &RowType) -> Expr {
        self.rewrite(&|e: &Expr| match e {
            Expr::Cast { expr, to, nullable } => {
                Some(Self::strip_cast(expr, to, *nullable, input))
            }
            _ => None,
        })
    }

    fn strip_cast(operand: &Expr, to: &DataType, nullable: bool, input: &RowType) -> Expr {
        let operand = operand.strip_redundant_casts(input);
        let (operand, nullable) = match operand {
            Expr::Cast {
                expr: inner,
                to: mid,
                nullable: mid_nullable,
            } => match inner.data_type(input) {
                Ok(src) if mid.is_lossless_widening_of(&src) => (*inner, nullable || mid_nullable),
                _ => (
                    Expr::Cast {
                        expr: inner,
                        to: mid,
                        nullable: mid_nullable,
                    },
                    nullable,
                ),
            },
            other => (other, nullable),
        };
        let same_type = operand.data_type(input).map(|t| &t == to).unwrap_or(false);
        if same_type && (!nullable || operand.nullable(input)) {
            return operand;
        }
        Expr::Cast {
            expr: Box::new(operand),
            to: to.clone(),
            nullable,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { op, left, right } => write!(f, "{left} {op} {right}"),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT ({operand})"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Expr::Function { name, args, .. } => {
                write!(f, "{}(", name.to_uppercase())?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Cast { expr, to, .. } => write!(f, "CAST({expr} AS {to})"),
            Expr::CorrelatedField {
                correlation_id,
                field,
                ..
            } => write!(f, "$cor{correlation_id}.{}", field.name),
            Expr::And(exprs) | Expr::Or(exprs) => {
                let sep = if matches!(self, Expr::And(_)) { " AND " } else { " OR " };
                write!(f, "(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{sep}")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Binary operators for comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// Null-aware equality: NULL is equal to NULL.
    IsNotDistinctFrom,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
                | BinaryOp::IsNotDistinctFrom
        )
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::IsNotDistinctFrom)
    }

    /// Operator for the same comparison with its operands swapped.
    pub fn flip(&self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::LtEq => BinaryOp::GtEq,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::GtEq => BinaryOp::LtEq,
            other => *other,
        }
    }

    fn fold_literals(&self, a: &ScalarValue, b: &ScalarValue) -> Option<ScalarValue> {
        if *self == BinaryOp::IsNotDistinctFrom {
            return match (a.is_null(), b.is_null()) {
                (true, true) => Some(ScalarValue::Bool(true)),
                (true, false) | (false, true) => Some(ScalarValue::Bool(false)),
                (false, false) => a.compare(b).map(|o| ScalarValue::Bool(o == Ordering::Equal)),
            };
        }
        if !self.is_comparison() {
            return None;
        }
        if a.is_null() || b.is_null() {
            return Some(ScalarValue::Null);
        }
        let ord = a.compare(b)?;
        let result = match self {
            BinaryOp::Eq => ord == Ordering::Equal,
            BinaryOp::NotEq => ord != Ordering::Equal,
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::LtEq => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            BinaryOp::GtEq => ord != Ordering::Less,
            _ => return None,
        };
        Some(ScalarValue::Bool(result))
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::IsNotDistinctFrom => "IS NOT DISTINCT FROM",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{s}")
    }
}

/// Unary operators for boolean logic and null checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// SQL join types.
///
/// The join type decides which input is "preserved" and which one may be padded with
/// NULLs. That asymmetry drives every filter-movement rule around joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    /// All rows from left, matching rows from right or NULLs.
    Left,
    Right,
    Full,
    /// Left rows with at least one match on the right; right fields are not produced.
    Semi,
    /// Left rows with no match on the right.
    Anti,
    /// Cartesian product, equivalent to an inner join on TRUE.
    Cross,
}

impl JoinType {
    pub fn projects_right(&self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }

    pub fn generates_nulls_on_left(&self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }

    pub fn generates_nulls_on_right(&self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    pub fn is_outer(&self) -> bool {
        matches!(self, JoinType::Left | JoinType::Right | JoinType::Full)
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, JoinType::Inner | JoinType::Cross)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
            JoinType::Semi => "SEMI",
            JoinType::Anti => "ANTI",
            JoinType::Cross => "CROSS",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    /// SUM that returns 0 instead of NULL for an empty group.
    Sum0,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    /// Function that combines partial results of `self`, if `self` can be computed in two
    /// stages.
    pub fn rollup(&self) -> Option<AggFunc> {
        match self {
            AggFunc::Count | AggFunc::Sum0 => Some(AggFunc::Sum0),
            AggFunc::Sum => Some(AggFunc::Sum),
            AggFunc::Min => Some(AggFunc::Min),
            AggFunc::Max => Some(AggFunc::Max),
            AggFunc::Avg => None,
        }
    }

    fn result_field(&self, name: &str, arg: Option<&Field>) -> Result<Field> {
        let arg_type = || {
            arg.map(|f| f.data_type.clone()).ok_or_else(|| {
                PlannerError::invalid_plan(format!("{self:?} requires exactly one argument"))
            })
        };
        let field = match self {
            AggFunc::Count => Field::new(name, DataType::Int64, false),
            AggFunc::Sum0 => Field::new(name, arg_type()?.sum_type(), false),
            AggFunc::Sum => Field::new(name, arg_type()?.sum_type(), true),
            AggFunc::Avg => {
                arg_type()?;
                Field::new(name, DataType::Float64, true)
            }
            AggFunc::Min | AggFunc::Max => Field::new(name, arg_type()?, true),
        };
        Ok(field)
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Sum0 => "$SUM0",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        };
        write!(f, "{s}")
    }
}

/// One aggregate function call of an Aggregate node.
///
/// `args` and `filter` are ordinals into the aggregate's input. `COUNT(*)` has no args.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggCall {
    pub func: AggFunc,
    pub args: Vec<u32>,
    pub distinct: bool,
    /// Boolean input field; only rows where it is TRUE are aggregated.
    pub filter: Option<u32>,
    pub name: String,
}

impl AggCall {
    pub fn new(func: AggFunc, args: Vec<u32>, name: impl Into<String>) -> Self {
        Self {
            func,
            args,
            distinct: false,
            filter: None,
            name: name.into(),
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn with_filter(mut self, filter: u32) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn result_field(&self, input: &RowType) -> Result<Field> {
        for &a in self.args.iter().chain(self.filter.iter()) {
            if input.field(a as usize).is_none() {
                return Err(PlannerError::invalid_plan(format!(
                    "aggregate {} references ${a} outside {input}",
                    self.name
                )));
            }
        }
        let arg = self.args.first().and_then(|&a| input.field(a as usize));
        if self.func != AggFunc::Count && self.args.len() != 1 {
            return Err(PlannerError::invalid_plan(format!(
                "{} requires exactly one argument",
                self.func
            )));
        }
        self.func.result_field(&self.name, arg)
    }
}

impl fmt::Display for AggCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.func)?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        if self.args.is_empty() {
            write!(f, "*")?;
        }
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "${a}")?;
        }
        write!(f, ")")?;
        if let Some(filter) = self.filter {
            write!(f, " FILTER ${filter}")?;
        }
        write!(f, " AS {}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowFunc {
    RowNumber,
    Rank,
    Aggregate(AggFunc),
}

/// Window function call evaluated over the partition and order of its Window node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowCall {
    pub func: WindowFunc,
    pub args: Vec<u32>,
    pub name: String,
}

impl WindowCall {
    pub fn result_field(&self, input: &RowType) -> Result<Field> {
        match self.func {
            WindowFunc::RowNumber | WindowFunc::Rank => {
                Ok(Field::new(&self.name, DataType::Int64, false))
            }
            WindowFunc::Aggregate(func) => AggCall::new(func, self.args.clone(), &self.name)
                .result_field(input),
        }
    }
}

impl fmt::Display for WindowCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.func {
            WindowFunc::RowNumber => write!(f, "ROW_NUMBER()")?,
            WindowFunc::Rank => write!(f, "RANK()")?,
            WindowFunc::Aggregate(func) => {
                write!(f, "{func}(")?;
                for (i, a) in self.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "${a}")?;
                }
                write!(f, ")")?;
            }
        }
        write!(f, " AS {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emp() -> RowType {
        RowType::new(vec![
            Field::new("empno", DataType::Int32, false),
            Field::new("deptno", DataType::Int32, true),
            Field::new("sal", DataType::Int64, true),
        ])
    }

    #[test]
    fn test_column_equality_ignores_name() {
        assert_eq!(Expr::col(1, "deptno"), Expr::col(1, "dno"));
        assert_ne!(Expr::col(1, "deptno"), Expr::col(2, "deptno"));
    }

    #[test]
    fn test_simplify_folds_boolean_structure() {
        let pred = Expr::And(vec![
            Expr::true_lit(),
            Expr::gt(Expr::col(2, "sal"), Expr::lit(ScalarValue::Int64(10))),
            Expr::not(Expr::not(Expr::gt(
                Expr::col(2, "sal"),
                Expr::lit(ScalarValue::Int64(10)),
            ))),
        ]);
        assert_eq!(
            pred.simplify(),
            Expr::gt(Expr::col(2, "sal"), Expr::lit(ScalarValue::Int64(10)))
        );

        let never = Expr::And(vec![
            Expr::gt(Expr::col(2, "sal"), Expr::lit(ScalarValue::Int64(10))),
            Expr::eq(Expr::lit(ScalarValue::Int64(1)), Expr::lit(ScalarValue::Int64(2))),
        ]);
        assert!(never.simplify().is_always_false());
    }

    #[test]
    fn test_comparison_with_null_folds_to_null() {
        let e = Expr::eq(Expr::lit(ScalarValue::Null), Expr::lit(ScalarValue::Int64(1)));
        assert!(e.simplify().rejects_all());
    }

    #[test]
    fn test_shift_and_remap() {
        let e = Expr::eq(Expr::col(0, "a"), Expr::col(3, "b"));
        let shifted = e.shift(2).expect("ordinals stay non-negative");
        assert_eq!(shifted.input_refs().into_iter().collect::<Vec<_>>(), vec![2, 5]);
        // col 0 would land on -3.
        assert!(e.shift(-3).is_none());
        assert!(Expr::col(3, "b").shift(-3).is_some());
        assert!(e.remap(|i| if i == 0 { Some(5) } else { None }).is_none());
        let remapped = e.remap(|i| Some(i + 1)).expect("all columns mapped");
        assert_eq!(remapped.input_refs().into_iter().collect::<Vec<_>>(), vec![1, 4]);
    }

    #[test]
    fn test_cast_of_cast_is_collapsed_when_inner_widens() {
        let input = emp();
        let e = Expr::cast(Expr::cast(Expr::col(0, "empno"), DataType::Int64), DataType::Float64);
        assert_eq!(
            e.strip_redundant_casts(&input),
            Expr::cast(Expr::col(0, "empno"), DataType::Float64)
        );

        // Narrowing inner cast changes values: keep it.
        let lossy = Expr::cast(Expr::cast(Expr::col(2, "sal"), DataType::Int32), DataType::Int64);
        assert_eq!(lossy.strip_redundant_casts(&input), lossy);

        // Identity cast disappears.
        let id = Expr::cast(Expr::col(2, "sal"), DataType::Int64);
        assert_eq!(id.strip_redundant_casts(&input), Expr::col(2, "sal"));
    }

    #[test]
    fn test_types_and_nullability() {
        let input = emp();
        let e = Expr::binary(BinaryOp::Add, Expr::col(0, "empno"), Expr::col(2, "sal"));
        assert_eq!(e.data_type(&input).unwrap(), DataType::Int64);
        assert!(e.nullable(&input));
        assert!(!Expr::is_null(Expr::col(1, "deptno")).nullable(&input));
        assert!(Expr::col(7, "x").data_type(&input).is_err());
    }

    #[test]
    fn test_flatten_is_non_injective() {
        let e = Expr::gt(
            Expr::function(
                "FLATTEN",
                vec![Expr::col(0, "items")],
                DataType::Int64,
            ),
            Expr::lit(ScalarValue::Int64(0)),
        );
        assert!(e.contains_banned_function());
        assert!(!Expr::col(0, "a").contains_banned_function());
    }

    #[test]
    fn test_agg_call_result_types() {
        let input = emp();
        let count = AggCall::new(AggFunc::Count, vec![2], "c").distinct();
        let f = count.result_field(&input).unwrap();
        assert_eq!(f.data_type, DataType::Int64);
        assert!(!f.nullable);

        let sum = AggCall::new(AggFunc::Sum, vec![0], "s").result_field(&input).unwrap();
        assert_eq!(sum.data_type, DataType::Int64);
        assert!(sum.nullable);

        assert!(AggCall::new(AggFunc::Min, vec![], "m").result_field(&input).is_err());
    }
}
