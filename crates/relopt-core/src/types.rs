//! # Row Types
//!
//! Every relational expression produces rows of a fixed shape. The row type of a node is a
//! pure function of its payload and the row types of its inputs, which is what lets the memo
//! verify that a rewrite produced an equivalent relation: all members of a group must have
//! structurally equal row types (field count, order, names, data types and nullability).

use crate::expr::JoinType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL data types understood by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Type of an untyped NULL literal.
    Null,
    Boolean,
    Int32,
    Int64,
    Float64,
    Utf8,
    /// Days since the Unix epoch.
    Date,
    /// Microseconds since the Unix epoch.
    Timestamp,
    List(Box<DataType>),
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64 | DataType::Float64)
    }

    /// True if every value of `from` converts to `self` without loss.
    ///
    /// Used to collapse `CAST(CAST(x AS a) AS b)` into `CAST(x AS b)`: dropping the inner
    /// cast is only legal when it could not have changed the value.
    pub fn is_lossless_widening_of(&self, from: &DataType) -> bool {
        if self == from {
            return true;
        }
        matches!(
            (from, self),
            (DataType::Null, _)
                | (DataType::Int32, DataType::Int64)
                | (DataType::Int32, DataType::Float64)
                | (DataType::Date, DataType::Timestamp)
        )
    }

    /// Result type of `SUM` over this type.
    pub fn sum_type(&self) -> DataType {
        match self {
            DataType::Int32 | DataType::Int64 => DataType::Int64,
            DataType::Float64 => DataType::Float64,
            other => other.clone(),
        }
    }

    /// Common type for arithmetic between two operands.
    pub fn arithmetic_result(left: &DataType, right: &DataType) -> DataType {
        match (left, right) {
            (DataType::Float64, _) | (_, DataType::Float64) => DataType::Float64,
            (DataType::Int64, _) | (_, DataType::Int64) => DataType::Int64,
            (DataType::Date, _) => DataType::Date,
            (DataType::Timestamp, _) => DataType::Timestamp,
            (DataType::Null, other) => other.clone(),
            (other, _) => other.clone(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Null => write!(f, "NULL"),
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Int32 => write!(f, "INTEGER"),
            DataType::Int64 => write!(f, "BIGINT"),
            DataType::Float64 => write!(f, "DOUBLE"),
            DataType::Utf8 => write!(f, "VARCHAR"),
            DataType::Date => write!(f, "DATE"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::List(elem) => write!(f, "ARRAY<{elem}>"),
        }
    }
}

/// A named, typed output column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    pub fn with_nullable(&self, nullable: bool) -> Self {
        Self {
            nullable,
            ..self.clone()
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// Ordered list of output fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowType {
    pub fields: Vec<Field>,
}

impl RowType {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self { fields: vec![] }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Keep only the given ordinals, in the given order.
    pub fn project(&self, ordinals: &[u32]) -> Option<RowType> {
        ordinals
            .iter()
            .map(|&i| self.fields.get(i as usize).cloned())
            .collect::<Option<Vec<_>>>()
            .map(RowType::new)
    }

    /// Row type of a join between `left` and `right`.
    ///
    /// Outer joins widen the null-generating side to nullable; SEMI and ANTI joins only
    /// produce the left input's fields.
    pub fn join(left: &RowType, right: &RowType, join_type: JoinType) -> RowType {
        let (left_nullable, right_nullable) = match join_type {
            JoinType::Left => (false, true),
            JoinType::Right => (true, false),
            JoinType::Full => (true, true),
            JoinType::Inner | JoinType::Cross | JoinType::Semi | JoinType::Anti => (false, false),
        };
        let mut fields: Vec<Field> = left
            .fields
            .iter()
            .map(|f| f.with_nullable(f.nullable || left_nullable))
            .collect();
        if join_type.projects_right() {
            fields.extend(
                right
                    .fields
                    .iter()
                    .map(|f| f.with_nullable(f.nullable || right_nullable)),
            );
        }
        RowType::new(fields)
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[(&str, DataType, bool)]) -> RowType {
        RowType::new(
            fields
                .iter()
                .map(|(n, t, null)| Field::new(*n, t.clone(), *null))
                .collect(),
        )
    }

    #[test]
    fn test_left_join_widens_right_side() {
        let emp = row(&[("empno", DataType::Int32, false)]);
        let dept = row(&[("deptno", DataType::Int32, false)]);
        let joined = RowType::join(&emp, &dept, JoinType::Left);
        assert!(!joined.fields[0].nullable);
        assert!(joined.fields[1].nullable);
    }

    #[test]
    fn test_semi_join_keeps_left_fields_only() {
        let emp = row(&[("empno", DataType::Int32, false), ("sal", DataType::Int64, true)]);
        let dept = row(&[("deptno", DataType::Int32, false)]);
        assert_eq!(RowType::join(&emp, &dept, JoinType::Semi), emp);
    }

    #[test]
    fn test_lossless_widening() {
        assert!(DataType::Int64.is_lossless_widening_of(&DataType::Int32));
        assert!(!DataType::Int32.is_lossless_widening_of(&DataType::Int64));
        assert!(!DataType::Int32.is_lossless_widening_of(&DataType::Float64));
    }
}
