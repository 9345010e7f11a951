//! WHERE conditions, joins and ordering

use dbs_core::SqlValue;
use serde::{Deserialize, Serialize};

/// Comparison operator of a [`Condition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// SQL spelling for the binary comparison operators
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

/// `column <op> value`; conditions in a list are joined with `AND`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub op: Operator,
    #[serde(default = "null_value")]
    pub value: SqlValue,
}

fn null_value() -> SqlValue {
    SqlValue::Null
}

impl Condition {
    pub fn new(column: impl Into<String>, op: Operator, value: impl Into<SqlValue>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, Operator::Ne, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, Operator::Gt, value)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, Operator::Gte, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, Operator::Lt, value)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, Operator::Lte, value)
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(column, Operator::Like, SqlValue::Text(pattern.into()))
    }

    pub fn is_in(column: impl Into<String>, values: impl Into<SqlValue>) -> Self {
        Self::new(column, Operator::In, values)
    }

    pub fn not_in(column: impl Into<String>, values: impl Into<SqlValue>) -> Self {
        Self::new(column, Operator::NotIn, values)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::new(column, Operator::IsNull, SqlValue::Null)
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::new(column, Operator::IsNotNull, SqlValue::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
}

/// `<kind> JOIN table ON left = right`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub left: String,
    pub right: String,
}

impl Join {
    pub fn inner(table: impl Into<String>, left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Inner,
            table: table.into(),
            left: left.into(),
            right: right.into(),
        }
    }

    pub fn left(table: impl Into<String>, left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Left,
            ..Self::inner(table, left, right)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Everything a `SELECT` can carry besides the column list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Select {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl From<Vec<Condition>> for Select {
    fn from(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            ..Self::default()
        }
    }
}
