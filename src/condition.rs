use std::fmt;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use crate::error::StagewiseError;
use crate::ident::Ident;
use crate::probe::SchemaProbe;

/// A literal taken from a plan or data file. Always bound, never interpolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Real(r) => write!(f, "{}", r),
            SqlValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

/// One predicate of a `WHERE` clause. Conditions are combined with `AND`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Eq { column: String, value: SqlValue },
    Ne { column: String, value: SqlValue },
    In { column: String, values: Vec<SqlValue> },
    /// Case-insensitive for ASCII, as SQLite's `LIKE` is.
    Like { column: String, pattern: String },
    IsNull { column: String },
    NotNull { column: String },
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Eq { column, .. }
            | Condition::Ne { column, .. }
            | Condition::In { column, .. }
            | Condition::Like { column, .. }
            | Condition::IsNull { column }
            | Condition::NotNull { column } => column,
        }
    }

    fn render(&self, column: &str, params: &mut Vec<SqlValue>) -> String {
        match self {
            Condition::Eq { value, .. } => {
                params.push(value.clone());
                format!("{} = ?", column)
            }
            Condition::Ne { value, .. } => {
                params.push(value.clone());
                format!("{} <> ?", column)
            }
            Condition::In { values, .. } if values.is_empty() => "0".to_string(),
            Condition::In { values, .. } => {
                params.extend(values.iter().cloned());
                let marks = vec!["?"; values.len()].join(", ");
                format!("{} IN ({})", column, marks)
            }
            Condition::Like { pattern, .. } => {
                params.push(SqlValue::Text(pattern.clone()));
                format!("{} LIKE ?", column)
            }
            Condition::IsNull { .. } => format!("{} IS NULL", column),
            Condition::NotNull { .. } => format!("{} IS NOT NULL", column),
        }
    }
}

/// A rendered `WHERE` clause with its bound values in placeholder order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl WhereClause {
    /// Renders `conditions` against `table`, validating every column through
    /// the probe. Columns are qualified with the table name so the clause can
    /// be used in joins. An empty condition list renders as an empty string.
    pub fn build(
        probe: &SchemaProbe<'_>,
        table: &Ident,
        conditions: &[Condition],
    ) -> Result<Self, StagewiseError> {
        let mut params = Vec::new();
        let mut parts = Vec::with_capacity(conditions.len());

        for condition in conditions {
            let column = probe.checked_column(table, condition.column())?;
            let qualified = format!("{}.{}", table, column);
            parts.push(condition.render(&qualified, &mut params));
        }

        let sql = if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        };

        Ok(WhereClause { sql, params })
    }
}
