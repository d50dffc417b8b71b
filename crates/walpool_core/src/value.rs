//! Tagged SQL values and query output shapes.
//!
//! # Responsibility
//! - Define the value type exchanged between callers and bound statements.
//! - Define row/column/counter shapes returned by query execution.
//!
//! # Invariants
//! - `Boolean` exists only on the binding side; column reads materialize
//!   `Null | Integer | Double | Text | Blob`.
//! - Column metadata indexes match SQLite's 0-based result-column order.

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared-type fallback when SQLite reports no column type.
pub const UNKNOWN_DECL_TYPE: &str = "UNKNOWN";

/// Tagged value crossing the caller/SQL boundary.
///
/// Callers above the core hand over dynamically-typed parameters; keeping the
/// tag explicit here means binding never depends on host-language typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Integer(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Bound as integer 0/1; never produced by column reads.
    Boolean(bool),
}

impl SqlValue {
    /// Materializes a column value from a stepped row.
    pub(crate) fn from_column(value: ValueRef<'_>) -> rusqlite::Result<Self> {
        Ok(match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(v) => Self::Integer(v),
            ValueRef::Real(v) => Self::Double(v),
            ValueRef::Text(bytes) => Self::Text(
                std::str::from_utf8(bytes)
                    .map_err(rusqlite::Error::Utf8Error)?
                    .to_owned(),
            ),
            ValueRef::Blob(bytes) => Self::Blob(bytes.to_vec()),
        })
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Self::Double(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Self::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Self::Boolean(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
        })
    }
}

/// Result-column metadata collected once per prepared statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Result column name as reported by SQLite.
    pub name: String,
    /// Declared type string, or [`UNKNOWN_DECL_TYPE`] for expressions.
    pub decl_type: String,
    /// 0-based result column index.
    pub index: usize,
}

/// Complete outcome of one parameterized statement execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    /// Materialized rows keyed by column name.
    pub rows: Vec<HashMap<String, SqlValue>>,
    /// Column metadata in result order.
    pub columns: Vec<ColumnInfo>,
    /// Change-counter delta; 0 for read-only statements.
    pub rows_affected: u64,
    /// Last-inserted rowid; meaningful only after an INSERT completed.
    pub insert_row_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_binds_as_integer() {
        let bound = SqlValue::Boolean(true).to_sql().unwrap();
        assert_eq!(bound, ToSqlOutput::Owned(Value::Integer(1)));

        let bound = SqlValue::Boolean(false).to_sql().unwrap();
        assert_eq!(bound, ToSqlOutput::Owned(Value::Integer(0)));
    }

    #[test]
    fn column_reads_cover_all_storage_classes() {
        assert_eq!(
            SqlValue::from_column(ValueRef::Integer(7)).unwrap(),
            SqlValue::Integer(7)
        );
        assert_eq!(
            SqlValue::from_column(ValueRef::Real(1.5)).unwrap(),
            SqlValue::Double(1.5)
        );
        assert_eq!(
            SqlValue::from_column(ValueRef::Text(b"abc")).unwrap(),
            SqlValue::Text("abc".to_string())
        );
        assert_eq!(
            SqlValue::from_column(ValueRef::Blob(&[1, 2])).unwrap(),
            SqlValue::Blob(vec![1, 2])
        );
        assert_eq!(SqlValue::from_column(ValueRef::Null).unwrap(), SqlValue::Null);
    }
}
