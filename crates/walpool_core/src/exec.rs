//! SQL execution primitives used by connection workers.
//!
//! # Responsibility
//! - Bind tagged parameters, step prepared statements, materialize rows.
//! - Run literal (parameter-free) statements for PRAGMAs and transaction
//!   control.
//!
//! # Invariants
//! - `rows_affected` reports the change counter only for statements that
//!   write; read-only statements report 0.
//! - Column metadata is collected once per statement, before stepping.

use crate::value::{ColumnInfo, QueryOutcome, SqlValue, UNKNOWN_DECL_TYPE};
use rusqlite::{params_from_iter, Connection, Statement};
use std::collections::HashMap;

/// Executes a parameterized statement and materializes the full outcome.
///
/// Parameters bind by 1-based position in slice order. Rows are collected as
/// column-name keyed maps; ordering information lives in the returned column
/// metadata.
pub fn run_query(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> rusqlite::Result<QueryOutcome> {
    let mut stmt = conn.prepare(sql)?;
    let writes = !stmt.readonly();
    let columns = collect_columns(&stmt);

    let mut collected = Vec::new();
    {
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            let mut record = HashMap::with_capacity(columns.len());
            for column in &columns {
                record.insert(
                    column.name.clone(),
                    SqlValue::from_column(row.get_ref(column.index)?)?,
                );
            }
            collected.push(record);
        }
    }

    Ok(QueryOutcome {
        rows: collected,
        columns,
        rows_affected: if writes { conn.changes() } else { 0 },
        insert_row_id: conn.last_insert_rowid(),
    })
}

/// Executes a parameter-free statement, discarding any produced rows.
///
/// PRAGMA statements may return a result row (`journal_mode` does); stepping
/// through and ignoring rows keeps one code path for PRAGMAs, ATTACH/DETACH
/// and transaction control.
pub fn run_literal(conn: &Connection, sql: &str) -> rusqlite::Result<u64> {
    let mut stmt = conn.prepare(sql)?;
    let writes = !stmt.readonly();
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    drop(rows);
    Ok(if writes { conn.changes() } else { 0 })
}

fn collect_columns(stmt: &Statement<'_>) -> Vec<ColumnInfo> {
    stmt.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| ColumnInfo {
            name: column.name().to_owned(),
            decl_type: column
                .decl_type()
                .unwrap_or(UNKNOWN_DECL_TYPE)
                .to_owned(),
            index,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER, label TEXT);")
            .unwrap();
        conn
    }

    #[test]
    fn insert_reports_counters() {
        let conn = scratch_db();
        let outcome = run_query(
            &conn,
            "INSERT INTO t (x, label) VALUES (?1, ?2)",
            &[SqlValue::Integer(7), SqlValue::Text("seven".into())],
        )
        .unwrap();

        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.insert_row_id, 1);
        assert!(outcome.rows.is_empty());
    }

    #[test]
    fn select_materializes_rows_and_metadata() {
        let conn = scratch_db();
        run_query(
            &conn,
            "INSERT INTO t (x, label) VALUES (?1, ?2)",
            &[SqlValue::Integer(7), SqlValue::Text("seven".into())],
        )
        .unwrap();

        let outcome = run_query(&conn, "SELECT x, label FROM t", &[]).unwrap();
        assert_eq!(outcome.rows_affected, 0);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0]["x"], SqlValue::Integer(7));
        assert_eq!(outcome.rows[0]["label"], SqlValue::Text("seven".into()));

        assert_eq!(outcome.columns.len(), 2);
        assert_eq!(outcome.columns[0].name, "x");
        assert_eq!(outcome.columns[0].decl_type, "INTEGER");
        assert_eq!(outcome.columns[0].index, 0);
        assert_eq!(outcome.columns[1].name, "label");
        assert_eq!(outcome.columns[1].decl_type, "TEXT");
    }

    #[test]
    fn expression_column_reports_unknown_decl_type() {
        let conn = scratch_db();
        let outcome = run_query(&conn, "SELECT 1 + 1 AS total", &[]).unwrap();
        assert_eq!(outcome.columns[0].decl_type, UNKNOWN_DECL_TYPE);
        assert_eq!(outcome.rows[0]["total"], SqlValue::Integer(2));
    }

    #[test]
    fn boolean_parameter_binds_as_integer() {
        let conn = scratch_db();
        run_query(
            &conn,
            "INSERT INTO t (x) VALUES (?1)",
            &[SqlValue::Boolean(true)],
        )
        .unwrap();

        let outcome = run_query(&conn, "SELECT x FROM t", &[]).unwrap();
        assert_eq!(outcome.rows[0]["x"], SqlValue::Integer(1));
    }

    #[test]
    fn literal_steps_pragma_rows() {
        let conn = scratch_db();
        assert_eq!(run_literal(&conn, "PRAGMA synchronous = NORMAL").unwrap(), 0);
        let affected = run_literal(&conn, "INSERT INTO t (x) VALUES (3)").unwrap();
        assert_eq!(affected, 1);
    }
}
