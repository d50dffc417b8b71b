//! SQL script import driver.
//!
//! # Responsibility
//! - Split a SQL script into statements with source-line positions.
//! - Run a script on one connection inside a single transaction.
//!
//! # Invariants
//! - Statement boundaries are semicolons outside single-quoted strings.
//! - `--` line comments and `/* ... */` block comments never contribute
//!   statement text.
//! - A failed statement rolls back the whole run.

use crate::exec;
use crate::pool::{PoolError, PoolResult};
use rusqlite::Connection;

/// One executable statement with the line it starts on (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScriptStatement {
    pub sql: String,
    pub line: usize,
}

/// Splits `script` into executable statements.
///
/// Whitespace-only fragments (trailing newlines, empty `;;`) are dropped.
pub(crate) fn split_statements(script: &str) -> Vec<ScriptStatement> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut start_line = 0usize;
    let mut line = 1usize;
    let mut in_quote = false;

    let mut chars = script.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\n' {
            line += 1;
        }

        if in_quote {
            current.push(ch);
            if ch == '\'' {
                // A doubled quote re-enters the literal on the next match.
                in_quote = false;
            }
            continue;
        }

        match ch {
            '\'' => {
                in_quote = true;
                note_start(&mut start_line, &current, line);
                current.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        line += 1;
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        line += 1;
                    }
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
            }
            ';' => {
                let sql = current.trim();
                if !sql.is_empty() {
                    statements.push(ScriptStatement {
                        sql: sql.to_owned(),
                        line: start_line,
                    });
                }
                current.clear();
                start_line = 0;
            }
            _ => {
                if !ch.is_whitespace() {
                    note_start(&mut start_line, &current, line);
                }
                current.push(ch);
            }
        }
    }

    let sql = current.trim();
    if !sql.is_empty() {
        statements.push(ScriptStatement {
            sql: sql.to_owned(),
            line: start_line,
        });
    }

    statements
}

fn note_start(start_line: &mut usize, current: &str, line: usize) {
    if *start_line == 0 || current.trim().is_empty() {
        *start_line = line;
    }
}

/// Runs `statements` inside BEGIN/COMMIT on `conn`.
///
/// Returns the number of executed statements. The first failure issues a
/// ROLLBACK and reports the failing statement index and source line.
pub(crate) fn run_script(conn: &Connection, statements: &[ScriptStatement]) -> PoolResult<usize> {
    exec::run_literal(conn, "BEGIN")?;

    for (index, statement) in statements.iter().enumerate() {
        if let Err(err) = exec::run_literal(conn, &statement.sql) {
            let _ = exec::run_literal(conn, "ROLLBACK");
            return Err(PoolError::ImportFailed {
                statement: index,
                line: statement.line,
                message: err.to_string(),
            });
        }
    }

    exec::run_literal(conn, "COMMIT")?;
    Ok(statements.len())
}
