//! Query execution
//!
//! SQL runs verbatim against the store. The executor itself does not inspect the
//! text; a [`StatementGate`] chosen by the caller sees the prepared statement first.

use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, Statement};
use serde_json::{Map, Value};

use crate::storage::SqliteStore;
use crate::{Error, Result};

/// One result row, column name → value, in select-list order
pub type Row = Map<String, Value>;

/// Decides whether a prepared statement may run
pub trait StatementGate: Send + Sync {
    /// `Err(reason)` rejects the statement
    fn check(&self, sql: &str, stmt: &Statement<'_>) -> std::result::Result<(), String>;
}

/// Lets everything through
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl StatementGate for AllowAll {
    fn check(&self, _sql: &str, _stmt: &Statement<'_>) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Only statements SQLite reports as read-only
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyGate;

impl StatementGate for ReadOnlyGate {
    fn check(&self, _sql: &str, stmt: &Statement<'_>) -> std::result::Result<(), String> {
        if stmt.readonly() {
            Ok(())
        } else {
            Err("statement would modify the database".to_string())
        }
    }
}

/// Runs SQL against the store and returns rows as ordered JSON maps
pub struct QueryExecutor {
    gate: Box<dyn StatementGate>,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(AllowAll)
    }
}

impl QueryExecutor {
    pub fn new(gate: impl StatementGate + 'static) -> Self {
        Self {
            gate: Box::new(gate),
        }
    }

    /// Execute one statement.
    ///
    /// Anything the store refuses (syntax, unknown columns, several statements,
    /// spatial function errors) is [`Error::Execution`] with the store's message.
    pub fn execute(&self, store: &SqliteStore, sql: &str) -> Result<Vec<Row>> {
        if sql.trim().is_empty() {
            return Err(Error::Execution("empty statement".to_string()));
        }

        let conn = store.connection();
        let statements = count_statements(conn, sql)?;
        if statements != 1 {
            return Err(Error::Execution(format!(
                "expected one statement, found {}",
                statements
            )));
        }

        let mut stmt = conn.prepare(sql).map_err(execution)?;
        self.gate.check(sql, &stmt).map_err(Error::Rejected)?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([]).map_err(execution)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().map_err(execution)? {
            let mut record = Map::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(execution)?;
                record.insert(name.clone(), value_to_json(value));
            }
            results.push(record);
        }

        tracing::debug!("Query returned {} rows", results.len());
        Ok(results)
    }
}

/// Statements in `sql`; `prepare` alone would compile the first and drop the rest
fn count_statements(conn: &Connection, sql: &str) -> Result<usize> {
    let mut batch = Batch::new(conn, sql);
    let mut count = 0;
    while batch.next().map_err(execution)?.is_some() {
        count += 1;
    }
    Ok(count)
}

fn execution(e: rusqlite::Error) -> Error {
    Error::Execution(e.to_string())
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}
