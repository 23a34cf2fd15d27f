//! SQLite delegate
//!
//! A [`SqliteDelegate`] owns one `rusqlite::Connection` claimed from a slot of
//! the [`SqlitePool`](super::sqlite_pool::SqlitePool). rusqlite is blocking, so
//! every call moves the connection into `spawn_blocking` and takes it back when
//! the call returns.

use super::sqlite_pool::SlotTable;
use crate::core::{
    database_types::DatabaseType, delegate::Delegate, error::DatabaseError, error::Result,
    value::DatabaseResult, value::DatabaseRow, value::DatabaseValue, value::TIMESTAMP_TEXT_FORMAT,
};
use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{params_from_iter, Connection, ErrorCode, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// SQLite transaction behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqliteIsolation {
    /// Locks are taken on first read or write
    #[default]
    Deferred,
    /// A write lock is taken immediately
    Immediate,
    /// The database is locked for every other writer immediately
    Exclusive,
}

impl SqliteIsolation {
    fn as_sql(&self) -> &'static str {
        match self {
            SqliteIsolation::Deferred => "BEGIN DEFERRED",
            SqliteIsolation::Immediate => "BEGIN IMMEDIATE",
            SqliteIsolation::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Translate a rusqlite error, keeping the SQLite result code
pub fn create_error_from_inner_error(error: rusqlite::Error) -> DatabaseError {
    match error {
        rusqlite::Error::QueryReturnedNoRows => DatabaseError::not_found("query returned no rows"),
        rusqlite::Error::SqliteFailure(inner, message) => DatabaseError::driver(
            Some(format!("{:?}", inner.code)),
            message.unwrap_or_else(|| inner.to_string()),
        ),
        other => DatabaseError::driver(None, other.to_string()),
    }
}

/// Whether the error leaves the connection unusable
fn is_fatal(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(inner, _)
            if matches!(
                inner.code,
                ErrorCode::SystemIoFailure
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::NotADatabase
                    | ErrorCode::CannotOpen
            )
    )
}

/// Convert a rusqlite Row to a DatabaseRow
fn row_to_database_row(row: &Row) -> rusqlite::Result<DatabaseRow> {
    let mut db_row = DatabaseRow::new();
    let column_count = row.as_ref().column_count();

    for i in 0..column_count {
        let column_name = row.as_ref().column_name(i)?.to_string();
        let value = match row.get_ref(i)? {
            rusqlite::types::ValueRef::Null => DatabaseValue::Null,
            rusqlite::types::ValueRef::Integer(v) => DatabaseValue::Long(v),
            rusqlite::types::ValueRef::Real(v) => DatabaseValue::Double(v),
            rusqlite::types::ValueRef::Text(v) => {
                DatabaseValue::String(String::from_utf8_lossy(v).to_string())
            }
            rusqlite::types::ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
        };
        db_row.insert(column_name, value);
    }

    Ok(db_row)
}

/// Convert DatabaseValue to rusqlite parameter
fn value_to_param(value: &DatabaseValue) -> Box<dyn rusqlite::ToSql> {
    match value {
        DatabaseValue::Null => Box::new(None::<i64>),
        DatabaseValue::Bool(v) => Box::new(*v),
        DatabaseValue::Int(v) => Box::new(*v),
        DatabaseValue::Long(v) => Box::new(*v),
        DatabaseValue::Float(v) => Box::new(*v),
        DatabaseValue::Double(v) => Box::new(*v),
        DatabaseValue::String(v) => Box::new(v.clone()),
        DatabaseValue::Bytes(v) => Box::new(v.clone()),
        DatabaseValue::Timestamp(v) => Box::new(*v),
    }
}

/// Busy timeout every pooled connection starts with and returns to on release
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open a connection the way every pool slot is initialised
pub(crate) fn open_connection(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // PRAGMA journal_mode returns a value, so it has to go through query_row
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    Ok(conn)
}

/// One borrowed SQLite connection
pub struct SqliteDelegate {
    slot: usize,
    connection: Option<Connection>,
    slots: Option<Arc<SlotTable>>,
    error_occurred: bool,
    busy_timeout_ms: Option<u64>,
}

impl SqliteDelegate {
    pub(crate) fn new(slot: usize, connection: Connection, slots: Arc<SlotTable>) -> Self {
        Self {
            slot,
            connection: Some(connection),
            slots: Some(slots),
            error_occurred: false,
            busy_timeout_ms: None,
        }
    }

    /// Slot of the pool this delegate occupies
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Restore the default busy timeout if this borrower changed it
    pub(crate) fn reset_statement_timeout(&mut self) -> Result<()> {
        if self.busy_timeout_ms.is_none() {
            return Ok(());
        }
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        connection
            .busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .map_err(create_error_from_inner_error)?;
        self.busy_timeout_ms = None;
        Ok(())
    }

    /// Hand the slot and the connection back; used by the pool on release
    pub(crate) fn detach(&mut self) -> Option<(Arc<SlotTable>, usize, Option<Connection>)> {
        let slots = self.slots.take()?;
        Some((slots, self.slot, self.connection.take()))
    }

    async fn run<T, F>(&mut self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let connection = self
            .connection
            .take()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        // Offload blocking database operations to blocking thread pool
        let task = tokio::task::spawn_blocking(move || {
            let result = f(&connection);
            (connection, result)
        });

        match task.await {
            Ok((connection, result)) => {
                self.connection = Some(connection);
                result.map_err(|e| {
                    if is_fatal(&e) {
                        self.error_occurred = true;
                    }
                    create_error_from_inner_error(e)
                })
            }
            Err(e) => {
                self.error_occurred = true;
                Err(DatabaseError::other(format!("Task join error: {}", e)))
            }
        }
    }
}

#[async_trait]
impl Delegate for SqliteDelegate {
    type TransactionOption = SqliteIsolation;

    fn database_type() -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn begin_statement(option: &SqliteIsolation) -> String {
        option.as_sql().to_string()
    }

    /// SQLite has no boolean or timestamp storage class: booleans bind as 0/1 and
    /// timestamps as `YYYY-MM-DD HH:MM:SS.ffffff` text, which sorts chronologically.
    fn normalize_bind_value(value: &DatabaseValue) -> DatabaseValue {
        match value {
            DatabaseValue::Bool(v) => DatabaseValue::Long(i64::from(*v)),
            DatabaseValue::Timestamp(micros) => match DateTime::from_timestamp_micros(*micros) {
                Some(dt) => DatabaseValue::String(dt.format(TIMESTAMP_TEXT_FORMAT).to_string()),
                None => DatabaseValue::Long(*micros),
            },
            other => other.clone(),
        }
    }

    /// The timeout is enforced through SQLite's busy handler
    async fn apply_statement_timeout(&mut self, milliseconds: u64) -> Result<()> {
        if self.busy_timeout_ms == Some(milliseconds) {
            return Ok(());
        }
        self.run(move |conn| conn.busy_timeout(Duration::from_millis(milliseconds)))
            .await?;
        self.busy_timeout_ms = Some(milliseconds);
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: Vec<DatabaseValue>) -> Result<u64> {
        let sql = sql.to_string();
        self.run(move |conn| {
            let rusqlite_params: Vec<Box<dyn rusqlite::ToSql>> =
                params.iter().map(value_to_param).collect();
            let mut stmt = conn.prepare(&sql)?;
            if stmt.column_count() == 0 {
                let affected = stmt.execute(params_from_iter(rusqlite_params.iter()))?;
                return Ok(affected as u64);
            }

            // Statements returning rows (SELECT, PRAGMA, RETURNING) are stepped to completion.
            let readonly = stmt.readonly();
            let mut rows = stmt.query(params_from_iter(rusqlite_params.iter()))?;
            while rows.next()?.is_some() {}
            drop(rows);
            if readonly {
                Ok(0)
            } else {
                Ok(conn.changes() as u64)
            }
        })
        .await
    }

    async fn query(&mut self, sql: &str, params: Vec<DatabaseValue>) -> Result<DatabaseResult> {
        let sql = sql.to_string();
        self.run(move |conn| {
            let rusqlite_params: Vec<Box<dyn rusqlite::ToSql>> =
                params.iter().map(value_to_param).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(rusqlite_params.iter()), row_to_database_row)?;

            let mut results = Vec::new();
            for row_result in rows {
                results.push(row_result?);
            }
            Ok(results)
        })
        .await
    }

    fn error_occurred(&self) -> bool {
        self.error_occurred || self.connection.is_none()
    }
}

impl Drop for SqliteDelegate {
    fn drop(&mut self) {
        // Dropped without going back through the pool: free the slot, never reuse the handle.
        if let Some((slots, slot, _connection)) = self.detach() {
            warn!(slot, "sqlite delegate dropped without release, discarding its connection");
            slots.free(slot, None);
        }
    }
}
