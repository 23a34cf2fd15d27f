//! Error types for the record binding system
//!
//! Every failure surfaced by a connector, pool or binder is a [`DatabaseError`].
//! Driver errors never pass through raw: each backend translates them with its
//! own `create_error_from_inner_error`, keeping the driver's error code.

use super::value::DatabaseRow;
use indexmap::IndexMap;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Connection error (generic)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The pool registry has not been started
    #[error("Connection pool registry has not been started")]
    PoolNotStarted,

    /// Connection pool exhausted
    #[error("Connection pool exhausted: {active}/{max} connections in use")]
    PoolExhausted { active: usize, max: usize },

    /// Invalid connection parameters
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Query execution error
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Zero rows where exactly one was expected
    #[error("Record not found: {0}")]
    NotFound(String),

    /// More than one row matched a single-record search condition
    #[error("Multiple records found: {0} rows matched")]
    MultipleRecordsFound(usize),

    /// Rows inserted or modified by another writer since `edit()`
    #[error("Record conflict: {} row(s) changed since edit", .records.len())]
    RecordConflict { records: Vec<DatabaseRow> },

    /// Rows still being edited here were deleted by another writer
    #[error("Record conflict: {} row(s) deleted since edit", .records.len())]
    RecordDeleted { records: Vec<DatabaseRow> },

    /// Per-column validation failures of one record
    #[error("Validation failed for column(s): {}", .messages.keys().cloned().collect::<Vec<_>>().join(", "))]
    RecordMapValidation { messages: IndexMap<String, String> },

    /// Operation requires an open transaction
    #[error("Transaction not started")]
    TransactionNotStarted,

    /// Transaction error
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// A write would be unscoped and the binding does not permit that
    #[error("Search condition missing")]
    SearchConditionMissing,

    /// Rows of the table are marked as being edited by another binder
    #[error("Records of {0} are being edited by another editor")]
    EditingByAnother(String),

    /// Operation requires the editing mark to be held
    #[error("Records are not being edited")]
    NotEditing,

    /// Translated driver error
    #[error("Driver error{}: {message}", .code.as_deref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    Driver {
        code: Option<String>,
        message: String,
    },

    /// Type conversion error
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Column not found
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Unsupported operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a new connection error (generic)
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionError(msg.into())
    }

    /// Create a pool exhausted error
    pub fn pool_exhausted(active: usize, max: usize) -> Self {
        DatabaseError::PoolExhausted { active, max }
    }

    /// Create a new query error
    pub fn query<S: Into<String>>(msg: S) -> Self {
        DatabaseError::QueryError(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        DatabaseError::NotFound(msg.into())
    }

    /// Create a driver error carrying an optional driver code
    pub fn driver<S: Into<String>>(code: Option<String>, message: S) -> Self {
        DatabaseError::Driver {
            code,
            message: message.into(),
        }
    }

    /// Create a new type mismatch error
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        DatabaseError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        DatabaseError::UnsupportedOperation(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// Whether this is the "does not exist" error kind
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound(_))
    }

    /// Whether this is an optimistic-concurrency conflict (modified, inserted or deleted rows)
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DatabaseError::RecordConflict { .. } | DatabaseError::RecordDeleted { .. }
        )
    }

    /// The driver-specific error code, when the error came from a driver
    pub fn code(&self) -> Option<&str> {
        match self {
            DatabaseError::Driver { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
