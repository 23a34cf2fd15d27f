//! Driver implementations
//!
//! Each backend supplies a [`Pool`](crate::core::Pool) and its
//! [`Delegate`](crate::core::Delegate), plus type aliases that fix the
//! generic connector and binders to that backend.

#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "sqlite")]
pub mod sqlite_lock;
#[cfg(feature = "sqlite")]
pub mod sqlite_pool;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDelegate, SqliteIsolation};
#[cfg(feature = "sqlite")]
pub use sqlite_lock::{
    EditTarget, EditingMarker, EditingScope, EditingTable, SqliteEditingBinder, SqliteRecordBinder,
    SqliteSingleEditingBinder,
};
#[cfg(feature = "sqlite")]
pub use sqlite_pool::{SqliteConnector, SqlitePool, SqliteRegistry};

#[cfg(feature = "postgres")]
pub use postgres::{
    PostgresConnector, PostgresDelegate, PostgresIsolation, PostgresPool, PostgresRecordBinder,
    PostgresRegistry, PostgresSingleRecordBinder,
};
