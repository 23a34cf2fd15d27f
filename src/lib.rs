//! # Rust Record Binder
//!
//! Binds typed records to rows of a relational table and writes them back under
//! optimistic concurrency control, over pooled SQLite and PostgreSQL
//! connections.
//!
//! ## Features
//!
//! - **Connectors and pools**: one [`Connector`](core::Connector) per logical
//!   connection, borrowing native handles from a pool held in an explicit
//!   [`PoolRegistry`](core::PoolRegistry)
//! - **Record binding**: fetch for edit, snapshot, conflict detection and
//!   delete-then-reinsert write-back with [`RecordBinder`](core::RecordBinder)
//! - **Single records**: [`SingleRecordBinder`](core::SingleRecordBinder) for
//!   bindings that match exactly one row
//! - **SQLite editing locks**: an editing-marker handshake under an exclusive
//!   transaction keeps other binders off rows between edit and update
//! - **PostgreSQL row locks**: `SELECT ... FOR UPDATE NOWAIT` as the fetch
//!   strategy
//!
//! ## Supported Databases
//!
//! | Database | Feature | Pool | Edit locking |
//! |----------|---------|------|--------------|
//! | SQLite | `sqlite` (default) | slot table over rusqlite | editing markers |
//! | PostgreSQL | `postgres` | deadpool-postgres | `FOR UPDATE NOWAIT` |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_record_binder::prelude::*;
//! use std::sync::Arc;
//!
//! struct Users {
//!     table: Table,
//! }
//!
//! impl RecordBinding for Users {
//!     type Record = DatabaseRow;
//!
//!     fn table(&self) -> &Table {
//!         &self.table
//!     }
//!
//!     fn identifier(&self, record: &DatabaseRow) -> String {
//!         record.get("id").map(|v| v.as_string()).unwrap_or_default()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = Arc::new(SqliteRegistry::new());
//!     registry.start(8);
//!
//!     let mut connector = SqliteConnector::new(
//!         Arc::clone(&registry),
//!         ConnectionParameters::sqlite("app.db"),
//!     );
//!     connector.connect().await?;
//!
//!     let mut binder = RecordBinder::new(Users {
//!         table: Table::new("users", &["id", "name"]),
//!     })
//!     .with_where_set(WhereSet::new().eq("team", "core"));
//!
//!     binder.edit(&mut connector).await?;
//!     for user in binder.records_mut() {
//!         user.insert("name".to_string(), DatabaseValue::from("renamed"));
//!     }
//!
//!     connector.begin(SqliteIsolation::Immediate).await?;
//!     binder.update(&mut connector).await?;
//!     connector.commit().await?;
//!
//!     connector.release().await?;
//!     registry.end().await
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! rust_record_binder/
//! ├── src/
//! │   ├── core/              # Backend-agnostic types and traits
//! │   │   ├── binder/        # RecordBinder, SingleRecordBinder, strategies
//! │   │   ├── connector.rs   # Connector
//! │   │   ├── delegate.rs    # Pool and Delegate traits
//! │   │   ├── registry.rs    # PoolRegistry
//! │   │   ├── where_set.rs   # Predicates
//! │   │   └── ...
//! │   ├── backends/          # SQLite and PostgreSQL
//! │   └── lib.rs
//! ├── tests/                 # Integration and property tests
//! └── benches/
//! ```

/// Backend-agnostic types and traits
pub mod core;

/// Driver implementations
pub mod backends;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::core::{
        ConnectionParameters, Connector, DatabaseError, DatabaseResult, DatabaseRow, DatabaseType,
        DatabaseValue, PoolConfig, PoolRegistry, Record, RecordBinder, RecordBinding, Result,
        RowAccess, SingleRecordBinder, Table, WhereSet,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::backends::{
        EditingTable, SqliteConnector, SqliteIsolation, SqliteRecordBinder, SqliteRegistry,
        SqliteSingleEditingBinder,
    };

    #[cfg(feature = "postgres")]
    pub use crate::backends::{
        PostgresConnector, PostgresIsolation, PostgresRecordBinder, PostgresRegistry,
        PostgresSingleRecordBinder,
    };
}

// Re-export at root level for convenience
pub use core::{
    ConnectionParameters, Connector, DatabaseError, DatabaseResult, DatabaseRow, DatabaseType,
    DatabaseValue, PoolConfig, PoolRegistry, RecordBinder, RecordBinding, Result, SingleRecordBinder,
    WhereSet,
};
