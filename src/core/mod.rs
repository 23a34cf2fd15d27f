//! Backend-agnostic types and traits
//!
//! Values, predicates and statement builders, the [`Connector`] and its pool
//! seams, and the record binders built on top of them.

pub mod binder;
pub mod config;
pub mod connection;
pub mod connector;
pub mod database_types;
pub mod delegate;
pub mod error;
pub mod record;
pub mod registry;
pub mod statement;
pub mod value;
pub mod where_set;

// Re-export commonly used types
pub use binder::{
    ConflictReport, EditStrategy, PlainFetch, RecordBinder, RecordBinding, RowLockFetch,
    SingleRecordBinder,
};
pub use config::PoolConfig;
pub use connection::{ConnectionBuilder, ConnectionParameters};
pub use connector::{make_case_clause_from_map, make_case_clause_from_object, Connector};
pub use database_types::DatabaseType;
pub use delegate::{Delegate, Pool, PoolStats};
pub use error::{DatabaseError, Result};
pub use record::{Record, Table};
pub use registry::PoolRegistry;
pub use statement::{DeleteBuilder, InsertBuilder, OrderDirection, SelectBuilder, UpdateBuilder};
pub use value::{DatabaseResult, DatabaseRow, DatabaseValue, RowAccess};
pub use where_set::WhereSet;
