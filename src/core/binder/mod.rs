//! Record binding
//!
//! Fetch-for-edit, snapshot, conflict detection and write-back.

pub mod conflict;
pub mod record_binder;
pub mod single;
pub mod strategy;

pub use conflict::{partition_conflicts, ConflictReport};
pub use record_binder::{RecordBinder, RecordBinding};
pub use single::SingleRecordBinder;
pub use strategy::{edit_select, EditStrategy, PlainFetch, RowLockFetch};
