//! Backend seam
//!
//! A [`Pool`] hands out [`Delegate`]s, each wrapping one native connection.
//! The connector and the binders are generic over these two traits; every
//! dialect-specific behaviour (transaction statements, bind normalisation,
//! statement timeouts, error translation) lives behind them.

use super::config::PoolConfig;
use super::connection::ConnectionParameters;
use super::database_types::DatabaseType;
use super::error::Result;
use super::value::{DatabaseResult, DatabaseValue};
use async_trait::async_trait;
use std::fmt::Debug;

/// One borrowed native connection
#[async_trait]
pub trait Delegate: Send + 'static {
    /// Dialect transaction option passed to `Connector::begin`
    type TransactionOption: Clone + Default + PartialEq + Debug + Send + Sync;

    /// Dialect of this delegate
    fn database_type() -> DatabaseType;

    /// Statement opening a transaction with the given option
    fn begin_statement(option: &Self::TransactionOption) -> String;

    /// Convert a value into the shape the driver binds
    fn normalize_bind_value(value: &DatabaseValue) -> DatabaseValue;

    /// Apply a statement timeout before the next statement runs
    async fn apply_statement_timeout(&mut self, milliseconds: u64) -> Result<()>;

    /// Execute a statement and return the number of affected rows
    async fn execute(&mut self, sql: &str, params: Vec<DatabaseValue>) -> Result<u64>;

    /// Execute a query and return its rows
    async fn query(&mut self, sql: &str, params: Vec<DatabaseValue>) -> Result<DatabaseResult>;

    /// Whether a fatal error left the native connection unusable
    fn error_occurred(&self) -> bool;
}

/// Snapshot of a pool's occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Native connections currently open
    pub size: usize,
    /// Delegates currently borrowed
    pub borrowed: usize,
    /// Delegates that can be borrowed without waiting
    pub available: usize,
}

/// Pool of delegates for one set of connection parameters
///
/// Implementations guarantee that at most `max_connections()` delegates are
/// borrowed at the same time.
#[async_trait]
pub trait Pool: Send + Sync + 'static {
    /// Delegate type handed out by this pool
    type Delegate: Delegate;

    /// Create a pool for `parameters`
    ///
    /// Native connections are opened lazily on borrow.
    fn open(parameters: &ConnectionParameters, config: &PoolConfig) -> Result<Self>
    where
        Self: Sized;

    /// Borrow a delegate, waiting while the pool is exhausted
    async fn borrow_delegate(&self) -> Result<Self::Delegate>;

    /// Return a delegate; with `error_occurred` its native connection is discarded
    async fn release_delegate(&self, delegate: Self::Delegate, error_occurred: bool) -> Result<()>;

    /// Close every native connection
    ///
    /// Keeps closing after a failure and returns the first error.
    async fn end(&self) -> Result<()>;

    /// Upper bound on concurrently borrowed delegates
    fn max_connections(&self) -> usize;

    /// Current occupancy
    fn stats(&self) -> PoolStats;
}
