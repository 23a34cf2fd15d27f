//! SQLite connection pool
//!
//! rusqlite has no pool of its own, so [`SqlitePool`] keeps a fixed table of
//! connection slots. A slot is claimed by setting its bit in an atomic busy
//! bitmap with compare-and-swap; a semaphore holding one permit per free slot
//! parks borrowers while every slot is busy. Connections are opened lazily the
//! first time their slot is claimed and stay open for reuse.
//!
//! Every slot of a `:memory:` target opens its own private database.

use super::sqlite::{create_error_from_inner_error, open_connection, SqliteDelegate};
use crate::core::{
    config::PoolConfig,
    connection::ConnectionParameters,
    connector::Connector,
    delegate::{Delegate, Pool, PoolStats},
    error::{DatabaseError, Result},
    registry::PoolRegistry,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Slots are tracked in one 64-bit bitmap
pub const MAX_SQLITE_CONNECTIONS: usize = 64;

/// Registry of SQLite pools
pub type SqliteRegistry = PoolRegistry<SqlitePool>;

/// Connector borrowing from SQLite pools
pub type SqliteConnector = Connector<SqlitePool>;

/// Fixed-capacity slot table shared by a pool and its delegates
pub struct SlotTable {
    slots: Vec<Mutex<Option<Connection>>>,
    busy: AtomicU64,
    available: Semaphore,
}

impl SlotTable {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            busy: AtomicU64::new(0),
            available: Semaphore::new(capacity),
        }
    }

    /// Claim the lowest free slot
    fn claim(&self) -> Option<usize> {
        let mut current = self.busy.load(Ordering::Acquire);
        loop {
            let free = (!current).trailing_zeros() as usize;
            if free >= self.slots.len() {
                return None;
            }
            match self.busy.compare_exchange_weak(
                current,
                current | (1u64 << free),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(free),
                Err(actual) => current = actual,
            }
        }
    }

    fn take_connection(&self, slot: usize) -> Option<Connection> {
        self.slots[slot].lock().take()
    }

    /// Return a slot; `connection` is kept for reuse unless the pool has ended
    pub(crate) fn free(&self, slot: usize, connection: Option<Connection>) {
        if let Some(connection) = connection {
            if !self.available.is_closed() {
                *self.slots[slot].lock() = Some(connection);
            }
        }
        self.busy.fetch_and(!(1u64 << slot), Ordering::AcqRel);
        self.available.add_permits(1);
    }

    fn borrowed(&self) -> usize {
        self.busy.load(Ordering::Acquire).count_ones() as usize
    }

    fn idle(&self) -> usize {
        self.slots.iter().filter(|slot| slot.lock().is_some()).count()
    }
}

/// Pool of SQLite connections to one database file
pub struct SqlitePool {
    path: String,
    slots: Arc<SlotTable>,
    max_connections: usize,
    acquire_timeout: Option<Duration>,
}

impl SqlitePool {
    async fn open_slot(&self, slot: usize) -> Result<Connection> {
        let path = self.path.clone();
        let connection = tokio::task::spawn_blocking(move || open_connection(&path))
            .await
            .map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))?
            .map_err(create_error_from_inner_error)?;
        debug!(slot, path = %self.path, "sqlite connection opened");
        Ok(connection)
    }
}

#[async_trait]
impl Pool for SqlitePool {
    type Delegate = SqliteDelegate;

    fn open(parameters: &ConnectionParameters, config: &PoolConfig) -> Result<Self> {
        let path = match parameters {
            ConnectionParameters::Sqlite { path } => path.clone(),
            other => {
                return Err(DatabaseError::InvalidConnectionString(format!(
                    "expected sqlite parameters, got {}",
                    other.database_type()
                )))
            }
        };
        if !(1..=MAX_SQLITE_CONNECTIONS).contains(&config.max_connections) {
            return Err(DatabaseError::connection(format!(
                "max_connections must be between 1 and {}, got {}",
                MAX_SQLITE_CONNECTIONS, config.max_connections
            )));
        }

        Ok(Self {
            path,
            slots: Arc::new(SlotTable::new(config.max_connections)),
            max_connections: config.max_connections,
            acquire_timeout: config.acquire_timeout,
        })
    }

    async fn borrow_delegate(&self) -> Result<SqliteDelegate> {
        let permit = match self.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.slots.available.acquire())
                .await
                .map_err(|_| {
                    DatabaseError::pool_exhausted(self.slots.borrowed(), self.max_connections)
                })?,
            None => self.slots.available.acquire().await,
        }
        .map_err(|_| DatabaseError::connection("Connection pool has been ended"))?;
        // The permit comes back through `SlotTable::free`.
        permit.forget();

        let slot = match self.slots.claim() {
            Some(slot) => slot,
            None => {
                self.slots.available.add_permits(1);
                return Err(DatabaseError::pool_exhausted(
                    self.slots.borrowed(),
                    self.max_connections,
                ));
            }
        };

        let connection = match self.slots.take_connection(slot) {
            Some(connection) => connection,
            None => match self.open_slot(slot).await {
                Ok(connection) => connection,
                Err(e) => {
                    self.slots.free(slot, None);
                    return Err(e);
                }
            },
        };

        Ok(SqliteDelegate::new(slot, connection, Arc::clone(&self.slots)))
    }

    async fn release_delegate(&self, mut delegate: SqliteDelegate, error_occurred: bool) -> Result<()> {
        let mut error_occurred = error_occurred || delegate.error_occurred();
        if !error_occurred {
            if let Err(e) = delegate.reset_statement_timeout() {
                warn!(slot = delegate.slot(), error = %e, "failed to reset busy timeout");
                error_occurred = true;
            }
        }
        let (slots, slot, connection) = match delegate.detach() {
            Some(parts) => parts,
            None => return Ok(()),
        };

        if !error_occurred {
            slots.free(slot, connection);
            return Ok(());
        }

        slots.free(slot, None);
        debug!(slot, "discarding sqlite connection after error");
        match connection {
            Some(connection) => connection
                .close()
                .map_err(|(_, e)| create_error_from_inner_error(e)),
            None => Ok(()),
        }
    }

    async fn end(&self) -> Result<()> {
        self.slots.available.close();

        let slots = Arc::clone(&self.slots);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut first_error = None;
            for (slot, cell) in slots.slots.iter().enumerate() {
                let connection = cell.lock().take();
                if let Some(connection) = connection {
                    if let Err((_, e)) = connection.close() {
                        warn!(slot, path = %path, error = %e, "failed to close sqlite connection");
                        first_error.get_or_insert(create_error_from_inner_error(e));
                    }
                }
            }
            debug!(path = %path, "sqlite pool ended");
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))?
    }

    fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn stats(&self) -> PoolStats {
        let borrowed = self.slots.borrowed();
        PoolStats {
            size: borrowed + self.slots.idle(),
            borrowed,
            available: self.slots.available.available_permits(),
        }
    }
}
