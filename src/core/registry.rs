//! Pool registry
//!
//! The registry owns one pool per distinct [`ConnectionParameters`] value. It has
//! an explicit lifecycle: nothing can connect before [`PoolRegistry::start`] and
//! [`PoolRegistry::end`] closes every pool it opened.

use super::config::PoolConfig;
use super::connection::ConnectionParameters;
use super::delegate::Pool;
use super::error::{DatabaseError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

struct RegistryState<P> {
    config: PoolConfig,
    pools: HashMap<String, Arc<P>>,
}

/// Registry of pools keyed by connection parameters
pub struct PoolRegistry<P: Pool> {
    state: Mutex<Option<RegistryState<P>>>,
}

impl<P: Pool> Default for PoolRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Pool> PoolRegistry<P> {
    /// Create a registry that has not been started
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Start the registry with a per-pool connection limit
    pub fn start(&self, max_connections: usize) {
        self.start_with_config(PoolConfig::new().with_max_connections(max_connections));
    }

    /// Start the registry; a no-op when it is already started
    pub fn start_with_config(&self, config: PoolConfig) {
        let mut state = self.state.lock();
        if state.is_some() {
            return;
        }
        debug!(max_connections = config.max_connections, "pool registry started");
        *state = Some(RegistryState {
            config,
            pools: HashMap::new(),
        });
    }

    /// Whether `start` has been called since construction or the last `end`
    pub fn is_started(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Configuration the registry was started with
    pub fn config(&self) -> Result<PoolConfig> {
        self.state
            .lock()
            .as_ref()
            .map(|state| state.config.clone())
            .ok_or(DatabaseError::PoolNotStarted)
    }

    /// Pool registered for `parameters`, if any
    pub fn get(&self, parameters: &ConnectionParameters) -> Result<Option<Arc<P>>> {
        let state = self.state.lock();
        let state = state.as_ref().ok_or(DatabaseError::PoolNotStarted)?;
        Ok(state.pools.get(&parameters.pool_key()).cloned())
    }

    /// Register `pool` for `parameters`, replacing any previous entry
    pub fn put(&self, parameters: &ConnectionParameters, pool: Arc<P>) -> Result<()> {
        let mut state = self.state.lock();
        let state = state.as_mut().ok_or(DatabaseError::PoolNotStarted)?;
        state.pools.insert(parameters.pool_key(), pool);
        Ok(())
    }

    /// Pool for `parameters`, opening and registering it on first use
    pub fn get_or_open(&self, parameters: &ConnectionParameters) -> Result<Arc<P>> {
        let mut state = self.state.lock();
        let state = state.as_mut().ok_or(DatabaseError::PoolNotStarted)?;

        let key = parameters.pool_key();
        if let Some(pool) = state.pools.get(&key) {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(P::open(parameters, &state.config)?);
        debug!(
            database = %parameters.database_type(),
            max_connections = pool.max_connections(),
            "pool opened"
        );
        state.pools.insert(key, Arc::clone(&pool));
        Ok(pool)
    }

    /// End every pool and return the registry to the unstarted state
    ///
    /// Every pool is ended even when one fails; the last failure is returned.
    pub async fn end(&self) -> Result<()> {
        let pools: Vec<Arc<P>> = match self.state.lock().take() {
            Some(state) => state.pools.into_values().collect(),
            None => return Ok(()),
        };

        let mut last_error = None;
        for pool in pools {
            if let Err(e) = pool.end().await {
                warn!(error = %e, "failed to end pool");
                last_error = Some(e);
            }
        }
        debug!("pool registry ended");

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
