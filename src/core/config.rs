//! Pool configuration
//!
//! A [`PoolConfig`] is handed to [`PoolRegistry::start_with_config`](super::registry::PoolRegistry::start_with_config)
//! and applies to every pool the registry opens afterwards.

use serde::Deserialize;
use std::time::Duration;

/// Default number of native connections per pool
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Settings shared by all pools of one registry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on concurrently borrowed delegates per pool
    pub max_connections: usize,
    /// How long `borrow_delegate` waits before failing with `PoolExhausted`
    ///
    /// `None` waits indefinitely.
    #[serde(with = "optional_millis")]
    pub acquire_timeout: Option<Duration>,
    /// Statement timeout inherited by new connectors, 0 disables it
    pub statement_timeout_milliseconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: None,
            statement_timeout_milliseconds: 0,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-pool connection limit
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Fail borrows that wait longer than `timeout`
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Set the statement timeout new connectors start with
    #[must_use]
    pub fn with_statement_timeout_milliseconds(mut self, milliseconds: u64) -> Self {
        self.statement_timeout_milliseconds = milliseconds;
        self
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
