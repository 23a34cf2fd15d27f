//! Connection parameters
//!
//! [`ConnectionParameters`] identifies a database target. Two connectors built from
//! equal parameters share one pool; the registry keys pools by [`ConnectionParameters::pool_key`].

use super::database_types::DatabaseType;
use super::error::{DatabaseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default PostgreSQL port
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Immutable description of a database target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionParameters {
    /// SQLite database file (or `:memory:`)
    Sqlite { path: String },
    /// PostgreSQL server
    Postgres {
        host: String,
        port: u16,
        database: String,
        username: String,
        password: Option<String>,
        #[serde(default)]
        options: BTreeMap<String, String>,
    },
}

impl ConnectionParameters {
    /// Parameters for an SQLite file
    pub fn sqlite<S: Into<String>>(path: S) -> Self {
        ConnectionParameters::Sqlite { path: path.into() }
    }

    /// Start building parameters for the given database type
    pub fn builder(db_type: DatabaseType) -> ConnectionBuilder {
        ConnectionBuilder::new(db_type)
    }

    /// Canonical key the registry uses to find the pool for these parameters
    ///
    /// Field order is fixed by the type and options are sorted, so equal
    /// parameters always produce the same key.
    pub fn pool_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.connection_string())
    }

    /// Dialect of the target
    pub fn database_type(&self) -> DatabaseType {
        match self {
            ConnectionParameters::Sqlite { .. } => DatabaseType::Sqlite,
            ConnectionParameters::Postgres { .. } => DatabaseType::Postgres,
        }
    }

    /// Driver connection string
    ///
    /// SQLite yields the file path. PostgreSQL yields a libpq-style `key='value'`
    /// list with every value quoted.
    pub fn connection_string(&self) -> String {
        match self {
            ConnectionParameters::Sqlite { path } => path.clone(),
            ConnectionParameters::Postgres {
                host,
                port,
                database,
                username,
                password,
                options,
            } => {
                let mut parts = vec![
                    format!("host={}", quote_conninfo_value(host)),
                    format!("port={}", port),
                    format!("dbname={}", quote_conninfo_value(database)),
                    format!("user={}", quote_conninfo_value(username)),
                ];
                if let Some(password) = password {
                    parts.push(format!("password={}", quote_conninfo_value(password)));
                }
                for (key, value) in options {
                    parts.push(format!("{}={}", key, quote_conninfo_value(value)));
                }
                parts.join(" ")
            }
        }
    }
}

/// Single-quote a conninfo value, escaping `\` and `'`
pub(crate) fn quote_conninfo_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

/// Whether `key` can name a conninfo option
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub(crate) fn is_conninfo_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Connection parameters builder
pub struct ConnectionBuilder {
    db_type: DatabaseType,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    options: BTreeMap<String, String>,
}

impl ConnectionBuilder {
    /// Create a new connection builder for the specified database type
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            options: BTreeMap::new(),
        }
    }

    /// Set the database host
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the database port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name (the file path for SQLite)
    pub fn database<S: Into<String>>(mut self, database: S) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username
    pub fn username<S: Into<String>>(mut self, username: S) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a custom option
    pub fn option<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Build the parameters
    pub fn build(self) -> Result<ConnectionParameters> {
        match self.db_type {
            DatabaseType::Sqlite => Ok(ConnectionParameters::Sqlite {
                path: self.database.unwrap_or_else(|| ":memory:".to_string()),
            }),
            DatabaseType::Postgres => {
                let database = self.database.ok_or_else(|| {
                    DatabaseError::InvalidConnectionString("database name is required".into())
                })?;
                let username = self.username.ok_or_else(|| {
                    DatabaseError::InvalidConnectionString("username is required".into())
                })?;
                Ok(ConnectionParameters::Postgres {
                    host: self.host.unwrap_or_else(|| "localhost".to_string()),
                    port: self.port.unwrap_or(DEFAULT_POSTGRES_PORT),
                    database,
                    username,
                    password: self.password,
                    options: self.options,
                })
            }
            DatabaseType::None => Err(DatabaseError::InvalidConnectionString(
                "database type not specified".into(),
            )),
        }
    }
}
