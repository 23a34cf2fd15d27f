//! PostgreSQL backend
//!
//! [`PostgresPool`] wraps a `deadpool_postgres::Pool` sized from the registry
//! configuration. Statements are written with `?` placeholders like everywhere
//! else in the crate and rewritten to `$n` before they reach the server. Bind
//! values are coerced to the parameter types the server reports for the
//! prepared statement, so a `Long` read from one table binds into an `int4`
//! column of another.
//!
//! Binders over PostgreSQL fetch for edit with [`RowLockFetch`].

use crate::core::{
    binder::{RecordBinder, RowLockFetch, SingleRecordBinder},
    config::PoolConfig,
    connection::{is_conninfo_key, quote_conninfo_value, ConnectionParameters},
    connector::Connector,
    database_types::DatabaseType,
    delegate::{Delegate, Pool, PoolStats},
    error::{DatabaseError, Result},
    registry::PoolRegistry,
    value::{DatabaseResult, DatabaseRow, DatabaseValue},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, PoolError, RecyclingMethod, Runtime};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, warn};

/// Registry of PostgreSQL pools
pub type PostgresRegistry = PoolRegistry<PostgresPool>;

/// Connector borrowing from PostgreSQL pools
pub type PostgresConnector = Connector<PostgresPool>;

/// Binder locking its rows with `FOR UPDATE NOWAIT` while editing
pub type PostgresRecordBinder<B> = RecordBinder<B, RowLockFetch>;

/// Single-row binder locking its row with `FOR UPDATE NOWAIT` while editing
pub type PostgresSingleRecordBinder<B> = SingleRecordBinder<B, RowLockFetch>;

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostgresIsolation {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl PostgresIsolation {
    fn as_sql(&self) -> &'static str {
        match self {
            PostgresIsolation::ReadCommitted => "BEGIN ISOLATION LEVEL READ COMMITTED",
            PostgresIsolation::RepeatableRead => "BEGIN ISOLATION LEVEL REPEATABLE READ",
            PostgresIsolation::Serializable => "BEGIN ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// Translate a tokio-postgres error, keeping the SQLSTATE code
pub fn create_error_from_inner_error(error: tokio_postgres::Error) -> DatabaseError {
    let code = error.code().map(|state| state.code().to_string());
    let message = match error.as_db_error() {
        Some(db_error) => db_error.message().to_string(),
        None => error.to_string(),
    };
    DatabaseError::driver(code, message)
}

fn create_error_from_pool_error(error: PoolError, borrowed: usize, max: usize) -> DatabaseError {
    match error {
        PoolError::Timeout(_) => DatabaseError::pool_exhausted(borrowed, max),
        PoolError::Closed => DatabaseError::connection("Connection pool has been ended"),
        PoolError::Backend(e) => create_error_from_inner_error(e),
        other => DatabaseError::connection(other.to_string()),
    }
}

/// Rewrite `?` placeholders to `$1, $2, ...`
///
/// Question marks inside quoted strings or quoted identifiers are left alone.
pub fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    let mut index = 0;

    for c in sql.chars() {
        match (quote, c) {
            (None, '\'' | '"') => {
                quote = Some(c);
                out.push(c);
            }
            (Some(q), _) if q == c => {
                // A doubled quote closes and reopens, which leaves the state right.
                quote = None;
                out.push(c);
            }
            (None, '?') => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> std::result::Result<DatabaseValue, tokio_postgres::Error> {
    let value = match ty.name() {
        "bool" => row.try_get::<_, Option<bool>>(idx)?.map(DatabaseValue::Bool),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| DatabaseValue::Int(i32::from(v))),
        "int4" => row.try_get::<_, Option<i32>>(idx)?.map(DatabaseValue::Int),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.map(DatabaseValue::Long),
        "float4" => row.try_get::<_, Option<f32>>(idx)?.map(DatabaseValue::Float),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.map(DatabaseValue::Double),
        "text" | "varchar" | "char" | "bpchar" | "name" => {
            row.try_get::<_, Option<String>>(idx)?.map(DatabaseValue::String)
        }
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(DatabaseValue::Bytes),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(DatabaseValue::from),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|v| DatabaseValue::from(v.and_utc())),
        // Types without a mapping come back as text when the driver allows it
        _ => row.try_get::<_, Option<String>>(idx).ok().flatten().map(DatabaseValue::String),
    };
    Ok(value.unwrap_or(DatabaseValue::Null))
}

/// Convert a tokio_postgres Row to a DatabaseRow
fn row_to_database_row(row: &Row) -> std::result::Result<DatabaseRow, tokio_postgres::Error> {
    let mut db_row = DatabaseRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        db_row.insert(column.name().to_string(), column_value(row, idx, column.type_())?);
    }
    Ok(db_row)
}

fn null_param(ty: &Type) -> BoxedParam {
    match ty.name() {
        "bool" => Box::new(None::<bool>),
        "int2" => Box::new(None::<i16>),
        "int4" => Box::new(None::<i32>),
        "int8" => Box::new(None::<i64>),
        "float4" => Box::new(None::<f32>),
        "float8" => Box::new(None::<f64>),
        "bytea" => Box::new(None::<Vec<u8>>),
        "timestamptz" => Box::new(None::<DateTime<Utc>>),
        "timestamp" => Box::new(None::<NaiveDateTime>),
        _ => Box::new(None::<String>),
    }
}

/// Convert DatabaseValue to a parameter of the type the server expects
fn value_to_param(value: &DatabaseValue, ty: &Type) -> Result<BoxedParam> {
    if value.is_null() {
        return Ok(null_param(ty));
    }
    let mismatch = || DatabaseError::type_mismatch(ty.name(), value.type_name());

    let param: BoxedParam = match ty.name() {
        "bool" => Box::new(value.as_bool().ok_or_else(mismatch)?),
        "int2" => Box::new(
            value
                .as_long()
                .and_then(|v| i16::try_from(v).ok())
                .ok_or_else(mismatch)?,
        ),
        "int4" => Box::new(
            value
                .as_long()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(mismatch)?,
        ),
        "int8" => Box::new(value.as_long().ok_or_else(mismatch)?),
        "float4" => Box::new(value.as_double().ok_or_else(mismatch)? as f32),
        "float8" => Box::new(value.as_double().ok_or_else(mismatch)?),
        "bytea" => Box::new(value.as_bytes().ok_or_else(mismatch)?.to_vec()),
        "timestamptz" => Box::new(value.as_datetime().ok_or_else(mismatch)?),
        "timestamp" => Box::new(value.as_datetime().ok_or_else(mismatch)?.naive_utc()),
        _ => Box::new(value.as_string()),
    };
    Ok(param)
}

/// One client borrowed from a [`PostgresPool`]
pub struct PostgresDelegate {
    client: Object,
    statement_timeout_ms: Option<u64>,
    error_occurred: bool,
}

impl PostgresDelegate {
    fn new(client: Object) -> Self {
        Self {
            client,
            statement_timeout_ms: None,
            error_occurred: false,
        }
    }

    fn record(&mut self, error: tokio_postgres::Error) -> DatabaseError {
        if error.is_closed() {
            self.error_occurred = true;
        }
        create_error_from_inner_error(error)
    }

    async fn prepare(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<(tokio_postgres::Statement, Vec<BoxedParam>)> {
        let sql = rewrite_placeholders(sql);
        let statement = match self.client.prepare_cached(&sql).await {
            Ok(statement) => statement,
            Err(e) => return Err(self.record(e)),
        };
        if statement.params().len() != params.len() {
            return Err(DatabaseError::query(format!(
                "statement expects {} parameter(s), {} given",
                statement.params().len(),
                params.len()
            )));
        }
        let params = params
            .iter()
            .zip(statement.params())
            .map(|(value, ty)| value_to_param(value, ty))
            .collect::<Result<Vec<_>>>()?;
        Ok((statement, params))
    }
}

fn param_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl Delegate for PostgresDelegate {
    type TransactionOption = PostgresIsolation;

    fn database_type() -> DatabaseType {
        DatabaseType::Postgres
    }

    fn begin_statement(option: &PostgresIsolation) -> String {
        option.as_sql().to_string()
    }

    /// Values are coerced per parameter type at bind time instead
    fn normalize_bind_value(value: &DatabaseValue) -> DatabaseValue {
        value.clone()
    }

    async fn apply_statement_timeout(&mut self, milliseconds: u64) -> Result<()> {
        if self.statement_timeout_ms == Some(milliseconds) {
            return Ok(());
        }
        let sql = format!("SET statement_timeout = {}", milliseconds);
        if let Err(e) = self.client.batch_execute(&sql).await {
            return Err(self.record(e));
        }
        self.statement_timeout_ms = Some(milliseconds);
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: Vec<DatabaseValue>) -> Result<u64> {
        let (statement, params) = self.prepare(sql, &params).await?;
        match self.client.execute(&statement, &param_refs(&params)).await {
            Ok(affected) => Ok(affected),
            Err(e) => Err(self.record(e)),
        }
    }

    async fn query(&mut self, sql: &str, params: Vec<DatabaseValue>) -> Result<DatabaseResult> {
        let (statement, params) = self.prepare(sql, &params).await?;
        let rows = match self.client.query(&statement, &param_refs(&params)).await {
            Ok(rows) => rows,
            Err(e) => return Err(self.record(e)),
        };
        rows.iter()
            .map(row_to_database_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(create_error_from_inner_error)
    }

    fn error_occurred(&self) -> bool {
        self.error_occurred || self.client.is_closed()
    }
}

/// Driver configuration for `parameters`
///
/// Host, database, user and password are set field by field. Extra options are
/// parsed from a quoted conninfo list, so no value can smuggle in another key.
pub fn postgres_config(parameters: &ConnectionParameters) -> Result<tokio_postgres::Config> {
    let ConnectionParameters::Postgres {
        host,
        port,
        database,
        username,
        password,
        options,
    } = parameters
    else {
        return Err(DatabaseError::InvalidConnectionString(format!(
            "expected postgres parameters, got {}",
            parameters.database_type()
        )));
    };

    let mut config = if options.is_empty() {
        tokio_postgres::Config::new()
    } else {
        let mut conninfo = Vec::with_capacity(options.len());
        for (key, value) in options {
            if !is_conninfo_key(key) {
                return Err(DatabaseError::InvalidConnectionString(format!(
                    "invalid connection option name: {:?}",
                    key
                )));
            }
            conninfo.push(format!("{}={}", key, quote_conninfo_value(value)));
        }
        conninfo
            .join(" ")
            .parse::<tokio_postgres::Config>()
            .map_err(|e| DatabaseError::InvalidConnectionString(e.to_string()))?
    };

    config.host(host).port(*port).dbname(database).user(username);
    if let Some(password) = password {
        config.password(password);
    }
    Ok(config)
}

/// Pool of PostgreSQL clients for one server and database
pub struct PostgresPool {
    pool: deadpool_postgres::Pool,
    max_connections: usize,
}

#[async_trait]
impl Pool for PostgresPool {
    type Delegate = PostgresDelegate;

    fn open(parameters: &ConnectionParameters, config: &PoolConfig) -> Result<Self> {
        let pg_config = postgres_config(parameters)?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = deadpool_postgres::Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(config.acquire_timeout)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| DatabaseError::connection(e.to_string()))?;

        Ok(Self {
            pool,
            max_connections: config.max_connections,
        })
    }

    async fn borrow_delegate(&self) -> Result<PostgresDelegate> {
        let client = self.pool.get().await.map_err(|e| {
            let status = self.pool.status();
            create_error_from_pool_error(e, status.size.saturating_sub(status.available), self.max_connections)
        })?;
        Ok(PostgresDelegate::new(client))
    }

    async fn release_delegate(&self, delegate: PostgresDelegate, error_occurred: bool) -> Result<()> {
        if error_occurred || delegate.error_occurred() {
            debug!("discarding postgres client after error");
            drop(Object::take(delegate.client));
            return Ok(());
        }

        if delegate.statement_timeout_ms.is_some() {
            if let Err(e) = delegate.client.batch_execute("RESET statement_timeout").await {
                warn!(error = %e, "failed to reset statement timeout, discarding client");
                drop(Object::take(delegate.client));
                return Err(create_error_from_inner_error(e));
            }
        }
        Ok(())
    }

    async fn end(&self) -> Result<()> {
        self.pool.close();
        debug!("postgres pool ended");
        Ok(())
    }

    fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            size: status.size,
            borrowed: status.size.saturating_sub(status.available),
            available: self.max_connections.saturating_sub(status.size) + status.available,
        }
    }
}
