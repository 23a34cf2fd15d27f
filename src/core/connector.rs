//! Connector
//!
//! A [`Connector`] is one logical database connection. It borrows a delegate from
//! the pool registered for its [`ConnectionParameters`], funnels every statement
//! through four primitives (`execute`, `fetch_field`, `fetch_record`,
//! `fetch_records`) and tracks the transaction it has open.
//!
//! Every round trip takes `&mut self`, so one connector cannot be driven by two
//! operations at once.

use super::connection::ConnectionParameters;
use super::database_types::DatabaseType;
use super::delegate::{Delegate, Pool};
use super::error::{DatabaseError, Result};
use super::record::Table;
use super::registry::PoolRegistry;
use super::statement::{InsertBuilder, UpdateBuilder};
use super::value::{DatabaseResult, DatabaseRow, DatabaseValue};
use super::where_set::WhereSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Transaction option type of the delegates handed out by pool `P`
pub type TransactionOptionOf<P> = <<P as Pool>::Delegate as Delegate>::TransactionOption;

/// One logical database connection
pub struct Connector<P: Pool> {
    registry: Arc<PoolRegistry<P>>,
    parameters: ConnectionParameters,
    pool: Option<Arc<P>>,
    delegate: Option<P::Delegate>,
    statement_timeout_milliseconds: u64,
    transaction: Option<TransactionOptionOf<P>>,
}

impl<P: Pool> std::fmt::Debug for Connector<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("database", &self.parameters.database_type())
            .field("connected", &self.is_connected())
            .field("transaction", &self.transaction)
            .finish()
    }
}

impl<P: Pool> Connector<P> {
    /// Create an unconnected connector
    ///
    /// The statement timeout starts from the registry configuration.
    pub fn new(registry: Arc<PoolRegistry<P>>, parameters: ConnectionParameters) -> Self {
        let statement_timeout_milliseconds = registry
            .config()
            .map(|config| config.statement_timeout_milliseconds)
            .unwrap_or(0);
        Self {
            registry,
            parameters,
            pool: None,
            delegate: None,
            statement_timeout_milliseconds,
            transaction: None,
        }
    }

    /// A fresh, unconnected connector to the same target
    pub fn sibling(&self) -> Self {
        let mut sibling = Self::new(Arc::clone(&self.registry), self.parameters.clone());
        sibling.statement_timeout_milliseconds = self.statement_timeout_milliseconds;
        sibling
    }

    /// Target of this connector
    pub fn parameters(&self) -> &ConnectionParameters {
        &self.parameters
    }

    /// Registry the connector borrows from
    pub fn registry(&self) -> &Arc<PoolRegistry<P>> {
        &self.registry
    }

    /// Dialect of the delegates this connector uses
    pub fn database_type(&self) -> DatabaseType {
        <P::Delegate as Delegate>::database_type()
    }

    pub fn statement_timeout_milliseconds(&self) -> u64 {
        self.statement_timeout_milliseconds
    }

    /// Set the statement timeout; 0 disables it
    pub fn set_statement_timeout_milliseconds(&mut self, milliseconds: u64) {
        self.statement_timeout_milliseconds = milliseconds;
    }

    /// Whether a delegate is held
    pub fn is_connected(&self) -> bool {
        self.delegate.is_some()
    }

    /// Whether the held delegate reported a fatal error
    pub fn error_occurred(&self) -> bool {
        self.delegate
            .as_ref()
            .is_some_and(|delegate| delegate.error_occurred())
    }

    /// Borrow a delegate, releasing any previously held one first
    pub async fn connect(&mut self) -> Result<()> {
        self.release().await?;

        let pool = self.registry.get_or_open(&self.parameters)?;
        let delegate = pool.borrow_delegate().await?;
        debug!(database = %self.database_type(), "connector connected");

        self.pool = Some(pool);
        self.delegate = Some(delegate);
        Ok(())
    }

    /// Return the delegate to its pool
    ///
    /// An open transaction is rolled back first; a rollback failure is logged and
    /// swallowed. A failure returning the delegate is swallowed only when the
    /// delegate already reported a fatal error.
    pub async fn release(&mut self) -> Result<()> {
        if self.transaction.is_some() {
            if let Err(e) = self.execute("ROLLBACK", &[]).await {
                warn!(error = %e, "rollback on release failed");
            }
            self.transaction = None;
        }

        let delegate = match self.delegate.take() {
            Some(delegate) => delegate,
            None => return Ok(()),
        };
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => return Ok(()),
        };

        let error_occurred = delegate.error_occurred();
        match pool.release_delegate(delegate, error_occurred).await {
            Err(e) if error_occurred => {
                warn!(error = %e, "release of a broken delegate failed");
                Ok(())
            }
            Err(e) => Err(e),
            Ok(()) => {
                debug!(database = %self.database_type(), "connector released");
                Ok(())
            }
        }
    }

    async fn prepare(&mut self, params: &[DatabaseValue]) -> Result<(&mut P::Delegate, Vec<DatabaseValue>)> {
        let timeout = self.statement_timeout_milliseconds;
        let delegate = self
            .delegate
            .as_mut()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
        if timeout > 0 {
            delegate.apply_statement_timeout(timeout).await?;
        }
        let params = params
            .iter()
            .map(<P::Delegate as Delegate>::normalize_bind_value)
            .collect();
        Ok((delegate, params))
    }

    /// Execute a statement and return the number of affected rows
    pub async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let (delegate, params) = self.prepare(params).await?;
        delegate.execute(sql, params).await
    }

    /// Fetch every row of a query
    pub async fn fetch_records(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let (delegate, params) = self.prepare(params).await?;
        delegate.query(sql, params).await
    }

    /// Fetch the first row of a query; `NotFound` when there is none
    pub async fn fetch_record(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseRow> {
        self.fetch_records(sql, params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::not_found("query returned no rows"))
    }

    /// Fetch the first column of the first row; `NotFound` when there is none
    pub async fn fetch_field(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseValue> {
        self.fetch_record(sql, params)
            .await?
            .into_iter()
            .next()
            .map(|(_, value)| value)
            .ok_or_else(|| DatabaseError::not_found("query returned no columns"))
    }

    /// Insert `row`, restricted to the columns of `table`
    pub async fn insert(&mut self, row: &DatabaseRow, table: &Table) -> Result<u64> {
        let projected = table.project(row);
        if projected.is_empty() {
            return Err(DatabaseError::query(format!(
                "No columns to insert into {}",
                table.name()
            )));
        }
        let insert = InsertBuilder::from_row(table.name(), &projected);
        self.execute(&insert.build(), &insert.params()).await
    }

    /// Update the rows matching `where_set`; `NotFound` when none matched
    pub async fn update(&mut self, row: &DatabaseRow, table: &Table, where_set: &WhereSet) -> Result<u64> {
        let projected = table.project(row);
        if projected.is_empty() {
            return Err(DatabaseError::query(format!(
                "No columns to update in {}",
                table.name()
            )));
        }
        let update = UpdateBuilder::from_row(table.name(), &projected).where_set(Some(where_set.clone()));
        let affected = self.execute(&update.build(), &update.params()).await?;
        if affected == 0 {
            return Err(DatabaseError::not_found(format!(
                "no rows of {} matched the update",
                table.name()
            )));
        }
        Ok(affected)
    }

    /// Open a transaction with the dialect option
    pub async fn begin(&mut self, option: TransactionOptionOf<P>) -> Result<()> {
        if self.transaction.is_some() {
            return Err(DatabaseError::transaction("Already in a transaction"));
        }
        let sql = <P::Delegate as Delegate>::begin_statement(&option);
        self.execute(&sql, &[]).await?;
        self.transaction = Some(option);
        Ok(())
    }

    /// Commit the open transaction
    pub async fn commit(&mut self) -> Result<()> {
        if self.transaction.is_none() {
            return Err(DatabaseError::TransactionNotStarted);
        }
        self.execute("COMMIT", &[]).await?;
        self.transaction = None;
        Ok(())
    }

    /// Roll back the open transaction
    pub async fn rollback(&mut self) -> Result<()> {
        if self.transaction.is_none() {
            return Err(DatabaseError::TransactionNotStarted);
        }
        self.execute("ROLLBACK", &[]).await?;
        self.transaction = None;
        Ok(())
    }

    pub fn is_transaction_begun(&self) -> bool {
        self.transaction.is_some()
    }

    /// Option the open transaction was begun with
    pub fn transaction_option(&self) -> Option<&TransactionOptionOf<P>> {
        self.transaction.as_ref()
    }
}

/// `" CASE column WHEN k THEN v ... END"` from ordered key -> value entries
///
/// String keys are quoted, numeric keys are not.
pub fn make_case_clause_from_map<K, V>(column: &str, entries: impl IntoIterator<Item = (K, V)>) -> String
where
    K: Into<DatabaseValue>,
    V: Into<DatabaseValue>,
{
    let mut clause = format!(" CASE {}", column);
    for (key, value) in entries {
        clause.push_str(&format!(
            " WHEN {} THEN {}",
            key.into().to_sql_literal(),
            value.into().to_sql_literal()
        ));
    }
    clause.push_str(" END");
    clause
}

/// [`make_case_clause_from_map`] over named keys, which are always quoted
pub fn make_case_clause_from_object<'a, V>(
    column: &str,
    entries: impl IntoIterator<Item = (&'a str, V)>,
) -> String
where
    V: Into<DatabaseValue>,
{
    make_case_clause_from_map(
        column,
        entries
            .into_iter()
            .map(|(key, value)| (DatabaseValue::from(key), value)),
    )
}
