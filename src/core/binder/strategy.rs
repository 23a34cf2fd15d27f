//! Fetch-for-edit strategies
//!
//! How rows are acquired for editing is the one place the binding protocol
//! differs between dialects. [`PlainFetch`] reads them; [`RowLockFetch`] reads
//! them under native row locks that fail instead of waiting.

use crate::core::connector::Connector;
use crate::core::delegate::Pool;
use crate::core::error::{DatabaseError, Result};
use crate::core::record::Table;
use crate::core::statement::SelectBuilder;
use crate::core::value::DatabaseResult;
use crate::core::where_set::WhereSet;
use async_trait::async_trait;

/// SELECT over `table` scoped by `where_set` and ordered by `order_by`
pub fn edit_select(table: &Table, where_set: Option<&WhereSet>, order_by: &[String]) -> SelectBuilder {
    order_by.iter().fold(
        SelectBuilder::new(table.name())
            .table_columns(table)
            .where_set(where_set.cloned()),
        |select, column| select.order_by_asc(column),
    )
}

/// Acquire the rows a binder is about to edit
#[async_trait]
pub trait EditStrategy: Send + Sync {
    async fn fetch_for_edit<P: Pool>(
        &self,
        connector: &mut Connector<P>,
        table: &Table,
        where_set: Option<&WhereSet>,
        order_by: &[String],
    ) -> Result<DatabaseResult>;
}

/// Plain SELECT; concurrent edits are caught later by conflict detection
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFetch;

#[async_trait]
impl EditStrategy for PlainFetch {
    async fn fetch_for_edit<P: Pool>(
        &self,
        connector: &mut Connector<P>,
        table: &Table,
        where_set: Option<&WhereSet>,
        order_by: &[String],
    ) -> Result<DatabaseResult> {
        let select = edit_select(table, where_set, order_by);
        connector.fetch_records(&select.build(), &select.params()).await
    }
}

/// Native row locking for servers that support `NOWAIT`
///
/// With a predicate the rows are selected `FOR UPDATE NOWAIT`; without one the
/// whole table is locked `IN EXCLUSIVE MODE NOWAIT` before the SELECT. Either
/// way a held lock fails immediately rather than blocking. The locks last until
/// the connector's transaction ends, so one must be open.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowLockFetch;

impl RowLockFetch {
    /// Statements run for one fetch, in order; the last one returns the rows
    pub fn statements(table: &Table, where_set: Option<&WhereSet>, order_by: &[String]) -> Vec<String> {
        let select = edit_select(table, where_set, order_by);
        if select.has_where() {
            vec![select.for_update_nowait().build()]
        } else {
            vec![
                format!("LOCK TABLE {} IN EXCLUSIVE MODE NOWAIT", table.name()),
                select.build(),
            ]
        }
    }
}

#[async_trait]
impl EditStrategy for RowLockFetch {
    async fn fetch_for_edit<P: Pool>(
        &self,
        connector: &mut Connector<P>,
        table: &Table,
        where_set: Option<&WhereSet>,
        order_by: &[String],
    ) -> Result<DatabaseResult> {
        if !connector.is_transaction_begun() {
            return Err(DatabaseError::TransactionNotStarted);
        }

        let params = where_set.map(WhereSet::build_parameters).unwrap_or_default();
        let mut statements = Self::statements(table, where_set, order_by);
        let select = statements.pop().unwrap_or_default();
        for lock in &statements {
            connector.execute(lock, &[]).await?;
        }
        connector.fetch_records(&select, &params).await
    }
}
