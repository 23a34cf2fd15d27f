//! Record binder
//!
//! [`RecordBinder`] binds a set of rows, selected by a [`WhereSet`], to typed
//! records and writes them back under optimistic concurrency control:
//!
//! 1. `edit()` fetches the rows and keeps a snapshot of them;
//! 2. the caller mutates, adds or removes records in memory;
//! 3. `update()`, inside a transaction, re-reads storage, refuses to write when
//!    another writer changed the rows since the snapshot, then replaces the
//!    stored set with the working set (one DELETE, one INSERT per record).
//!
//! What a concrete binding knows about its table is expressed by
//! [`RecordBinding`]; the algorithm itself is written once here.

use super::conflict::partition_conflicts;
use super::strategy::{edit_select, EditStrategy, PlainFetch};
use crate::core::connector::Connector;
use crate::core::delegate::Pool;
use crate::core::error::{DatabaseError, Result};
use crate::core::record::{Record, Table};
use crate::core::statement::{DeleteBuilder, SelectBuilder};
use crate::core::value::{DatabaseResult, DatabaseValue};
use crate::core::where_set::WhereSet;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::{debug, warn};

/// Capabilities a concrete binding supplies to the binder
pub trait RecordBinding: Send + Sync {
    /// Typed record bound to one row
    type Record: Record;

    /// Table the records live in
    fn table(&self) -> &Table;

    /// Stable identity of a record across fetches
    fn identifier(&self, record: &Self::Record) -> String;

    /// When the row was last written, if the table tracks it
    ///
    /// Matched rows whose current time is strictly newer than the snapshot's
    /// are reported as conflicts.
    fn last_update_time(&self, _record: &Self::Record) -> Option<DateTime<Utc>> {
        None
    }

    /// ORDER BY columns for `edit()`
    fn order_by_columns_for_edit(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether `update()` may delete the whole table when no predicate is set
    fn is_permitted_update_when_empty_search_condition(&self) -> bool {
        false
    }

    /// Check one column value; `Err` carries the message reported for the column
    fn value_validate(&self, _column: &str, _value: &DatabaseValue) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Rewrite one column value into its stored form
    fn value_normalize(&self, _column: &str, value: &DatabaseValue) -> DatabaseValue {
        value.clone()
    }

    /// Whether the record is logically deleted
    fn is_deleted(&self, _record: &Self::Record) -> bool {
        false
    }
}

/// Optimistic-concurrency binder over a set of rows
pub struct RecordBinder<B: RecordBinding, S: EditStrategy = PlainFetch> {
    binding: B,
    strategy: S,
    where_set: Option<WhereSet>,
    records: Vec<B::Record>,
    pre_edit_records: Option<Vec<B::Record>>,
    is_conflict_ignored: bool,
}

impl<B: RecordBinding> RecordBinder<B, PlainFetch> {
    /// Binder fetching rows with a plain SELECT
    pub fn new(binding: B) -> Self {
        Self::with_strategy(binding, PlainFetch)
    }
}

impl<B: RecordBinding, S: EditStrategy> RecordBinder<B, S> {
    /// Binder fetching rows for edit through `strategy`
    pub fn with_strategy(binding: B, strategy: S) -> Self {
        Self {
            binding,
            strategy,
            where_set: None,
            records: Vec::new(),
            pre_edit_records: None,
            is_conflict_ignored: false,
        }
    }

    /// Bind to the rows matching `where_set`
    #[must_use]
    pub fn with_where_set(mut self, where_set: WhereSet) -> Self {
        self.where_set = Some(where_set);
        self
    }

    pub fn set_where_set(&mut self, where_set: Option<WhereSet>) {
        self.where_set = where_set;
    }

    pub fn where_set(&self) -> Option<&WhereSet> {
        self.where_set.as_ref()
    }

    /// Predicate actually applied; an empty set counts as none
    pub(crate) fn search_condition(&self) -> Option<&WhereSet> {
        self.where_set.as_ref().filter(|w| !w.is_empty())
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    pub fn binding_mut(&mut self) -> &mut B {
        &mut self.binding
    }

    pub fn table(&self) -> &Table {
        self.binding.table()
    }

    /// Working set
    pub fn records(&self) -> &[B::Record] {
        &self.records
    }

    /// Mutable working set; records may be changed, added or removed
    pub fn records_mut(&mut self) -> &mut Vec<B::Record> {
        &mut self.records
    }

    /// Snapshot taken by the last successful `edit()`
    pub fn pre_edit_records(&self) -> Option<&[B::Record]> {
        self.pre_edit_records.as_deref()
    }

    /// Whether `edit()` has succeeded since construction or the last `clear()`
    pub fn is_bound(&self) -> bool {
        self.pre_edit_records.is_some()
    }

    pub fn is_conflict_ignored(&self) -> bool {
        self.is_conflict_ignored
    }

    /// Skip conflict detection in `update()`
    pub fn set_conflict_ignored(&mut self, ignored: bool) {
        self.is_conflict_ignored = ignored;
    }

    /// Drop the working set and the snapshot
    pub fn clear(&mut self) {
        self.records.clear();
        self.pre_edit_records = None;
    }

    /// Identifiers of the working set
    pub fn identifiers(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|record| self.binding.identifier(record))
            .collect()
    }

    fn to_records(rows: &DatabaseResult) -> Result<Vec<B::Record>> {
        rows.iter().map(B::Record::from_row).collect()
    }

    /// Fetch the bound rows and snapshot them
    pub async fn edit<P: Pool>(&mut self, connector: &mut Connector<P>) -> Result<()> {
        let order_by = self.binding.order_by_columns_for_edit();
        let rows = self
            .strategy
            .fetch_for_edit(connector, self.binding.table(), self.search_condition(), &order_by)
            .await?;
        let records = Self::to_records(&rows)?;
        debug!(
            table = self.binding.table().name(),
            count = records.len(),
            "records fetched for edit"
        );

        self.pre_edit_records = Some(records.clone());
        self.records = records;
        Ok(())
    }

    /// Compare the snapshot against what is stored now
    ///
    /// Fails with `RecordConflict` for rows inserted or modified by another
    /// writer, then with `RecordDeleted` for rows another writer removed while
    /// they are still in the working set. A binder that was never edited has
    /// nothing to compare and passes.
    pub async fn detect_conflict<P: Pool>(&self, connector: &mut Connector<P>) -> Result<()> {
        let pre_edit = match &self.pre_edit_records {
            Some(pre_edit) => pre_edit,
            None => return Ok(()),
        };

        let order_by = self.binding.order_by_columns_for_edit();
        let select = edit_select(self.binding.table(), self.search_condition(), &order_by);
        let rows = connector.fetch_records(&select.build(), &select.params()).await?;
        let current = Self::to_records(&rows)?;

        let report = partition_conflicts(
            pre_edit,
            &current,
            &self.records,
            |record| self.binding.identifier(record),
            |record| self.binding.last_update_time(record),
        );

        if !report.conflicting.is_empty() {
            warn!(
                table = self.binding.table().name(),
                count = report.conflicting.len(),
                "records changed since edit"
            );
            return Err(DatabaseError::RecordConflict {
                records: report.conflicting.iter().map(Record::to_row).collect(),
            });
        }
        if !report.deleted.is_empty() {
            warn!(
                table = self.binding.table().name(),
                count = report.deleted.len(),
                "records deleted since edit"
            );
            return Err(DatabaseError::RecordDeleted {
                records: report.deleted.iter().map(Record::to_row).collect(),
            });
        }
        Ok(())
    }

    /// Replace the stored rows with the working set
    ///
    /// Requires an open transaction on `connector`. Conflict detection runs
    /// first unless ignored. Without a predicate the binding must permit an
    /// unscoped delete, otherwise `SearchConditionMissing` is returned before
    /// anything is written.
    pub async fn update<P: Pool>(&mut self, connector: &mut Connector<P>) -> Result<()> {
        if !connector.is_transaction_begun() {
            return Err(DatabaseError::TransactionNotStarted);
        }
        if !self.is_conflict_ignored {
            self.detect_conflict(connector).await?;
        }

        let where_set = self.search_condition().cloned();
        if where_set.is_none() && !self.binding.is_permitted_update_when_empty_search_condition() {
            return Err(DatabaseError::SearchConditionMissing);
        }

        let table = self.binding.table();
        let delete = DeleteBuilder::new(table.name()).where_set(where_set);
        let deleted = connector.execute(&delete.build(), &delete.params()).await?;
        for record in &self.records {
            connector.insert(&record.to_row(), table).await?;
        }

        debug!(
            table = table.name(),
            deleted,
            inserted = self.records.len(),
            "records written back"
        );
        Ok(())
    }

    /// Whether any row matches the predicate
    pub async fn exists<P: Pool>(&self, connector: &mut Connector<P>) -> Result<bool> {
        let where_set = self
            .search_condition()
            .cloned()
            .ok_or(DatabaseError::SearchConditionMissing)?;
        let count = SelectBuilder::count(self.binding.table().name()).where_set(Some(where_set));
        let value = connector.fetch_field(&count.build(), &count.params()).await?;
        Ok(value.as_long().unwrap_or(0) > 0)
    }

    /// Validate every column of every record
    ///
    /// All failing columns of the first invalid record are reported together.
    pub fn validate(&self) -> Result<()> {
        for record in &self.records {
            let row = self.binding.table().project(&record.to_row());
            let messages: IndexMap<String, String> = row
                .iter()
                .filter_map(|(column, value)| {
                    self.binding
                        .value_validate(column, value)
                        .err()
                        .map(|message| (column.clone(), message))
                })
                .collect();
            if !messages.is_empty() {
                return Err(DatabaseError::RecordMapValidation { messages });
            }
        }
        Ok(())
    }

    /// Rewrite every column of every record through the binding
    pub fn normalize(&mut self) -> Result<()> {
        for record in self.records.iter_mut() {
            let row = record
                .to_row()
                .into_iter()
                .map(|(column, value)| {
                    let normalized = self.binding.value_normalize(&column, &value);
                    (column, normalized)
                })
                .collect();
            *record = B::Record::from_row(&row)?;
        }
        Ok(())
    }
}
