//! Single-record binder
//!
//! A [`SingleRecordBinder`] is a [`RecordBinder`] whose predicate identifies at
//! most one row.

use super::record_binder::{RecordBinder, RecordBinding};
use super::strategy::{EditStrategy, PlainFetch};
use crate::core::connector::Connector;
use crate::core::delegate::Pool;
use crate::core::error::{DatabaseError, Result};
use crate::core::record::Record;
use crate::core::statement::DeleteBuilder;
use crate::core::where_set::WhereSet;

/// Binder holding zero or one record
pub struct SingleRecordBinder<B: RecordBinding, S: EditStrategy = PlainFetch> {
    inner: RecordBinder<B, S>,
}

impl<B: RecordBinding> SingleRecordBinder<B, PlainFetch> {
    pub fn new(binding: B) -> Self {
        Self {
            inner: RecordBinder::new(binding),
        }
    }
}

impl<B: RecordBinding, S: EditStrategy> SingleRecordBinder<B, S> {
    pub fn with_strategy(binding: B, strategy: S) -> Self {
        Self {
            inner: RecordBinder::with_strategy(binding, strategy),
        }
    }

    /// Bind to the row matching `where_set`
    #[must_use]
    pub fn with_where_set(mut self, where_set: WhereSet) -> Self {
        self.inner.set_where_set(Some(where_set));
        self
    }

    pub fn set_where_set(&mut self, where_set: Option<WhereSet>) {
        self.inner.set_where_set(where_set);
    }

    pub fn where_set(&self) -> Option<&WhereSet> {
        self.inner.where_set()
    }

    pub fn binding(&self) -> &B {
        self.inner.binding()
    }

    /// Underlying multi-record binder
    pub fn binder(&self) -> &RecordBinder<B, S> {
        &self.inner
    }

    pub fn binder_mut(&mut self) -> &mut RecordBinder<B, S> {
        &mut self.inner
    }

    /// The held record, if any
    pub fn record(&self) -> Option<&B::Record> {
        self.inner.records().first()
    }

    /// The held record, created from `Default` when none is held
    pub fn record_mut(&mut self) -> &mut B::Record {
        let records = self.inner.records_mut();
        if records.is_empty() {
            records.push(B::Record::default());
        }
        &mut records[0]
    }

    /// Replace the held record
    pub fn set_record(&mut self, record: B::Record) {
        let records = self.inner.records_mut();
        records.clear();
        records.push(record);
    }

    /// Whether the binding reports the held record as logically deleted
    pub fn is_deleted(&self) -> bool {
        self.record()
            .is_some_and(|record| self.inner.binding().is_deleted(record))
    }

    /// Fetch the bound row and snapshot it
    ///
    /// Fails with `NotFound` when no row matches and with
    /// `MultipleRecordsFound` when more than one does; the binder is left
    /// unbound in both cases.
    pub async fn edit<P: Pool>(&mut self, connector: &mut Connector<P>) -> Result<()> {
        self.inner.edit(connector).await?;
        match self.inner.records().len() {
            1 => Ok(()),
            0 => {
                self.inner.clear();
                Err(DatabaseError::not_found(format!(
                    "no row of {} matched",
                    self.inner.table().name()
                )))
            }
            n => {
                self.inner.clear();
                Err(DatabaseError::MultipleRecordsFound(n))
            }
        }
    }

    /// Insert the held record
    pub async fn insert<P: Pool>(&mut self, connector: &mut Connector<P>) -> Result<u64> {
        let record = self
            .record()
            .ok_or_else(|| DatabaseError::not_found("no record to insert"))?;
        connector.insert(&record.to_row(), self.inner.table()).await
    }

    /// Delete the bound row
    pub async fn physical_delete<P: Pool>(&mut self, connector: &mut Connector<P>) -> Result<u64> {
        let where_set = self
            .inner
            .search_condition()
            .cloned()
            .ok_or(DatabaseError::SearchConditionMissing)?;
        let delete = DeleteBuilder::new(self.inner.table().name()).where_set(Some(where_set));
        connector.execute(&delete.build(), &delete.params()).await
    }

    pub async fn detect_conflict<P: Pool>(&self, connector: &mut Connector<P>) -> Result<()> {
        self.inner.detect_conflict(connector).await
    }

    pub async fn update<P: Pool>(&mut self, connector: &mut Connector<P>) -> Result<()> {
        self.inner.update(connector).await
    }

    pub async fn exists<P: Pool>(&self, connector: &mut Connector<P>) -> Result<bool> {
        self.inner.exists(connector).await
    }

    pub fn validate(&self) -> Result<()> {
        self.inner.validate()
    }

    pub fn normalize(&mut self) -> Result<()> {
        self.inner.normalize()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
