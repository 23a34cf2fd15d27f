//! SQLite editing locks
//!
//! SQLite only locks whole database files, and only for the length of a
//! transaction. To keep other binders away from rows between `edit()` and
//! `update()`, a binder stamps an editing marker on the rows it fetched. The
//! check and the stamp run together inside an `EXCLUSIVE` transaction on a
//! separate connector, so two editors can never both see the rows as free.
//!
//! Where the markers live is decided by an [`EditingMarker`];
//! [`EditingTable`] keeps them in a side table of the same database.

use super::sqlite::SqliteIsolation;
use super::sqlite_pool::SqliteConnector;
use crate::core::binder::{edit_select, PlainFetch, RecordBinder, RecordBinding, SingleRecordBinder};
use crate::core::error::{DatabaseError, Result};
use crate::core::record::{Record, Table};
use crate::core::statement::{DeleteBuilder, SelectBuilder};
use crate::core::value::{DatabaseResult, DatabaseValue};
use crate::core::where_set::WhereSet;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of the marker covering a whole table
pub const TABLE_WIDE_IDENTIFIER: &str = "*";

/// Rows an editing marker is asked about
#[derive(Debug, Clone, Copy)]
pub struct EditingScope<'a> {
    pub table: &'a Table,
    /// Predicate of the binder; `None` covers the whole table
    pub where_set: Option<&'a WhereSet>,
    /// Identifiers of the fetched rows
    pub identifiers: &'a [String],
    /// Editor asking; `None` means any editor
    pub editor_id: Option<&'a str>,
}

impl EditingScope<'_> {
    pub fn is_table_wide(&self) -> bool {
        self.where_set.map_or(true, WhereSet::is_empty)
    }
}

/// Storage of per-row editing markers
///
/// Each call receives a connector already inside an `EXCLUSIVE` transaction.
#[async_trait]
pub trait EditingMarker: Send + Sync {
    /// Whether an editor other than `scope.editor_id` holds a marker in scope
    async fn is_editing_by_another(
        &self,
        connector: &mut SqliteConnector,
        scope: &EditingScope<'_>,
    ) -> Result<bool>;

    /// Stamp the markers of `scope` for `scope.editor_id`
    async fn update_to_editing(&self, connector: &mut SqliteConnector, scope: &EditingScope<'_>) -> Result<()>;

    /// Clear the markers of `scope`
    async fn update_to_editing_finish(
        &self,
        connector: &mut SqliteConnector,
        scope: &EditingScope<'_>,
    ) -> Result<()>;
}

/// Markers kept in a side table keyed by `(table_name, identifier)`
#[derive(Debug, Clone)]
pub struct EditingTable {
    name: String,
}

impl Default for EditingTable {
    fn default() -> Self {
        Self::new("record_editing")
    }
}

impl EditingTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the marker table when it does not exist yet
    pub async fn ensure_schema(&self, connector: &mut SqliteConnector) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             table_name TEXT NOT NULL, \
             identifier TEXT NOT NULL, \
             editor_id TEXT NOT NULL, \
             started_at TEXT NOT NULL, \
             PRIMARY KEY (table_name, identifier))",
            self.name
        );
        connector.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Markers a scope touches: its rows plus the table-wide marker
    fn covered(scope: &EditingScope<'_>) -> WhereSet {
        let where_set = WhereSet::new().eq("table_name", scope.table.name());
        if scope.is_table_wide() {
            return where_set;
        }
        where_set.group(
            WhereSet::new()
                .eq("identifier", TABLE_WIDE_IDENTIFIER)
                .in_list("identifier", scope.identifiers.iter().map(String::as_str))
                .or_where(),
        )
    }
}

#[async_trait]
impl EditingMarker for EditingTable {
    async fn is_editing_by_another(
        &self,
        connector: &mut SqliteConnector,
        scope: &EditingScope<'_>,
    ) -> Result<bool> {
        let mut where_set = Self::covered(scope);
        if let Some(editor_id) = scope.editor_id {
            where_set = where_set.ne("editor_id", editor_id);
        }
        let count = SelectBuilder::count(self.name.as_str()).where_set(Some(where_set));
        let value = connector.fetch_field(&count.build(), &count.params()).await?;
        Ok(value.as_long().unwrap_or(0) > 0)
    }

    async fn update_to_editing(&self, connector: &mut SqliteConnector, scope: &EditingScope<'_>) -> Result<()> {
        let editor_id = scope
            .editor_id
            .ok_or_else(|| DatabaseError::other("an editor id is required to mark rows"))?;
        let sql = format!(
            "INSERT OR REPLACE INTO {} (table_name, identifier, editor_id, started_at) VALUES (?, ?, ?, ?)",
            self.name
        );
        let started_at = DatabaseValue::from(Utc::now());

        let identifiers: Vec<&str> = if scope.is_table_wide() {
            vec![TABLE_WIDE_IDENTIFIER]
        } else {
            scope.identifiers.iter().map(String::as_str).collect()
        };
        for identifier in identifiers {
            let params = [
                DatabaseValue::from(scope.table.name()),
                DatabaseValue::from(identifier),
                DatabaseValue::from(editor_id),
                started_at.clone(),
            ];
            connector.execute(&sql, &params).await?;
        }
        Ok(())
    }

    /// With an editor every marker it holds on the table is cleared, whichever
    /// rows they cover; without one only the markers in scope are.
    async fn update_to_editing_finish(
        &self,
        connector: &mut SqliteConnector,
        scope: &EditingScope<'_>,
    ) -> Result<()> {
        let where_set = match scope.editor_id {
            Some(editor_id) => WhereSet::new()
                .eq("table_name", scope.table.name())
                .eq("editor_id", editor_id),
            None => Self::covered(scope),
        };
        let delete = DeleteBuilder::new(self.name.as_str()).where_set(Some(where_set));
        connector.execute(&delete.build(), &delete.params()).await?;
        Ok(())
    }
}

/// A binder the editing lock can wrap
#[async_trait]
pub trait EditTarget: Send + Sync {
    async fn edit(&mut self, connector: &mut SqliteConnector) -> Result<()>;

    async fn update(&mut self, connector: &mut SqliteConnector) -> Result<()>;

    fn table(&self) -> &Table;

    fn search_condition(&self) -> Option<&WhereSet>;

    fn order_by_columns(&self) -> Vec<String>;

    /// Identifiers of the held records
    fn identifiers(&self) -> Vec<String>;

    /// Identifiers of freshly fetched rows
    fn identifiers_of_rows(&self, rows: &DatabaseResult) -> Result<Vec<String>>;

    fn clear(&mut self);
}

#[async_trait]
impl<B: RecordBinding> EditTarget for RecordBinder<B, PlainFetch> {
    async fn edit(&mut self, connector: &mut SqliteConnector) -> Result<()> {
        RecordBinder::edit(self, connector).await
    }

    async fn update(&mut self, connector: &mut SqliteConnector) -> Result<()> {
        RecordBinder::update(self, connector).await
    }

    fn table(&self) -> &Table {
        RecordBinder::table(self)
    }

    fn search_condition(&self) -> Option<&WhereSet> {
        RecordBinder::search_condition(self)
    }

    fn order_by_columns(&self) -> Vec<String> {
        self.binding().order_by_columns_for_edit()
    }

    fn identifiers(&self) -> Vec<String> {
        RecordBinder::identifiers(self)
    }

    fn identifiers_of_rows(&self, rows: &DatabaseResult) -> Result<Vec<String>> {
        rows.iter()
            .map(|row| B::Record::from_row(row).map(|record| self.binding().identifier(&record)))
            .collect()
    }

    fn clear(&mut self) {
        RecordBinder::clear(self);
    }
}

#[async_trait]
impl<B: RecordBinding> EditTarget for SingleRecordBinder<B, PlainFetch> {
    async fn edit(&mut self, connector: &mut SqliteConnector) -> Result<()> {
        SingleRecordBinder::edit(self, connector).await
    }

    async fn update(&mut self, connector: &mut SqliteConnector) -> Result<()> {
        SingleRecordBinder::update(self, connector).await
    }

    fn table(&self) -> &Table {
        self.binder().table()
    }

    fn search_condition(&self) -> Option<&WhereSet> {
        self.binder().search_condition()
    }

    fn order_by_columns(&self) -> Vec<String> {
        self.binding().order_by_columns_for_edit()
    }

    fn identifiers(&self) -> Vec<String> {
        self.binder().identifiers()
    }

    fn identifiers_of_rows(&self, rows: &DatabaseResult) -> Result<Vec<String>> {
        self.binder().identifiers_of_rows(rows)
    }

    fn clear(&mut self) {
        SingleRecordBinder::clear(self);
    }
}

/// Binder holding an editing lock on its rows between `edit()` and `close()`
pub struct SqliteEditingBinder<T: EditTarget, M: EditingMarker = EditingTable> {
    target: T,
    marker: M,
    editor_id: String,
    is_editing: bool,
    locked_identifiers: Vec<String>,
}

/// Locking binder over a set of rows
pub type SqliteRecordBinder<B, M = EditingTable> = SqliteEditingBinder<RecordBinder<B>, M>;

/// Locking binder over one row
pub type SqliteSingleEditingBinder<B, M = EditingTable> = SqliteEditingBinder<SingleRecordBinder<B>, M>;

impl<T: EditTarget, M: EditingMarker + Default> SqliteEditingBinder<T, M> {
    pub fn new(target: T) -> Self {
        Self::with_marker(target, M::default())
    }
}

impl<T: EditTarget, M: EditingMarker> SqliteEditingBinder<T, M> {
    /// Wrap `target`, keeping markers through `marker`
    pub fn with_marker(target: T, marker: M) -> Self {
        Self {
            target,
            marker,
            editor_id: Uuid::new_v4().to_string(),
            is_editing: false,
            locked_identifiers: Vec::new(),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn marker(&self) -> &M {
        &self.marker
    }

    /// Identity stamped on the markers this binder holds
    pub fn editor_id(&self) -> &str {
        &self.editor_id
    }

    /// Whether this binder holds its editing markers
    pub fn is_editing(&self) -> bool {
        self.is_editing
    }

    fn scope<'a>(&'a self, identifiers: &'a [String], editor_id: Option<&'a str>) -> EditingScope<'a> {
        EditingScope {
            table: self.target.table(),
            where_set: self.target.search_condition(),
            identifiers,
            editor_id,
        }
    }

    fn require_exclusive(connector: &SqliteConnector) -> Result<()> {
        match connector.transaction_option() {
            Some(SqliteIsolation::Exclusive) => Ok(()),
            _ => Err(DatabaseError::transaction(
                "editing locks require an EXCLUSIVE transaction",
            )),
        }
    }

    /// Check for another editor and stamp the markers
    async fn mark(&self, connector: &mut SqliteConnector, identifiers: &[String]) -> Result<()> {
        let scope = self.scope(identifiers, Some(&self.editor_id));
        if self.marker.is_editing_by_another(connector, &scope).await? {
            return Err(DatabaseError::EditingByAnother(scope.table.name().to_string()));
        }
        self.marker.update_to_editing(connector, &scope).await
    }

    async fn unmark(&self, connector: &mut SqliteConnector) -> Result<()> {
        let scope = self.scope(&self.locked_identifiers, Some(&self.editor_id));
        self.marker.update_to_editing_finish(connector, &scope).await
    }

    async fn unmark_any(&self, connector: &mut SqliteConnector) -> Result<()> {
        let identifiers = if !self.locked_identifiers.is_empty() {
            self.locked_identifiers.clone()
        } else {
            let identifiers = self.target.identifiers();
            if identifiers.is_empty() && self.target.search_condition().is_some() {
                let select = edit_select(
                    self.target.table(),
                    self.target.search_condition(),
                    &self.target.order_by_columns(),
                );
                let rows = connector.fetch_records(&select.build(), &select.params()).await?;
                self.target.identifiers_of_rows(&rows)?
            } else {
                identifiers
            }
        };
        let scope = self.scope(&identifiers, None);
        self.marker.update_to_editing_finish(connector, &scope).await
    }

    /// Fresh sibling of `connector` inside an EXCLUSIVE transaction
    async fn begin_lock(connector: &SqliteConnector) -> (SqliteConnector, Result<()>) {
        let mut lock = connector.sibling();
        let result = match lock.connect().await {
            Ok(()) => lock.begin(SqliteIsolation::Exclusive).await,
            Err(e) => Err(e),
        };
        (lock, result)
    }

    /// Commit on success, then release the lock connector whatever happened
    ///
    /// A release failure is logged and dropped.
    async fn end_lock(mut lock: SqliteConnector, result: Result<()>) -> Result<()> {
        let result = match result {
            Ok(()) => lock.commit().await,
            Err(e) => Err(e),
        };
        if let Err(e) = lock.release().await {
            warn!(error = %e, "failed to release editing lock connector");
        }
        result
    }

    /// Fetch the rows and take the editing markers on them
    ///
    /// A binder already editing returns at once. When another editor holds
    /// any of the rows the fetched records are dropped and `EditingByAnother`
    /// is returned. The fetch runs on `connector`; the markers are taken on a
    /// sibling connector, so `connector` must not hold a write transaction.
    pub async fn edit(&mut self, connector: &mut SqliteConnector) -> Result<()> {
        if self.is_editing {
            return Ok(());
        }
        self.target.edit(connector).await?;

        let identifiers = self.target.identifiers();
        let (mut lock, result) = Self::begin_lock(connector).await;
        let result = match result {
            Ok(()) => self.mark(&mut lock, &identifiers).await,
            Err(e) => Err(e),
        };
        let result = Self::end_lock(lock, result).await;
        self.lock_taken(result, identifiers)
    }

    fn lock_taken(&mut self, result: Result<()>, identifiers: Vec<String>) -> Result<()> {
        match result {
            Ok(()) => {
                debug!(
                    table = self.target.table().name(),
                    editor = %self.editor_id,
                    rows = identifiers.len(),
                    "editing lock acquired"
                );
                self.is_editing = true;
                self.locked_identifiers = identifiers;
                Ok(())
            }
            Err(e) => {
                warn!(table = self.target.table().name(), error = %e, "editing lock refused");
                self.target.clear();
                Err(e)
            }
        }
    }

    fn lock_dropped(&mut self) {
        debug!(
            table = self.target.table().name(),
            editor = %self.editor_id,
            "editing lock released"
        );
        self.is_editing = false;
        self.locked_identifiers.clear();
        self.target.clear();
    }

    /// Write the records back; the editing lock must be held
    pub async fn update(&mut self, connector: &mut SqliteConnector) -> Result<()> {
        if !self.is_editing {
            return Err(DatabaseError::NotEditing);
        }
        self.target.update(connector).await
    }

    /// Clear this binder's markers and drop the records
    ///
    /// When the markers cannot be cleared the binder stays editing so the call
    /// can be retried.
    pub async fn close(&mut self, connector: &SqliteConnector) -> Result<()> {
        if self.is_editing {
            let (mut lock, result) = Self::begin_lock(connector).await;
            let result = match result {
                Ok(()) => self.unmark(&mut lock).await,
                Err(e) => Err(e),
            };
            Self::end_lock(lock, result)
                .await
                .map_err(|e| self.close_failed(e))?;
        }
        self.lock_dropped();
        Ok(())
    }

    fn close_failed(&self, error: DatabaseError) -> DatabaseError {
        warn!(
            table = self.target.table().name(),
            editor = %self.editor_id,
            error = %error,
            "editing markers not cleared, still editing"
        );
        error
    }

    /// Clear the markers on the bound rows whoever holds them
    pub async fn forcibly_close(&mut self, connector: &SqliteConnector) -> Result<()> {
        let (mut lock, result) = Self::begin_lock(connector).await;
        let result = match result {
            Ok(()) => self.unmark_any(&mut lock).await,
            Err(e) => Err(e),
        };
        Self::end_lock(lock, result).await?;
        self.lock_dropped();
        Ok(())
    }

    /// [`edit`](Self::edit) inside the caller's EXCLUSIVE transaction
    ///
    /// Nothing is committed; the markers become visible when the caller commits.
    pub async fn edit_by_connector(&mut self, connector: &mut SqliteConnector) -> Result<()> {
        Self::require_exclusive(connector)?;
        if self.is_editing {
            return Ok(());
        }
        self.target.edit(connector).await?;

        let identifiers = self.target.identifiers();
        let result = self.mark(connector, &identifiers).await;
        self.lock_taken(result, identifiers)
    }

    /// [`close`](Self::close) inside the caller's EXCLUSIVE transaction
    pub async fn close_by_connector(&mut self, connector: &mut SqliteConnector) -> Result<()> {
        Self::require_exclusive(connector)?;
        if self.is_editing {
            self.unmark(connector).await.map_err(|e| self.close_failed(e))?;
        }
        self.lock_dropped();
        Ok(())
    }

    /// [`forcibly_close`](Self::forcibly_close) inside the caller's EXCLUSIVE transaction
    pub async fn forcibly_close_by_connector(&mut self, connector: &mut SqliteConnector) -> Result<()> {
        Self::require_exclusive(connector)?;
        self.unmark_any(connector).await?;
        self.lock_dropped();
        Ok(())
    }
}
