//! SQL statement builders
//!
//! Builders render parameterized statements with `?` placeholders. Dialects that
//! need other placeholders rewrite them in their delegate.

use super::record::Table;
use super::value::{DatabaseRow, DatabaseValue};
use super::where_set::WhereSet;

fn push_where(sql: &mut String, where_set: Option<&WhereSet>) {
    if let Some(where_set) = where_set.filter(|w| !w.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(&where_set.build_placeholder_clause());
    }
}

fn where_params(where_set: Option<&WhereSet>) -> Vec<DatabaseValue> {
    where_set.map(WhereSet::build_parameters).unwrap_or_default()
}

/// ORDER BY direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order
    Asc,
    /// Descending order
    Desc,
}

impl OrderDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// SELECT query builder
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    where_set: Option<WhereSet>,
    order_by: Vec<(String, OrderDirection)>,
    lock_clause: Option<&'static str>,
}

impl SelectBuilder {
    /// Create a new SELECT query builder
    ///
    /// ```
    /// use rust_record_binder::core::statement::SelectBuilder;
    /// use rust_record_binder::core::where_set::WhereSet;
    ///
    /// let select = SelectBuilder::new("users")
    ///     .columns(&["id", "name"])
    ///     .where_set(Some(WhereSet::new().eq("id", 1)))
    ///     .order_by_asc("id");
    /// assert_eq!(select.build(), "SELECT id, name FROM users WHERE id = ? ORDER BY id ASC");
    /// ```
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec!["*".to_string()],
            where_set: None,
            order_by: Vec::new(),
            lock_clause: None,
        }
    }

    /// SELECT COUNT(*) over the table
    pub fn count(table: impl Into<String>) -> Self {
        Self::new(table).columns(&["COUNT(*) AS count"])
    }

    /// Select specific columns
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Select the declared columns of `table` (all columns when it declares none)
    #[must_use]
    pub fn table_columns(mut self, table: &Table) -> Self {
        if !table.columns().is_empty() {
            self.columns = table.columns().to_vec();
        }
        self
    }

    /// Scope the query with a predicate
    #[must_use]
    pub fn where_set(mut self, where_set: Option<WhereSet>) -> Self {
        self.where_set = where_set;
        self
    }

    /// Add ORDER BY clause
    #[must_use]
    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.order_by.push((column.to_string(), direction));
        self
    }

    /// Add ORDER BY ASC
    #[must_use]
    pub fn order_by_asc(self, column: &str) -> Self {
        self.order_by(column, OrderDirection::Asc)
    }

    /// Lock the selected rows without waiting (`FOR UPDATE NOWAIT`)
    #[must_use]
    pub fn for_update_nowait(mut self) -> Self {
        self.lock_clause = Some("FOR UPDATE NOWAIT");
        self
    }

    /// Table the query reads from
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether a non-empty predicate scopes the query
    pub fn has_where(&self) -> bool {
        self.where_set.as_ref().is_some_and(|w| !w.is_empty())
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);
        push_where(&mut sql, self.where_set.as_ref());

        if !self.order_by.is_empty() {
            let order_clauses: Vec<String> = self
                .order_by
                .iter()
                .map(|(col, dir)| format!("{} {}", col, dir.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_clauses.join(", "));
        }

        if let Some(lock_clause) = self.lock_clause {
            sql.push(' ');
            sql.push_str(lock_clause);
        }
        sql
    }

    /// Get the parameter values for parameterized queries
    pub fn params(&self) -> Vec<DatabaseValue> {
        where_params(self.where_set.as_ref())
    }
}

/// INSERT query builder
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl InsertBuilder {
    /// Create a new INSERT query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// INSERT of every column of `row`, in row order
    pub fn from_row(table: impl Into<String>, row: &DatabaseRow) -> Self {
        row.iter()
            .fold(Self::new(table), |builder, (column, value)| {
                builder.value(column, value.clone())
            })
    }

    /// Add a column-value pair
    #[must_use]
    pub fn value(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.columns.push(column.to_string());
        self.values.push(value.into());
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let placeholders: Vec<&str> = vec!["?"; self.values.len()];
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            self.columns.join(", "),
            placeholders.join(", ")
        )
    }

    /// Get the parameter values
    pub fn params(&self) -> Vec<DatabaseValue> {
        self.values.clone()
    }
}

/// UPDATE query builder
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    set_columns: Vec<String>,
    set_values: Vec<DatabaseValue>,
    where_set: Option<WhereSet>,
}

impl UpdateBuilder {
    /// Create a new UPDATE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set_columns: Vec::new(),
            set_values: Vec::new(),
            where_set: None,
        }
    }

    /// UPDATE setting every column of `row`
    pub fn from_row(table: impl Into<String>, row: &DatabaseRow) -> Self {
        row.iter()
            .fold(Self::new(table), |builder, (column, value)| {
                builder.set(column, value.clone())
            })
    }

    /// Set a column value
    #[must_use]
    pub fn set(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.set_columns.push(column.to_string());
        self.set_values.push(value.into());
        self
    }

    /// Scope the update with a predicate
    #[must_use]
    pub fn where_set(mut self, where_set: Option<WhereSet>) -> Self {
        self.where_set = where_set;
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let set_clauses: Vec<String> = self
            .set_columns
            .iter()
            .map(|col| format!("{} = ?", col))
            .collect();

        let mut sql = format!("UPDATE {} SET {}", self.table, set_clauses.join(", "));
        push_where(&mut sql, self.where_set.as_ref());
        sql
    }

    /// Get the parameter values (SET values followed by WHERE values)
    pub fn params(&self) -> Vec<DatabaseValue> {
        let mut params = self.set_values.clone();
        params.extend(where_params(self.where_set.as_ref()));
        params
    }
}

/// DELETE query builder
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    where_set: Option<WhereSet>,
}

impl DeleteBuilder {
    /// Create a new DELETE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_set: None,
        }
    }

    /// Scope the delete with a predicate
    #[must_use]
    pub fn where_set(mut self, where_set: Option<WhereSet>) -> Self {
        self.where_set = where_set;
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> String {
        let mut sql = format!("DELETE FROM {}", self.table);
        push_where(&mut sql, self.where_set.as_ref());
        sql
    }

    /// Get the parameter values
    pub fn params(&self) -> Vec<DatabaseValue> {
        where_params(self.where_set.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_basic() {
        let query = SelectBuilder::new("users").build();
        assert_eq!(query, "SELECT * FROM users");
    }

    #[test]
    fn test_select_table_columns() {
        let table = Table::new("users", &["id", "name", "email"]);
        let query = SelectBuilder::new(table.name()).table_columns(&table).build();
        assert_eq!(query, "SELECT id, name, email FROM users");
    }

    #[test]
    fn test_select_where_order_lock() {
        let builder = SelectBuilder::new("users")
            .where_set(Some(WhereSet::new().eq("id", 42).eq("status", "active")))
            .order_by_asc("id")
            .for_update_nowait();

        assert!(builder.has_where());
        assert_eq!(
            builder.build(),
            "SELECT * FROM users WHERE id = ? AND status = ? ORDER BY id ASC FOR UPDATE NOWAIT"
        );
        assert_eq!(builder.params().len(), 2);
    }

    #[test]
    fn test_empty_where_set_is_unscoped() {
        let builder = SelectBuilder::new("users").where_set(Some(WhereSet::new()));
        assert!(!builder.has_where());
        assert_eq!(builder.build(), "SELECT * FROM users");
    }

    #[test]
    fn test_count() {
        let builder =
            SelectBuilder::count("users").where_set(Some(WhereSet::new().eq("owner", "a")));
        assert_eq!(
            builder.build(),
            "SELECT COUNT(*) AS count FROM users WHERE owner = ?"
        );
    }

    #[test]
    fn test_insert_from_row() {
        let mut row = DatabaseRow::new();
        row.insert("name".to_string(), DatabaseValue::from("Alice"));
        row.insert("age".to_string(), DatabaseValue::Int(30));
        let builder = InsertBuilder::from_row("users", &row);

        assert_eq!(builder.build(), "INSERT INTO users (name, age) VALUES (?, ?)");
        assert_eq!(
            builder.params(),
            vec![DatabaseValue::from("Alice"), DatabaseValue::Int(30)]
        );
    }

    #[test]
    fn test_update() {
        let builder = UpdateBuilder::new("users")
            .set("name", "Bob")
            .set("age", 31)
            .where_set(Some(WhereSet::new().eq("id", 1)));

        assert_eq!(
            builder.build(),
            "UPDATE users SET name = ?, age = ? WHERE id = ?"
        );
        assert_eq!(builder.params().len(), 3);
    }

    #[test]
    fn test_delete() {
        let builder = DeleteBuilder::new("users").where_set(Some(WhereSet::new().eq("id", 42)));

        assert_eq!(builder.build(), "DELETE FROM users WHERE id = ?");
        assert_eq!(builder.params().len(), 1);
        assert_eq!(DeleteBuilder::new("users").build(), "DELETE FROM users");
    }
}
