//! Records and table descriptors
//!
//! A [`Record`] is the typed shape of one row. Binders read rows through
//! [`Record::from_row`] and write them back through [`Record::to_row`], projected
//! onto the columns of a [`Table`].

use super::error::Result;
use super::value::{DatabaseRow, DatabaseValue};

/// A typed row
pub trait Record: Clone + Default + Send + Sync + 'static {
    /// Build the record from a fetched row
    fn from_row(row: &DatabaseRow) -> Result<Self>;

    /// Flatten the record into column -> value pairs
    fn to_row(&self) -> DatabaseRow;
}

/// Untyped binding: a row is its own record
impl Record for DatabaseRow {
    fn from_row(row: &DatabaseRow) -> Result<Self> {
        Ok(row.clone())
    }

    fn to_row(&self) -> DatabaseRow {
        self.clone()
    }
}

/// Physical table name plus its ordered column list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
}

impl Table {
    /// Describe a table; an empty column list means "every column of the row"
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Physical table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared columns, in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Restrict `row` to the table's columns, in table order
    ///
    /// Declared columns missing from the row are skipped so that database
    /// defaults apply on insert.
    pub fn project(&self, row: &DatabaseRow) -> DatabaseRow {
        if self.columns.is_empty() {
            return row.clone();
        }
        self.columns
            .iter()
            .filter_map(|column| {
                row.get(column)
                    .map(|value: &DatabaseValue| (column.clone(), value.clone()))
            })
            .collect()
    }
}
