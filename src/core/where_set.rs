//! Search predicates
//!
//! A [`WhereSet`] identifies the rows a binder is bound to. It renders to a
//! placeholder clause (without the `WHERE` keyword) plus its ordered bind values,
//! so every statement built from it is parameterized.

use super::value::DatabaseValue;

/// SQL comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal to (=)
    Eq,
    /// Not equal to (!=)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// LIKE pattern matching
    Like,
}

impl Operator {
    fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
        }
    }
}

/// How the conditions of one set are joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl Logic {
    fn as_sql(&self) -> &'static str {
        match self {
            Logic::And => " AND ",
            Logic::Or => " OR ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Compare {
        column: String,
        operator: Operator,
        value: DatabaseValue,
    },
    Null {
        column: String,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<DatabaseValue>,
    },
    Raw {
        clause: String,
        params: Vec<DatabaseValue>,
    },
    Group(WhereSet),
}

impl Condition {
    fn write_clause(&self, out: &mut String) {
        match self {
            Condition::Compare {
                column, operator, ..
            } => {
                out.push_str(&format!("{} {} ?", column, operator.as_sql()));
            }
            Condition::Null { column, negated } => {
                let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
                out.push_str(&format!("{} {}", column, keyword));
            }
            // `IN ()` is not valid SQL; an empty list matches nothing.
            Condition::In { values, .. } if values.is_empty() => out.push_str("1 = 0"),
            Condition::In { column, values } => {
                let placeholders = vec!["?"; values.len()].join(", ");
                out.push_str(&format!("{} IN ({})", column, placeholders));
            }
            Condition::Raw { clause, .. } => {
                out.push('(');
                out.push_str(clause);
                out.push(')');
            }
            Condition::Group(group) => {
                out.push('(');
                out.push_str(&group.build_placeholder_clause());
                out.push(')');
            }
        }
    }

    fn collect_parameters(&self, out: &mut Vec<DatabaseValue>) {
        match self {
            Condition::Compare { value, .. } => out.push(value.clone()),
            Condition::Null { .. } => {}
            Condition::In { values, .. } => out.extend(values.iter().cloned()),
            Condition::Raw { params, .. } => out.extend(params.iter().cloned()),
            Condition::Group(group) => out.extend(group.build_parameters()),
        }
    }
}

/// Predicate builder
///
/// ```
/// use rust_record_binder::core::where_set::WhereSet;
///
/// let where_set = WhereSet::new().eq("owner", "alice").is_null("deleted_at");
/// assert_eq!(where_set.build_placeholder_clause(), "owner = ? AND deleted_at IS NULL");
/// assert_eq!(where_set.build_parameters().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WhereSet {
    conditions: Vec<Condition>,
    logic: Logic,
}

impl WhereSet {
    /// Create an empty predicate
    pub fn new() -> Self {
        Self::default()
    }

    fn compare(mut self, column: &str, operator: Operator, value: DatabaseValue) -> Self {
        self.conditions.push(Condition::Compare {
            column: column.to_string(),
            operator,
            value,
        });
        self
    }

    /// Add a column = value condition
    #[must_use]
    pub fn eq(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.compare(column, Operator::Eq, value.into())
    }

    /// Add a column != value condition
    #[must_use]
    pub fn ne(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.compare(column, Operator::Ne, value.into())
    }

    /// Add a column < value condition
    #[must_use]
    pub fn lt(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.compare(column, Operator::Lt, value.into())
    }

    /// Add a column <= value condition
    #[must_use]
    pub fn le(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.compare(column, Operator::Le, value.into())
    }

    /// Add a column > value condition
    #[must_use]
    pub fn gt(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.compare(column, Operator::Gt, value.into())
    }

    /// Add a column >= value condition
    #[must_use]
    pub fn ge(self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.compare(column, Operator::Ge, value.into())
    }

    /// Add a column LIKE pattern condition
    #[must_use]
    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.compare(column, Operator::Like, DatabaseValue::String(pattern.to_string()))
    }

    /// Add a column IS NULL condition
    #[must_use]
    pub fn is_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::Null {
            column: column.to_string(),
            negated: false,
        });
        self
    }

    /// Add a column IS NOT NULL condition
    #[must_use]
    pub fn is_not_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::Null {
            column: column.to_string(),
            negated: true,
        });
        self
    }

    /// Add a column IN (...) condition
    #[must_use]
    pub fn in_list<V: Into<DatabaseValue>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Add a raw placeholder fragment with its bind values
    #[must_use]
    pub fn raw(mut self, clause: &str, params: Vec<DatabaseValue>) -> Self {
        self.conditions.push(Condition::Raw {
            clause: clause.to_string(),
            params,
        });
        self
    }

    /// Add a parenthesized sub-predicate
    #[must_use]
    pub fn group(mut self, group: WhereSet) -> Self {
        if !group.is_empty() {
            self.conditions.push(Condition::Group(group));
        }
        self
    }

    /// Join the conditions with OR instead of AND
    #[must_use]
    pub fn or_where(mut self) -> Self {
        self.logic = Logic::Or;
        self
    }

    /// Whether no condition has been added
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// SQL fragment with `?` placeholders, without the `WHERE` keyword
    pub fn build_placeholder_clause(&self) -> String {
        let mut out = String::new();
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                out.push_str(self.logic.as_sql());
            }
            condition.write_clause(&mut out);
        }
        out
    }

    /// Bind values in placeholder order
    pub fn build_parameters(&self) -> Vec<DatabaseValue> {
        let mut out = Vec::new();
        for condition in &self.conditions {
            condition.collect_parameters(&mut out);
        }
        out
    }
}
