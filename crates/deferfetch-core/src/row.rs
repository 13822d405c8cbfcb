//! Raw result rows.
//!
//! A row is a flat list of named columns. Columns of a joined entity share
//! the row with the root entity and are told apart by a name prefix.

use crate::value::Value;
use std::sync::Arc;

/// A single row produced by the row source or by a secondary load.
///
/// Column names are reference-counted so rows cloned into pending work or
/// load responses don't copy them.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Pair `columns[i]` with `values[i]`.
    ///
    /// Surplus names or values on either side are ignored.
    pub fn new(columns: Vec<String>, mut values: Vec<Value>) -> Self {
        values.truncate(columns.len());
        let mut columns = columns;
        columns.truncate(values.len());
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(column, value)| (column.into(), value.into()))
            .unzip();
        Self::new(columns, values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the first column called `name`.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|column| column == name)
            .map(|i| &self.values[i])
    }

    /// Value of `column` as seen through an optional join prefix.
    pub fn get_prefixed(&self, prefix: Option<&str>, column: &str) -> Option<&Value> {
        match prefix {
            None => self.get_by_name(column),
            Some(prefix) => self.iter().find_map(|(name, value)| {
                (name.strip_prefix(prefix) == Some(column)).then_some(value)
            }),
        }
    }

    /// Whether any column carries the join prefix.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.columns.iter().any(|column| column.starts_with(prefix))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// `(column, value)` pairs in row order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns().zip(&self.values)
    }
}
