use std::collections::HashMap;
use std::sync::Arc;

use super::row::{Row, index_columns};
use crate::types::Value;

/// The result of one executed request.
///
/// Statements that return rows fill `rows`; statements that do not (DML, DDL, scripts)
/// leave `rows` empty and report `rows_affected`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// The rows returned by the statement
    pub rows: Vec<Row>,
    /// Rows changed by a DML statement or batch
    pub rows_affected: usize,
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
}

impl ResultSet {
    /// Create an empty result set for the given columns.
    #[must_use]
    pub fn with_columns(column_names: Vec<String>, capacity: usize) -> ResultSet {
        let column_index = Arc::new(index_columns(&column_names));
        ResultSet {
            rows: Vec::with_capacity(capacity),
            rows_affected: 0,
            column_names: Arc::new(column_names),
            column_index,
        }
    }

    /// Result for a statement that returns no rows.
    #[must_use]
    pub fn affected(rows_affected: usize) -> ResultSet {
        ResultSet {
            rows_affected,
            ..ResultSet::default()
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Append a row; values must be aligned with [`ResultSet::column_names`].
    pub fn push_values(&mut self, values: Vec<Value>) {
        self.rows.push(Row {
            column_names: Arc::clone(&self.column_names),
            values,
            column_index: Arc::clone(&self.column_index),
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
