//! Maps a submitted statement and its parameter list onto an execution mode.
//!
//! Parameter shape is inspected before the statement text, so a parameterized statement
//! whose literals contain `;` is never mistaken for a script.

mod scanner;

use std::fmt;

use crate::error::SqlQueueError;
use crate::types::{Param, Value};

/// How the worker runs a request.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlMode {
    /// One statement, no parameters.
    Plain,
    /// One statement bound once to the given values.
    Parameterized(Vec<Value>),
    /// One statement run once per row, as a single atomic unit.
    Batch(Vec<Vec<Value>>),
    /// Several statements run in sequence without parameter binding.
    Script,
}

impl SqlMode {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SqlMode::Plain => "plain",
            SqlMode::Parameterized(_) => "parameterized",
            SqlMode::Batch(_) => "batch",
            SqlMode::Script => "script",
        }
    }
}

impl fmt::Display for SqlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify a request.
///
/// # Errors
/// Returns [`SqlQueueError::Classification`] when the statement is blank, when flat values
/// and batch rows are mixed, or when batch rows disagree on their length.
pub fn classify(statement: &str, params: &[Param]) -> Result<SqlMode, SqlQueueError> {
    let Some(first) = params.first() else {
        return match scanner::count_statements(statement) {
            0 => Err(SqlQueueError::Classification("statement is empty".into())),
            1 => Ok(SqlMode::Plain),
            _ => Ok(SqlMode::Script),
        };
    };

    match first {
        Param::Row(head) => {
            let arity = head.len();
            let mut rows = Vec::with_capacity(params.len());
            for (idx, param) in params.iter().enumerate() {
                match param {
                    Param::Row(row) if row.len() == arity => rows.push(row.clone()),
                    Param::Row(row) => {
                        return Err(SqlQueueError::Classification(format!(
                            "batch row {idx} has {} values, expected {arity}",
                            row.len()
                        )));
                    }
                    Param::Value(_) => return Err(mixed_shape(idx)),
                }
            }
            Ok(SqlMode::Batch(rows))
        }
        Param::Value(_) => params
            .iter()
            .enumerate()
            .map(|(idx, param)| match param {
                Param::Value(value) => Ok(value.clone()),
                Param::Row(_) => Err(mixed_shape(idx)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(SqlMode::Parameterized),
    }
}

fn mixed_shape(idx: usize) -> SqlQueueError {
    SqlQueueError::Classification(format!(
        "parameter {idx} mixes batch rows with flat values"
    ))
}
