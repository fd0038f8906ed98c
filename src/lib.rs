//! A serialized single-writer `SQLite` execution queue.
//!
//! One worker thread owns the database connection under an exclusive file lock. Any number
//! of threads (or remote processes, through [`rpc`]) submit statements; the worker runs them
//! strictly in submission order, commits after the queue has been idle for a while, and can
//! back the database file up to timestamped copies.
//!
//! ```rust,no_run
//! use sql_queue::prelude::*;
//!
//! # fn main() -> Result<(), SqlQueueError> {
//! let queue = SqlQueue::builder("app.db").open()?;
//! queue.execute("CREATE TABLE IF NOT EXISTS t (id INTEGER, name TEXT)", vec![])?;
//! queue.execute("INSERT INTO t VALUES (?1, ?2)", params([Value::Int(1), Value::from("a")]))?;
//! let rows = queue.execute("SELECT name FROM t WHERE id = ?1", params([1]))?;
//! assert_eq!(rows.rows[0].get("name"), Some(&Value::Text("a".into())));
//! queue.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod classify;
pub mod error;
pub mod prelude;
pub mod queue;
pub mod results;
#[cfg(feature = "rpc")]
pub mod rpc;
pub mod types;

pub use error::SqlQueueError;
pub use queue::{QueueOptions, QueueOptionsBuilder, RequestId, SqlQueue};
pub use results::{ResultSet, Row};
pub use types::{Param, Value, batch, params};
