use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::backup::{BackupNamer, write_artifact};
use crate::classify::SqlMode;
use crate::error::SqlQueueError;
use crate::results::ResultSet;
use crate::types::Value;

use super::config::QueueOptions;
use super::query::build_result_set;

/// The worker-owned database handle.
///
/// Holds the connection under `SQLite`'s exclusive locking mode for as long as it is open;
/// the lock is only dropped while a backup copies the file.
pub(crate) struct Store {
    path: PathBuf,
    conn: Option<Connection>,
    namer: BackupNamer,
    /// Set by any statement that may have written, schema changes included; cleared by backup.
    dirty: bool,
}

impl Store {
    pub(crate) fn open(opts: &QueueOptions) -> Result<Self, SqlQueueError> {
        let mut namer = BackupNamer::new(&opts.db_path, opts.backup_dir.clone())?;
        if opts.backup_on_start && opts.db_path.exists() {
            write_artifact(&mut namer, &opts.db_path)?;
        }
        let conn = open_exclusive(&opts.db_path)?;
        let store = Self {
            path: opts.db_path.clone(),
            conn: Some(conn),
            namer,
            dirty: false,
        };
        info!(path = %store.path.display(), "opened database with exclusive lock");
        Ok(store)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&mut self) -> Result<&mut Connection, SqlQueueError> {
        self.conn.as_mut().ok_or(SqlQueueError::WorkerDead)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.is_autocommit())
    }

    pub(crate) fn execute(
        &mut self,
        statement: &str,
        mode: &SqlMode,
    ) -> Result<ResultSet, SqlQueueError> {
        // a script may have run some of its statements before failing
        if matches!(mode, SqlMode::Script) {
            self.dirty = true;
        }
        let conn = self.conn()?;
        let (rs, wrote) = run(conn, statement, mode)?;
        self.dirty |= wrote;
        Ok(rs)
    }

    /// Commit the open transaction, if any.
    pub(crate) fn commit(&mut self) -> Result<(), SqlQueueError> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
            debug!("committed transaction");
        }
        Ok(())
    }

    /// Whether anything other than a read ran since the last successful backup.
    pub(crate) fn changed_since_backup(&self) -> bool {
        self.dirty
    }

    /// Commit, release the file, copy it to a new artifact, then reopen under the lock.
    ///
    /// A failed copy is reported after the connection is back. A failed reopen leaves the
    /// store closed; callers must treat that as fatal.
    pub(crate) fn backup(&mut self) -> Result<PathBuf, SqlQueueError> {
        self.commit()?;
        self.close()?;
        let copied = write_artifact(&mut self.namer, &self.path);
        let conn = open_exclusive(&self.path).map_err(|err| {
            SqlQueueError::ConnectionError(format!(
                "failed to reopen {} after backup: {err}",
                self.path.display()
            ))
        })?;
        self.conn = Some(conn);
        if copied.is_ok() {
            self.dirty = false;
        }
        copied
    }

    /// Close the connection, releasing the exclusive lock.
    pub(crate) fn close(&mut self) -> Result<(), SqlQueueError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(conn, err)| {
                self.conn = Some(conn);
                SqlQueueError::SqliteError(err)
            })?;
            debug!(path = %self.path.display(), "closed database");
        }
        Ok(())
    }
}

fn open_exclusive(path: &Path) -> Result<Connection, SqlQueueError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    // another holder of the file is an error right away, not after a wait
    conn.busy_timeout(Duration::ZERO)?;
    conn.execute_batch("PRAGMA locking_mode = EXCLUSIVE;")?;
    // the lock is only taken on first access; grab it now so a competing process fails early
    conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;")
        .map_err(|err| {
            SqlQueueError::ConnectionError(format!(
                "cannot take exclusive lock on {}: {err}",
                path.display()
            ))
        })?;
    Ok(conn)
}

/// Run one request; the flag reports whether the statement may have written.
fn run(
    conn: &mut Connection,
    statement: &str,
    mode: &SqlMode,
) -> rusqlite::Result<(ResultSet, bool)> {
    match mode {
        SqlMode::Script => {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
            conn.execute_batch(statement)?;
            Ok((ResultSet::default(), true))
        }
        SqlMode::Plain => run_statement(conn, statement, &[]),
        SqlMode::Parameterized(values) => run_statement(conn, statement, values),
        SqlMode::Batch(rows) => {
            begin_if_modifying(conn, statement)?;
            let savepoint = conn.savepoint()?;
            let mut affected = 0;
            let wrote = {
                let mut stmt = savepoint.prepare(statement)?;
                for row in rows {
                    affected += stmt.execute(rusqlite::params_from_iter(row.iter()))?;
                }
                !stmt.readonly()
            };
            savepoint.commit()?;
            Ok((ResultSet::affected(affected), wrote))
        }
    }
}

fn run_statement(
    conn: &mut Connection,
    statement: &str,
    values: &[Value],
) -> rusqlite::Result<(ResultSet, bool)> {
    begin_if_modifying(conn, statement)?;
    let mut stmt = conn.prepare(statement)?;
    let wrote = !stmt.readonly();
    Ok((build_result_set(&mut stmt, values)?, wrote))
}

/// Data-modifying statements join a transaction that stays open until the next commit.
fn begin_if_modifying(conn: &Connection, statement: &str) -> rusqlite::Result<()> {
    if conn.is_autocommit() && is_modifying(statement) {
        conn.execute_batch("BEGIN")?;
    }
    Ok(())
}

fn is_modifying(statement: &str) -> bool {
    let keyword: String = skip_leading_comments(statement)
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    ["INSERT", "UPDATE", "DELETE", "REPLACE"]
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
}

fn skip_leading_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            return sql;
        }
    }
}
