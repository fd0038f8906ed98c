use std::path::PathBuf;
use std::time::Duration;

use crate::error::SqlQueueError;

use super::SqlQueue;

/// Options for opening a [`SqlQueue`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub db_path: PathBuf,
    /// How long the worker waits for a request before counting an idle tick.
    pub idle_tick: Duration,
    /// Idle time after which an open transaction is committed.
    pub commit_after_idle: Duration,
    /// Idle time after which a changed database is backed up; `None` disables auto-backup.
    pub backup_after_idle: Option<Duration>,
    pub backup_on_start: bool,
    pub backup_on_stop: bool,
    /// Where artifacts go; defaults to `bak/` next to the database file.
    pub backup_dir: Option<PathBuf>,
}

impl QueueOptions {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            idle_tick: Duration::from_millis(1),
            commit_after_idle: Duration::from_secs(1),
            backup_after_idle: None,
            backup_on_start: false,
            backup_on_stop: true,
            backup_dir: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SqlQueueError> {
        if self.idle_tick.is_zero() {
            return Err(SqlQueueError::ConfigError(
                "idle_tick must be greater than zero".into(),
            ));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(SqlQueueError::ConfigError("db_path is empty".into()));
        }
        Ok(())
    }

    /// Number of idle ticks that make up `span`, never less than one.
    pub(crate) fn ticks(&self, span: Duration) -> u64 {
        let ticks = span.as_nanos() / self.idle_tick.as_nanos().max(1);
        u64::try_from(ticks).unwrap_or(u64::MAX).max(1)
    }
}

/// Fluent builder for [`QueueOptions`].
#[derive(Debug, Clone)]
pub struct QueueOptionsBuilder {
    opts: QueueOptions,
}

impl QueueOptionsBuilder {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            opts: QueueOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn idle_tick(mut self, tick: Duration) -> Self {
        self.opts.idle_tick = tick;
        self
    }

    #[must_use]
    pub fn commit_after_idle(mut self, span: Duration) -> Self {
        self.opts.commit_after_idle = span;
        self
    }

    #[must_use]
    pub fn auto_backup(mut self, span: Option<Duration>) -> Self {
        self.opts.backup_after_idle = span;
        self
    }

    #[must_use]
    pub fn backup_on_start(mut self, enabled: bool) -> Self {
        self.opts.backup_on_start = enabled;
        self
    }

    #[must_use]
    pub fn backup_on_stop(mut self, enabled: bool) -> Self {
        self.opts.backup_on_stop = enabled;
        self
    }

    #[must_use]
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.opts.backup_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn finish(self) -> QueueOptions {
        self.opts
    }

    /// Open the database and start the worker.
    ///
    /// # Errors
    ///
    /// Returns `SqlQueueError` if the options are invalid or the database cannot be opened.
    pub fn open(self) -> Result<SqlQueue, SqlQueueError> {
        SqlQueue::open(self.finish())
    }
}
