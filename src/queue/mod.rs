//! The single-writer execution queue.
//!
//! One worker thread owns the `SQLite` connection. Every caller, local or remote, submits
//! requests through a [`SqlQueue`] handle; the worker runs them one at a time in submission
//! order and answers each on its own reply channel.

mod channel;
mod config;
mod query;
mod store;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::classify::classify;
use crate::error::SqlQueueError;
use crate::results::ResultSet;
use crate::types::Param;

pub use channel::RequestId;
pub use config::{QueueOptions, QueueOptionsBuilder};

use channel::{Command, Request};
use worker::{PendingGuard, Shared, run_queue_worker};

/// Handle to a running queue. Cheap to clone; all clones feed the same worker.
#[derive(Clone)]
pub struct SqlQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    sender: Sender<Command>,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    next_seq: AtomicU64,
    db_path: PathBuf,
}

impl SqlQueue {
    #[must_use]
    pub fn builder(db_path: impl Into<PathBuf>) -> QueueOptionsBuilder {
        QueueOptionsBuilder::new(db_path)
    }

    /// Open the database on a new worker thread and wait until it holds the file lock.
    ///
    /// # Errors
    /// Returns [`SqlQueueError`] if the options are invalid, the worker thread cannot be
    /// spawned, or the database cannot be opened and locked.
    pub fn open(opts: QueueOptions) -> Result<Self, SqlQueueError> {
        opts.validate()?;
        let (sender, receiver) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let shared = Arc::new(Shared::default());
        let db_path = opts.db_path.clone();

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("sql-queue-worker".into())
            .spawn(move || run_queue_worker(&opts, &receiver, &worker_shared, &ready_tx))
            .map_err(|err| {
                SqlQueueError::ConnectionError(format!("failed to spawn queue worker thread: {err}"))
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = handle.join();
                return Err(err);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(SqlQueueError::WorkerDead);
            }
        }
        info!(path = %db_path.display(), "queue opened");

        Ok(Self {
            inner: Arc::new(QueueInner {
                sender,
                shared,
                handle: Mutex::new(Some(handle)),
                next_seq: AtomicU64::new(1),
                db_path,
            }),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.shared.is_alive()
    }

    /// Requests submitted whose reply has not yet been collected.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.shared.pending()
    }

    /// Execute one request and block until its result is ready.
    ///
    /// Must not be called from within an async runtime; use [`SqlQueue::execute_async`] there.
    ///
    /// # Errors
    /// Returns [`SqlQueueError::Classification`] for a malformed parameter shape,
    /// [`SqlQueueError::Execution`] when the engine rejects the request,
    /// [`SqlQueueError::ShutdownInProgress`] once [`SqlQueue::stop`] has been called, and
    /// [`SqlQueueError::WorkerDead`] if the worker has exited on a fatal error.
    pub fn execute(
        &self,
        statement: impl Into<String>,
        params: Vec<Param>,
    ) -> Result<ResultSet, SqlQueueError> {
        let (reply, _pending) = self.submit(statement.into(), params)?;
        let outcome = reply.blocking_recv();
        self.collect(outcome)
    }

    /// Async form of [`SqlQueue::execute`].
    ///
    /// # Errors
    /// Same as [`SqlQueue::execute`].
    pub async fn execute_async(
        &self,
        statement: impl Into<String>,
        params: Vec<Param>,
    ) -> Result<ResultSet, SqlQueueError> {
        let (reply, _pending) = self.submit(statement.into(), params)?;
        let outcome = reply.await;
        self.collect(outcome)
    }

    /// Commit the open transaction now and block until it is applied.
    ///
    /// # Errors
    /// Returns [`SqlQueueError`] if the commit fails or the queue is no longer accepting work.
    pub fn commit(&self) -> Result<(), SqlQueueError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Commit { respond_to: tx })?;
        self.collect(rx.blocking_recv())
    }

    /// Back up the database now and block until the artifact is written.
    ///
    /// Returns the path of the new artifact.
    ///
    /// # Errors
    /// Returns [`SqlQueueError`] if the copy fails or the queue is no longer accepting work.
    pub fn backup(&self) -> Result<PathBuf, SqlQueueError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Backup { respond_to: tx })?;
        self.collect(rx.blocking_recv())
    }

    /// Shut the worker down and block until it has exited.
    ///
    /// Requests submitted earlier finish first. Any later submission fails with
    /// [`SqlQueueError::ShutdownInProgress`]. Safe to call more than once.
    ///
    /// # Errors
    /// Returns [`SqlQueueError::WorkerDead`] if the worker thread panicked.
    pub fn stop(&self) -> Result<(), SqlQueueError> {
        // held across the join so a concurrent stop() also waits for the exit
        let mut guard = match self.inner.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(handle) = guard.take() else {
            return Ok(());
        };

        self.inner.shared.request_termination();
        // a dead worker has already dropped its receiver; joining is all that is left
        let _ = self.inner.sender.send(Command::Shutdown);
        debug!("waiting for queue worker to exit");
        handle.join().map_err(|_| SqlQueueError::WorkerDead)
    }

    fn submit(
        &self,
        statement: String,
        params: Vec<Param>,
    ) -> Result<(oneshot::Receiver<Result<ResultSet, SqlQueueError>>, PendingGuard), SqlQueueError>
    {
        self.accepting()?;
        let mode = classify(&statement, &params)?;
        let id = RequestId {
            caller: thread::current().id(),
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let (tx, rx) = oneshot::channel();
        let pending = PendingGuard::new(&self.inner.shared);
        self.send(Command::Execute {
            request: Request {
                id,
                statement,
                params,
                mode,
            },
            respond_to: tx,
        })?;
        Ok((rx, pending))
    }

    fn accepting(&self) -> Result<(), SqlQueueError> {
        if self.inner.shared.is_terminating() {
            Err(SqlQueueError::ShutdownInProgress)
        } else if !self.inner.shared.is_alive() {
            Err(SqlQueueError::WorkerDead)
        } else {
            Ok(())
        }
    }

    fn send(&self, command: Command) -> Result<(), SqlQueueError> {
        self.accepting()?;
        self.inner
            .sender
            .send(command)
            .map_err(|_| self.closed_error())
    }

    fn collect<T>(
        &self,
        outcome: Result<Result<T, SqlQueueError>, oneshot::error::RecvError>,
    ) -> Result<T, SqlQueueError> {
        outcome.map_err(|_| self.closed_error())?
    }

    /// The error a caller sees when the worker went away without answering.
    fn closed_error(&self) -> SqlQueueError {
        if self.inner.shared.is_terminating() {
            SqlQueueError::ShutdownInProgress
        } else {
            SqlQueueError::WorkerDead
        }
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        self.shared.request_termination();
        let _ = self.sender.send(Command::Shutdown);
    }
}
