use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::SqlQueueError;
use crate::results::ResultSet;

use super::channel::{Command, Request};
use super::config::QueueOptions;
use super::store::Store;

/// Flags shared between the worker and every queue handle.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    alive: AtomicBool,
    terminating: AtomicBool,
    pending: AtomicUsize,
}

impl Shared {
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    /// Returns `true` for the first caller only.
    pub(crate) fn request_termination(&self) -> bool {
        !self.terminating.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Counts a submitted request as pending until the caller has its reply (or gives up on it).
pub(crate) struct PendingGuard(Arc<Shared>);

impl PendingGuard {
    pub(crate) fn new(shared: &Arc<Shared>) -> Self {
        shared.pending.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(shared))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Clears the alive flag however the worker exits, panics included.
struct AliveGuard(Arc<Shared>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.alive.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub(crate) struct WorkerState {
    pub(crate) commit_requested: bool,
    pub(crate) backup_requested: bool,
    pub(crate) terminate_requested: bool,
    pub(crate) idle_ticks_since_commit: u64,
    pub(crate) idle_ticks_since_backup: u64,
}

struct Thresholds {
    tick: Duration,
    commit: u64,
    backup: Option<u64>,
    backup_on_stop: bool,
}

/// Worker thread body: open the store, report readiness, then serve until shutdown.
pub(crate) fn run_queue_worker(
    opts: &QueueOptions,
    receiver: &Receiver<Command>,
    shared: &Arc<Shared>,
    ready: &SyncSender<Result<(), SqlQueueError>>,
) {
    let mut store = match Store::open(opts) {
        Ok(store) => store,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    shared.alive.store(true, Ordering::Release);
    let _alive = AliveGuard(Arc::clone(shared));
    if ready.send(Ok(())).is_err() {
        // nobody is waiting for this queue any more
        let _ = store.close();
        return;
    }

    let thresholds = Thresholds {
        tick: opts.idle_tick,
        commit: opts.ticks(opts.commit_after_idle),
        backup: opts.backup_after_idle.map(|span| opts.ticks(span)),
        backup_on_stop: opts.backup_on_stop,
    };
    info!(path = %store.path().display(), "queue worker started");

    let mut state = WorkerState::default();
    let fatal = serve(&mut store, &mut state, &thresholds, receiver, shared);

    match fatal {
        Some(err) => {
            error!(error = %err, "queue worker stopped on fatal error");
            shared.alive.store(false, Ordering::Release);
            drain(receiver, shared);
            let _ = store.close();
        }
        None => {
            shared.request_termination();
            drain(receiver, shared);
            finish(&mut store, &thresholds);
        }
    }

    shared.alive.store(false, Ordering::Release);
    info!(path = %store.path().display(), "queue worker exited");
}

/// Main loop. Returns the fatal error that ended it, or `None` on a requested shutdown.
fn serve(
    store: &mut Store,
    state: &mut WorkerState,
    thresholds: &Thresholds,
    receiver: &Receiver<Command>,
    shared: &Shared,
) -> Option<SqlQueueError> {
    while !state.terminate_requested {
        if state.commit_requested {
            state.commit_requested = false;
            if let Err(err) = store.commit() {
                warn!(error = %err, "auto-commit failed");
            }
            continue;
        }

        if state.backup_requested {
            state.backup_requested = false;
            match store.backup() {
                Ok(_) => {}
                Err(err) if store.is_open() => warn!(error = %err, "auto-backup failed"),
                Err(err) => {
                    shared.alive.store(false, Ordering::Release);
                    return Some(err);
                }
            }
            continue;
        }

        match receiver.recv_timeout(thresholds.tick) {
            Ok(Command::Execute {
                request,
                respond_to,
            }) => {
                let _ = respond_to.send(execute(store, request));
            }
            Ok(Command::Commit { respond_to }) => {
                let res = store.commit();
                state.idle_ticks_since_commit = 0;
                let _ = respond_to.send(res);
            }
            Ok(Command::Backup { respond_to }) => {
                let res = store.backup();
                state.idle_ticks_since_commit = 0;
                state.idle_ticks_since_backup = 0;
                // the caller must see a dead queue once its backup call returns
                let lost = !store.is_open();
                if lost {
                    shared.alive.store(false, Ordering::Release);
                }
                let _ = respond_to.send(res);
                if lost {
                    return Some(SqlQueueError::WorkerDead);
                }
            }
            Ok(Command::Shutdown) => state.terminate_requested = true,
            Err(RecvTimeoutError::Timeout) => idle(store, state, thresholds, shared),
            // every handle is gone
            Err(RecvTimeoutError::Disconnected) => state.terminate_requested = true,
        }
    }
    None
}

fn execute(store: &mut Store, request: Request) -> Result<ResultSet, SqlQueueError> {
    let Request {
        id,
        statement,
        params,
        mode,
    } = request;
    debug!(request = %id, mode = %mode, "executing request");
    store.execute(&statement, &mode).map_err(|err| match err {
        SqlQueueError::SqliteError(engine) => {
            warn!(request = %id, mode = %mode, statement = %statement, error = %engine, "request failed");
            SqlQueueError::execution(&statement, &params, engine)
        }
        other => other,
    })
}

fn idle(store: &mut Store, state: &mut WorkerState, thresholds: &Thresholds, shared: &Shared) {
    state.idle_ticks_since_commit = state.idle_ticks_since_commit.saturating_add(1);
    state.idle_ticks_since_backup = state.idle_ticks_since_backup.saturating_add(1);

    // housekeeping waits until every reply has been collected
    if shared.pending() > 0 {
        return;
    }

    if state.idle_ticks_since_commit >= thresholds.commit {
        state.idle_ticks_since_commit = 0;
        if store.in_transaction() {
            debug!("idle threshold reached; requesting commit");
            state.commit_requested = true;
        }
    }

    if let Some(limit) = thresholds.backup
        && state.idle_ticks_since_backup >= limit
    {
        state.idle_ticks_since_backup = 0;
        if store.changed_since_backup() {
            debug!("idle threshold reached; requesting backup");
            state.backup_requested = true;
        }
    }
}

/// Reject everything still queued once the worker has decided to stop.
fn drain(receiver: &Receiver<Command>, shared: &Shared) {
    let reject = || {
        if shared.is_alive() {
            SqlQueueError::ShutdownInProgress
        } else {
            SqlQueueError::WorkerDead
        }
    };
    while let Ok(command) = receiver.try_recv() {
        match command {
            Command::Execute { respond_to, .. } => {
                let _ = respond_to.send(Err(reject()));
            }
            Command::Commit { respond_to } => {
                let _ = respond_to.send(Err(reject()));
            }
            Command::Backup { respond_to } => {
                let _ = respond_to.send(Err(reject()));
            }
            Command::Shutdown => {}
        }
    }
}

fn finish(store: &mut Store, thresholds: &Thresholds) {
    if let Err(err) = store.commit() {
        error!(error = %err, "final commit failed");
    }
    if thresholds.backup_on_stop
        && let Err(err) = store.backup()
    {
        error!(error = %err, "final backup failed");
    }
    if let Err(err) = store.close() {
        error!(error = %err, "closing database failed");
    }
}
