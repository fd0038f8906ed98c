use std::fmt;
use std::path::PathBuf;
use std::thread::ThreadId;

use tokio::sync::oneshot;

use crate::classify::SqlMode;
use crate::error::SqlQueueError;
use crate::results::ResultSet;
use crate::types::Param;

/// Correlation token for one submitted request: the submitting thread plus a
/// queue-wide sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    pub caller: ThreadId,
    pub seq: u64,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.caller, self.seq)
    }
}

pub(crate) struct Request {
    pub(crate) id: RequestId,
    pub(crate) statement: String,
    pub(crate) params: Vec<Param>,
    pub(crate) mode: SqlMode,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SqlQueueError>>;

pub(crate) enum Command {
    Execute {
        request: Request,
        respond_to: Reply<ResultSet>,
    },
    Commit {
        respond_to: Reply<()>,
    },
    Backup {
        respond_to: Reply<PathBuf>,
    },
    Shutdown,
}
