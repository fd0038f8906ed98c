use thiserror::Error;

use crate::types::Param;

#[derive(Debug, Error)]
pub enum SqlQueueError {
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The request's parameter shape could not be mapped onto an execution mode.
    #[error("Classification error: {0}")]
    Classification(String),

    /// The engine rejected the statement or its parameters.
    #[error("SQL execution error: {message} (statement: {statement}, params: {params:?})")]
    Execution {
        statement: String,
        params: Vec<Param>,
        message: String,
    },

    #[error("queue is shutting down; request rejected")]
    ShutdownInProgress,

    #[error("queue worker is no longer running")]
    WorkerDead,

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Other error: {0}")]
    Other(String),

    /// A server-side failure with no local counterpart, relayed by an RPC client.
    #[error("Remote error: {0}")]
    Remote(String),
}

impl SqlQueueError {
    /// Wrap an engine failure with the request that caused it.
    pub(crate) fn execution(statement: &str, params: &[Param], err: impl std::fmt::Display) -> Self {
        SqlQueueError::Execution {
            statement: statement.to_owned(),
            params: params.to_vec(),
            message: err.to_string(),
        }
    }
}
