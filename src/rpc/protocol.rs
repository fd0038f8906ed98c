//! Wire messages. Every frame is one JSON document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::SqlQueueError;
use crate::results::ResultSet;
use crate::types::{Param, Value};

/// The single remote procedure.
pub const SQL_METHOD: &str = "sql";

/// A remote call: procedure name plus positional and keyword arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Json>,
    #[serde(default)]
    pub kwargs: Map<String, Json>,
}

impl RpcRequest {
    /// Build an `sql(statement, params)` call using keyword arguments.
    pub fn sql(id: u64, statement: &str, params: &[Param]) -> Result<Self, SqlQueueError> {
        let mut kwargs = Map::new();
        kwargs.insert("statement".into(), Json::String(statement.to_owned()));
        kwargs.insert("params".into(), to_json(params)?);
        Ok(Self {
            id,
            method: SQL_METHOD.into(),
            args: Vec::new(),
            kwargs,
        })
    }

    /// Decode the arguments of an `sql` call. `statement` and `params` may be passed by
    /// keyword or by position; `params` defaults to none.
    pub fn decode_sql(&self) -> Result<(String, Vec<Param>), SqlQueueError> {
        if self.method != SQL_METHOD {
            return Err(SqlQueueError::Protocol(format!(
                "unknown method `{}`",
                self.method
            )));
        }
        let statement = self
            .argument("statement", 0)
            .and_then(Json::as_str)
            .ok_or_else(|| SqlQueueError::Protocol("sql() requires a string `statement`".into()))?
            .to_owned();
        let params = match self.argument("params", 1) {
            None | Some(Json::Null) => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|err| {
                SqlQueueError::Protocol(format!("malformed `params`: {err}"))
            })?,
        };
        Ok((statement, params))
    }

    fn argument(&self, name: &str, position: usize) -> Option<&Json> {
        self.kwargs.get(name).or_else(|| self.args.get(position))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub outcome: RpcOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcOutcome {
    Rows(WireResultSet),
    Error(WireError),
}

impl RpcResponse {
    #[must_use]
    pub fn new(id: u64, result: &Result<ResultSet, SqlQueueError>) -> Self {
        let outcome = match result {
            Ok(rs) => RpcOutcome::Rows(WireResultSet::from(rs)),
            Err(err) => RpcOutcome::Error(WireError::from(err)),
        };
        Self { id, outcome }
    }

    pub fn into_result(self) -> Result<ResultSet, SqlQueueError> {
        match self.outcome {
            RpcOutcome::Rows(rows) => Ok(rows.into()),
            RpcOutcome::Error(err) => Err(err.into()),
        }
    }
}

/// Row data as sent over the socket: shared column names plus positional values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: usize,
}

impl From<&ResultSet> for WireResultSet {
    fn from(rs: &ResultSet) -> Self {
        Self {
            columns: rs.column_names().to_vec(),
            rows: rs.rows.iter().map(|row| row.values.clone()).collect(),
            rows_affected: rs.rows_affected,
        }
    }
}

impl From<WireResultSet> for ResultSet {
    fn from(wire: WireResultSet) -> Self {
        let mut rs = ResultSet::with_columns(wire.columns, wire.rows.len());
        for values in wire.rows {
            rs.push_values(values);
        }
        rs.rows_affected = wire.rows_affected;
        rs
    }
}

/// Serializable mirror of [`SqlQueueError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireError {
    Classification {
        message: String,
    },
    Execution {
        statement: String,
        params: Vec<Param>,
        message: String,
    },
    ShutdownInProgress,
    WorkerDead,
    Backup {
        message: String,
    },
    Protocol {
        message: String,
    },
    Authentication {
        message: String,
    },
    /// Anything that has no faithful remote counterpart (I/O, engine, config).
    Remote {
        message: String,
    },
}

impl From<&SqlQueueError> for WireError {
    fn from(err: &SqlQueueError) -> Self {
        match err {
            SqlQueueError::Classification(message) => WireError::Classification {
                message: message.clone(),
            },
            SqlQueueError::Execution {
                statement,
                params,
                message,
            } => WireError::Execution {
                statement: statement.clone(),
                params: params.clone(),
                message: message.clone(),
            },
            SqlQueueError::ShutdownInProgress => WireError::ShutdownInProgress,
            SqlQueueError::WorkerDead => WireError::WorkerDead,
            SqlQueueError::Backup(message) => WireError::Backup {
                message: message.clone(),
            },
            SqlQueueError::Protocol(message) => WireError::Protocol {
                message: message.clone(),
            },
            SqlQueueError::Authentication(message) => WireError::Authentication {
                message: message.clone(),
            },
            other => WireError::Remote {
                message: other.to_string(),
            },
        }
    }
}

impl From<WireError> for SqlQueueError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Classification { message } => SqlQueueError::Classification(message),
            WireError::Execution {
                statement,
                params,
                message,
            } => SqlQueueError::Execution {
                statement,
                params,
                message,
            },
            WireError::ShutdownInProgress => SqlQueueError::ShutdownInProgress,
            WireError::WorkerDead => SqlQueueError::WorkerDead,
            WireError::Backup { message } => SqlQueueError::Backup(message),
            WireError::Protocol { message } => SqlQueueError::Protocol(message),
            WireError::Authentication { message } => SqlQueueError::Authentication(message),
            WireError::Remote { message } => SqlQueueError::Remote(message),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Json, SqlQueueError> {
    serde_json::to_value(value)
        .map_err(|err| SqlQueueError::Protocol(format!("cannot encode message: {err}")))
}

/// First handshake frame of the encrypted transport (client → server).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClientHello {
    pub(crate) version: u8,
    pub(crate) ephemeral: String,
}

/// Server answer: its ephemeral key and a signature binding both ephemeral keys to the
/// server identity. The identity itself is not sent.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ServerHello {
    pub(crate) ephemeral: String,
    pub(crate) signature: String,
}

/// First sealed frame (client → server): proves the client holds the advertised key.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AuthRequest {
    pub(crate) proof: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AuthReply {
    pub(crate) accepted: bool,
}
