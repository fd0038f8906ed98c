//! Convenient imports for common functionality.

pub use crate::classify::{SqlMode, classify};
pub use crate::error::SqlQueueError;
pub use crate::queue::{QueueOptions, QueueOptionsBuilder, SqlQueue};
pub use crate::results::{ResultSet, Row};
pub use crate::types::{Param, Value, batch, params};

#[cfg(feature = "rpc")]
pub use crate::rpc::{
    EncryptedTransport, PlainTransport, RpcClient, RpcServer, ServerHandle, ServerKeypair,
    Transport,
};
