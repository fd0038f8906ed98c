use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::SqlQueueError;
use crate::results::ResultSet;
use crate::types::Param;

use super::protocol::{RpcRequest, RpcResponse};
use super::session::Session;
use super::transport::Transport;

/// Remote proxy for [`crate::SqlQueue::execute`].
pub struct RpcClient {
    session: Session,
    next_id: u64,
}

impl RpcClient {
    /// Connect and complete the transport's handshake.
    ///
    /// # Errors
    /// Returns [`SqlQueueError::ConnectionError`] if the socket cannot be opened, or the
    /// transport's handshake error.
    pub async fn connect<A, T>(addr: A, transport: &T) -> Result<Self, SqlQueueError>
    where
        A: ToSocketAddrs,
        T: Transport,
    {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| SqlQueueError::ConnectionError(format!("connect failed: {err}")))?;
        stream.set_nodelay(true)?;
        let session = transport.connect(stream).await?;
        Ok(Self {
            session,
            next_id: 1,
        })
    }

    /// Run `statement` on the remote queue.
    ///
    /// # Errors
    /// Returns the remote [`SqlQueueError`] (execution, classification, shutdown, ...) exactly
    /// as a local caller would see it, or a connection/protocol error.
    pub async fn sql(
        &mut self,
        statement: impl AsRef<str>,
        params: Vec<Param>,
    ) -> Result<ResultSet, SqlQueueError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest::sql(id, statement.as_ref(), &params)?;
        self.session.send(&request).await?;
        let response: RpcResponse = self.session.expect("rpc response").await?;
        if response.id != id {
            return Err(SqlQueueError::Protocol(format!(
                "response id {} does not match request id {id}",
                response.id
            )));
        }
        response.into_result()
    }
}
