use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SqlQueueError;
use crate::queue::SqlQueue;

use super::protocol::{RpcRequest, RpcResponse};
use super::transport::Transport;

/// Exposes a queue's `sql` operation over a socket.
///
/// Remote calls go through [`SqlQueue::execute_async`], the same entry point local callers
/// use, so the worker cannot tell them apart.
pub struct RpcServer<T: Transport> {
    queue: SqlQueue,
    transport: Arc<T>,
}

impl<T: Transport> RpcServer<T> {
    #[must_use]
    pub fn new(queue: SqlQueue, transport: T) -> Self {
        Self {
            queue,
            transport: Arc::new(transport),
        }
    }

    /// Bind the transport's default loopback address and start accepting.
    ///
    /// # Errors
    /// Returns [`SqlQueueError::ConnectionError`] if the address cannot be bound.
    pub async fn bind(self) -> Result<ServerHandle, SqlQueueError> {
        let addr = self.transport.default_addr();
        self.bind_to(addr).await
    }

    /// Bind `addr` and run the accept loop on a background task.
    ///
    /// # Errors
    /// Returns [`SqlQueueError::ConnectionError`] if the address cannot be bound.
    pub async fn bind_to(self, addr: SocketAddr) -> Result<ServerHandle, SqlQueueError> {
        let listener = TcpListener::bind(addr).await.map_err(|err| {
            SqlQueueError::ConnectionError(format!("failed to bind {addr}: {err}"))
        })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, transport = self.transport.name(), "rpc server listening");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            self.queue,
            self.transport,
            cancel.clone(),
        ));
        Ok(ServerHandle {
            local_addr,
            cancel,
            task,
        })
    }
}

/// Running server. Dropping it leaves the server running; call [`ServerHandle::shutdown`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close open connections, and wait for the accept loop to end.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "rpc accept loop ended abnormally");
        }
    }
}

async fn accept_loop<T: Transport>(
    listener: TcpListener,
    queue: SqlQueue,
    transport: Arc<T>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(
                        stream,
                        peer,
                        queue.clone(),
                        Arc::clone(&transport),
                        cancel.child_token(),
                    ));
                }
                Err(err) => warn!(error = %err, "accept failed"),
            },
        }
    }
    debug!("rpc accept loop stopped");
}

/// One connection is one logical caller: its calls are answered strictly in order.
async fn serve_connection<T: Transport>(
    stream: TcpStream,
    peer: SocketAddr,
    queue: SqlQueue,
    transport: Arc<T>,
    cancel: CancellationToken,
) {
    let mut session = tokio::select! {
        () = cancel.cancelled() => return,
        res = transport.accept(stream) => match res {
            Ok(session) => session,
            Err(err) => {
                warn!(%peer, error = %err, "rpc handshake failed");
                return;
            }
        },
    };
    debug!(%peer, "rpc client connected");

    loop {
        let request = tokio::select! {
            () = cancel.cancelled() => break,
            res = session.recv::<RpcRequest>() => match res {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(err) => {
                    warn!(%peer, error = %err, "dropping rpc connection");
                    break;
                }
            },
        };

        let result = match request.decode_sql() {
            Ok((statement, params)) => queue.execute_async(statement, params).await,
            Err(err) => Err(err),
        };
        if let Err(err) = session.send(&RpcResponse::new(request.id, &result)).await {
            warn!(%peer, error = %err, "failed to answer rpc call");
            break;
        }
    }
    debug!(%peer, "rpc client disconnected");
}
