use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::SqlQueueError;

use super::session::Session;

/// Default loopback address of the plaintext transport.
pub const PLAIN_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 18812);
/// Default loopback address of the encrypted transport.
pub const ENCRYPTED_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 18821);

/// How bytes move between an RPC client and server.
///
/// A transport turns a freshly connected socket into a [`Session`], performing whatever
/// handshake and authentication it requires. The server and client are otherwise identical
/// for every transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Address the server binds when none is given.
    fn default_addr(&self) -> SocketAddr;

    /// Server side of the handshake.
    async fn accept(&self, stream: TcpStream) -> Result<Session, SqlQueueError>;

    /// Client side of the handshake.
    async fn connect(&self, stream: TcpStream) -> Result<Session, SqlQueueError>;
}

/// Unauthenticated, unencrypted transport for trusted networks and local use.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTransport;

#[async_trait]
impl Transport for PlainTransport {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn default_addr(&self) -> SocketAddr {
        SocketAddr::from(PLAIN_ADDR)
    }

    async fn accept(&self, stream: TcpStream) -> Result<Session, SqlQueueError> {
        Ok(Session::new(stream))
    }

    async fn connect(&self, stream: TcpStream) -> Result<Session, SqlQueueError> {
        Ok(Session::new(stream))
    }
}
