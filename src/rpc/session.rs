use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::SqlQueueError;

use super::encrypted::SessionCipher;

/// Largest frame either side accepts.
pub(crate) const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// An established connection: length-delimited JSON frames, sealed once a cipher is
/// installed.
///
/// A [`super::Transport`] implementation wraps the accepted or connected socket with
/// [`Session::new`] and may exchange its own handshake frames before handing it over.
pub struct Session {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    cipher: Option<SessionCipher>,
}

impl Session {
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LEN)
            .new_codec();
        Self {
            framed: Framed::new(stream, codec),
            cipher: None,
        }
    }

    pub(crate) fn install_cipher(&mut self, cipher: SessionCipher) {
        self.cipher = Some(cipher);
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.cipher.is_some()
    }

    /// Write one message as a frame.
    ///
    /// # Errors
    /// Returns [`SqlQueueError::Protocol`] if the message cannot be encoded or sealed, and
    /// [`SqlQueueError::ConnectionError`] if the socket write fails.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), SqlQueueError> {
        let mut bytes = serde_json::to_vec(message)
            .map_err(|err| SqlQueueError::Protocol(format!("cannot encode frame: {err}")))?;
        if let Some(cipher) = self.cipher.as_mut() {
            bytes = cipher.seal(bytes)?;
        }
        self.framed
            .send(Bytes::from(bytes))
            .await
            .map_err(|err| SqlQueueError::ConnectionError(format!("send failed: {err}")))
    }

    /// Next message, or `None` once the peer has closed the connection.
    ///
    /// # Errors
    /// Returns [`SqlQueueError::ConnectionError`] on a socket failure,
    /// [`SqlQueueError::Authentication`] if a sealed frame fails to open, and
    /// [`SqlQueueError::Protocol`] if the frame does not decode as `T`.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, SqlQueueError> {
        let frame = match self.framed.next().await {
            None => return Ok(None),
            Some(frame) => frame
                .map_err(|err| SqlQueueError::ConnectionError(format!("receive failed: {err}")))?,
        };
        let bytes = match self.cipher.as_mut() {
            Some(cipher) => cipher.open(frame.to_vec())?,
            None => frame.to_vec(),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| SqlQueueError::Protocol(format!("malformed frame: {err}")))
    }

    /// Like [`Session::recv`], but a closed connection is an error.
    ///
    /// # Errors
    /// As [`Session::recv`], plus [`SqlQueueError::ConnectionError`] when the peer closed
    /// the connection before sending.
    pub async fn expect<T: DeserializeOwned>(
        &mut self,
        what: &str,
    ) -> Result<T, SqlQueueError> {
        self.recv().await?.ok_or_else(|| {
            SqlQueueError::ConnectionError(format!("connection closed while waiting for {what}"))
        })
    }
}
