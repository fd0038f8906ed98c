//! Authenticated, encrypted transport.
//!
//! The server owns an Ed25519 identity key pair whose public half is handed to clients
//! out of band (as hex). The key never crosses the socket, so it doubles as the client
//! credential. Each connection runs a signed X25519 exchange:
//!
//! 1. client → server: `ClientHello` with a fresh X25519 public key
//! 2. server → client: `ServerHello` with its own X25519 key and an Ed25519 signature over
//!    both ephemeral keys
//! 3. the client verifies the signature with the key it was given
//! 4. both sides derive one AES-256-GCM key per direction with HKDF-SHA256
//! 5. client → server (sealed): `AuthRequest` carrying an HMAC-SHA256 of the handshake
//!    transcript keyed by the advertised key; the server checks it, replies with a sealed
//!    `AuthReply`, and only then serves calls
//!
//! Frame nonces are per-direction counters, so replayed or reordered frames fail to open.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey, X25519};
use ring::{hkdf, hmac};
use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::SqlQueueError;

use super::protocol::{AuthReply, AuthRequest, ClientHello, ServerHello};
use super::session::Session;
use super::transport::{ENCRYPTED_ADDR, Transport};

const PROTOCOL_VERSION: u8 = 1;
const TRANSCRIPT_LABEL: &[u8] = b"sql-queue/1 handshake";
const CLIENT_TO_SERVER: &[u8] = b"sql-queue/1 c2s";
const SERVER_TO_CLIENT: &[u8] = b"sql-queue/1 s2c";
const AUTH_LABEL: &[u8] = b"sql-queue/1 client proof";

/// The server's long-lived Ed25519 identity.
pub struct ServerKeypair {
    pair: Ed25519KeyPair,
    pkcs8: Vec<u8>,
}

impl ServerKeypair {
    /// Generate a new random identity.
    ///
    /// # Errors
    /// Returns [`SqlQueueError::ConfigError`] if the system RNG fails.
    pub fn generate() -> Result<Self, SqlQueueError> {
        let rng = SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| SqlQueueError::ConfigError("failed to generate Ed25519 key pair".into()))?;
        Self::from_pkcs8(document.as_ref())
    }

    /// Load an identity from PKCS#8 bytes (as written by [`ServerKeypair::pkcs8_bytes`]).
    ///
    /// # Errors
    /// Returns [`SqlQueueError::ConfigError`] if the bytes are not an Ed25519 PKCS#8 document.
    pub fn from_pkcs8(bytes: &[u8]) -> Result<Self, SqlQueueError> {
        let pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(bytes).map_err(|err| {
            SqlQueueError::ConfigError(format!("invalid Ed25519 PKCS#8 document: {err}"))
        })?;
        Ok(Self {
            pair,
            pkcs8: bytes.to_vec(),
        })
    }

    /// PKCS#8 encoding, for persisting the identity.
    #[must_use]
    pub fn pkcs8_bytes(&self) -> &[u8] {
        &self.pkcs8
    }

    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        self.pair.public_key().as_ref()
    }

    /// The key clients must be given to connect. Anyone holding it may issue calls, so
    /// distribute it the way you would a password.
    #[must_use]
    pub fn public_hex(&self) -> String {
        hex::encode(self.public_key())
    }
}

enum Role {
    Server(Arc<ServerKeypair>),
    Client { trusted: Vec<u8> },
}

pub struct EncryptedTransport {
    role: Role,
}

impl EncryptedTransport {
    /// Transport for the serving side.
    #[must_use]
    pub fn server(keypair: ServerKeypair) -> Self {
        Self {
            role: Role::Server(Arc::new(keypair)),
        }
    }

    /// Transport for a client that trusts the server key `public_hex`.
    ///
    /// # Errors
    /// Returns [`SqlQueueError::ConfigError`] if the key is not 32 hex-encoded bytes.
    pub fn client(public_hex: &str) -> Result<Self, SqlQueueError> {
        let trusted = hex::decode(public_hex.trim())
            .ok()
            .filter(|key| key.len() == 32)
            .ok_or_else(|| {
                SqlQueueError::ConfigError("server key must be 64 hex characters".into())
            })?;
        Ok(Self {
            role: Role::Client { trusted },
        })
    }

    /// Advertised public key, when this is the serving side.
    #[must_use]
    pub fn public_hex(&self) -> Option<String> {
        match &self.role {
            Role::Server(keypair) => Some(keypair.public_hex()),
            Role::Client { .. } => None,
        }
    }
}

#[async_trait]
impl Transport for EncryptedTransport {
    fn name(&self) -> &'static str {
        "encrypted"
    }

    fn default_addr(&self) -> SocketAddr {
        SocketAddr::from(ENCRYPTED_ADDR)
    }

    async fn accept(&self, stream: TcpStream) -> Result<Session, SqlQueueError> {
        let Role::Server(keypair) = &self.role else {
            return Err(SqlQueueError::ConfigError(
                "client-side encrypted transport cannot accept connections".into(),
            ));
        };
        let mut session = Session::new(stream);

        let hello: ClientHello = session.expect("client hello").await?;
        if hello.version != PROTOCOL_VERSION {
            return Err(SqlQueueError::Protocol(format!(
                "unsupported handshake version {}",
                hello.version
            )));
        }
        let client_ephemeral = decode_key(&hello.ephemeral, "client ephemeral key")?;

        let (private, server_ephemeral) = ephemeral_key()?;
        let transcript = transcript(&client_ephemeral, &server_ephemeral);
        session
            .send(&ServerHello {
                ephemeral: hex::encode(&server_ephemeral),
                signature: hex::encode(keypair.pair.sign(&transcript).as_ref()),
            })
            .await?;

        let cipher = SessionCipher::agree(
            private,
            &client_ephemeral,
            &transcript,
            SERVER_TO_CLIENT,
            CLIENT_TO_SERVER,
        )?;
        session.install_cipher(cipher);

        let auth: AuthRequest = session.expect("authentication").await?;
        let accepted = hex::decode(&auth.proof).is_ok_and(|proof| {
            let key = hmac::Key::new(hmac::HMAC_SHA256, keypair.public_key());
            hmac::verify(&key, &auth_message(&transcript), &proof).is_ok()
        });
        session.send(&AuthReply { accepted }).await?;
        if !accepted {
            return Err(SqlQueueError::Authentication(
                "client did not prove knowledge of the server key".into(),
            ));
        }
        debug!("encrypted session authenticated");
        Ok(session)
    }

    async fn connect(&self, stream: TcpStream) -> Result<Session, SqlQueueError> {
        let Role::Client { trusted } = &self.role else {
            return Err(SqlQueueError::ConfigError(
                "server-side encrypted transport cannot open client connections".into(),
            ));
        };
        let mut session = Session::new(stream);

        let (private, client_ephemeral) = ephemeral_key()?;
        session
            .send(&ClientHello {
                version: PROTOCOL_VERSION,
                ephemeral: hex::encode(&client_ephemeral),
            })
            .await?;

        let hello: ServerHello = session.expect("server hello").await?;
        let server_ephemeral = decode_key(&hello.ephemeral, "server ephemeral key")?;
        let signature_bytes = hex::decode(&hello.signature)
            .map_err(|_| SqlQueueError::Protocol("server signature is not hex".into()))?;
        let transcript = transcript(&client_ephemeral, &server_ephemeral);
        signature::UnparsedPublicKey::new(&signature::ED25519, trusted)
            .verify(&transcript, &signature_bytes)
            .map_err(|_| {
                SqlQueueError::Authentication(
                    "server handshake signature does not match the trusted key".into(),
                )
            })?;

        let cipher = SessionCipher::agree(
            private,
            &server_ephemeral,
            &transcript,
            CLIENT_TO_SERVER,
            SERVER_TO_CLIENT,
        )?;
        session.install_cipher(cipher);

        session
            .send(&AuthRequest {
                proof: client_proof(trusted, &transcript),
            })
            .await?;
        let reply: AuthReply = session.expect("authentication reply").await?;
        if !reply.accepted {
            return Err(SqlQueueError::Authentication(
                "server rejected authentication".into(),
            ));
        }
        Ok(session)
    }
}

fn auth_message(transcript: &[u8]) -> Vec<u8> {
    [AUTH_LABEL, transcript].concat()
}

/// Hex HMAC-SHA256 of the transcript, keyed by the advertised server key.
fn client_proof(server_key: &[u8], transcript: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, server_key);
    hex::encode(hmac::sign(&key, &auth_message(transcript)).as_ref())
}

fn ephemeral_key() -> Result<(EphemeralPrivateKey, Vec<u8>), SqlQueueError> {
    let rng = SystemRandom::new();
    let private = EphemeralPrivateKey::generate(&X25519, &rng)
        .map_err(|_| SqlQueueError::ConfigError("failed to generate X25519 key".into()))?;
    let public = private
        .compute_public_key()
        .map_err(|_| SqlQueueError::ConfigError("failed to derive X25519 public key".into()))?;
    Ok((private, public.as_ref().to_vec()))
}

fn decode_key(text: &str, what: &str) -> Result<Vec<u8>, SqlQueueError> {
    hex::decode(text)
        .ok()
        .filter(|key| key.len() == 32)
        .ok_or_else(|| SqlQueueError::Protocol(format!("{what} is not 32 hex-encoded bytes")))
}

fn transcript(client_ephemeral: &[u8], server_ephemeral: &[u8]) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(TRANSCRIPT_LABEL.len() + client_ephemeral.len() + server_ephemeral.len());
    out.extend_from_slice(TRANSCRIPT_LABEL);
    out.extend_from_slice(client_ephemeral);
    out.extend_from_slice(server_ephemeral);
    out
}

/// Directional AES-256-GCM keys with counter nonces.
pub(crate) struct SessionCipher {
    sealing: LessSafeKey,
    opening: LessSafeKey,
    sent: u64,
    received: u64,
}

impl SessionCipher {
    fn agree(
        private: EphemeralPrivateKey,
        peer_public: &[u8],
        salt: &[u8],
        seal_label: &[u8],
        open_label: &[u8],
    ) -> Result<Self, SqlQueueError> {
        let peer = UnparsedPublicKey::new(&X25519, peer_public);
        agreement::agree_ephemeral(private, &peer, |secret| {
            Self::from_secret(secret, salt, seal_label, open_label)
        })
        .map_err(|_| SqlQueueError::Authentication("key agreement failed".into()))?
    }

    pub(crate) fn from_secret(
        secret: &[u8],
        salt: &[u8],
        seal_label: &[u8],
        open_label: &[u8],
    ) -> Result<Self, SqlQueueError> {
        let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(secret);
        Ok(Self {
            sealing: derive_key(&prk, seal_label)?,
            opening: derive_key(&prk, open_label)?,
            sent: 0,
            received: 0,
        })
    }

    pub(crate) fn seal(&mut self, mut frame: Vec<u8>) -> Result<Vec<u8>, SqlQueueError> {
        let nonce = next_nonce(&mut self.sent)?;
        self.sealing
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut frame)
            .map_err(|_| SqlQueueError::Protocol("failed to seal frame".into()))?;
        Ok(frame)
    }

    pub(crate) fn open(&mut self, mut frame: Vec<u8>) -> Result<Vec<u8>, SqlQueueError> {
        let nonce = next_nonce(&mut self.received)?;
        let len = self
            .opening
            .open_in_place(nonce, Aad::empty(), &mut frame)
            .map_err(|_| SqlQueueError::Authentication("frame failed authentication".into()))?
            .len();
        frame.truncate(len);
        Ok(frame)
    }
}

fn derive_key(prk: &hkdf::Prk, label: &[u8]) -> Result<LessSafeKey, SqlQueueError> {
    let info = [label];
    let okm = prk
        .expand(&info, &aead::AES_256_GCM)
        .map_err(|_| SqlQueueError::ConfigError("HKDF expansion failed".into()))?;
    Ok(LessSafeKey::new(UnboundKey::from(okm)))
}

fn next_nonce(counter: &mut u64) -> Result<Nonce, SqlQueueError> {
    let current = *counter;
    *counter = current
        .checked_add(1)
        .ok_or_else(|| SqlQueueError::Protocol("session nonce space exhausted".into()))?;
    let mut bytes = [0u8; aead::NONCE_LEN];
    bytes[4..].copy_from_slice(&current.to_be_bytes());
    Ok(Nonce::assume_unique_for_key(bytes))
}
