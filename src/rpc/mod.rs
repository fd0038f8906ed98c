//! Socket access to a queue: one remote procedure, `sql(statement, params)`, over either a
//! plaintext or an authenticated, encrypted transport.

mod client;
mod encrypted;
pub mod protocol;
mod server;
mod session;
mod transport;

pub use client::RpcClient;
pub use encrypted::{EncryptedTransport, ServerKeypair};
pub use server::{RpcServer, ServerHandle};
pub use session::Session;
pub use transport::{ENCRYPTED_ADDR, PLAIN_ADDR, PlainTransport, Transport};
