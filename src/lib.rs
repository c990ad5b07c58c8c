#[macro_use]
extern crate serde_derive;

pub mod client;
pub mod codec;
pub mod config;
pub mod framed_connection;
pub mod keyring;
pub mod logging;
pub mod packet;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use client::{ChatView, Client};
pub use config::ServerConfig;
pub use keyring::{encrypt_with, KeyPair, KeyRing};
pub use packet::Packet;
pub use registry::Registry;
pub use router::Router;
pub use server::Server;
pub use session::{Session, SessionId};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initialise libsodium. Safe to call more than once.
pub fn init() -> Result<()> {
    sodiumoxide::init().map_err(|_| "failed to initialise libsodium")?;
    Ok(())
}

/// Name given to a session until it picks one of its own.
pub fn default_name(id: SessionId) -> String {
    format!("Client {}", id)
}

/// Short hex fingerprint of a public key, for log lines.
pub(crate) fn fingerprint(key: &sodiumoxide::crypto::box_::PublicKey) -> String {
    hex::encode(&key.as_ref()[..6])
}
