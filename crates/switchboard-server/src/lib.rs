//! Multi-client TCP chat server.
//!
//! Clients log in with a user id and password, then exchange broadcast and
//! whisper messages. Joins and departures are announced to everyone else.
//!
//! # Architecture
//!
//! - `engine`: listener, completion queue, worker pool and teardown
//! - `session`: per-connection state, receive ring and send queue
//! - `registry`: fixed session pool and authenticated-user directory
//! - `dispatcher`: packet reassembly and login/broadcast/whisper handling
//! - `store`: credentials, session tokens and online presence
//! - `config`: configuration loading and validation
//! - `server`: startup and signal handling
//!
//! # Example
//!
//! ```no_run
//! use switchboard_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let config = ServerConfig::from_args();
//!     config.validate()?;
//!
//!     let server = Server::new(config)?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod registry;
pub mod ring;
pub mod server;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use config::ServerConfig;
pub use dispatcher::PacketDispatcher;
pub use engine::{Completion, IoEngine};
pub use error::{
    ConfigError, FramingError, RegistryError, ServerError, SessionError, StoreError,
};
pub use registry::SessionRegistry;
pub use ring::RingBuffer;
pub use server::Server;
pub use session::{Departure, Link, Session, SessionLimits, SessionState};
pub use store::{CredentialStore, MemoryStore, UserRecord, generate_token, hash_password};
