//! # RemoteStash
//!
//! Share a single stash item between devices on the local network.
//!
//! A device running [`transport::ExchangeServer`] advertises itself over
//! mDNS as `_remotestash._tcp` and serves its current item over HTTPS.
//! Other devices find it with [`discovery::DiscoveryService`] and push or
//! pull items through [`transport::PeerConnection`], trusting the server
//! by a pinned certificate shared between devices.

pub mod auth;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod item;
pub mod stash;
pub mod transport;

pub use config::Config;
pub use item::Item;

/// Result type alias for RemoteStash operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for RemoteStash operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Certificate or key error
    #[error("Authentication error: {0}")]
    Auth(#[from] auth::AuthError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
