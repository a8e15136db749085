//! HTTPS exchange of stash items between peers
//!
//! The server side answers `/status`, `/pull`, `/last` and `/push` over a
//! hand-rolled HTTP/1.1 layer on top of TLS. The client side selects an
//! address for a discovered peer and drives the same routes with `reqwest`.

use thiserror::Error;

pub mod client;
pub mod http;
pub mod protocol;
pub mod server;


pub use client::PeerConnection;
pub use protocol::{
    PushResponse, Route, ServerStatus, PROTOCOL_HEADER, PROTOCOL_VERSION,
};
pub use server::{ExchangeServer, LifecycleEvent, ServerOptions, ServerState};

/// Default limit for a pushed body
pub const DEFAULT_MAX_BODY_SIZE: usize = 50 * 1024 * 1024;

/// Transport layer errors with user-friendly messages
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO error
    #[error("RS001: Network error: {0}. Check that the other device is reachable.")]
    Io(#[from] std::io::Error),

    /// TLS setup error
    #[error("RS002: TLS setup failed: {0}")]
    Tls(#[from] crate::auth::AuthError),

    /// HTTP client error
    #[error("RS003: Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding error
    #[error("RS004: Data format error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request could not be parsed
    #[error("RS005: Malformed request: {0}")]
    Malformed(String),

    /// Request head exceeded the header buffer
    #[error("RS006: Request headers exceed {limit} bytes")]
    HeadTooLarge { limit: usize },

    /// Request body exceeded the configured limit
    #[error("RS007: Request body of {size} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { size: usize, limit: usize },

    /// Peer closed the connection mid-request
    #[error("RS008: Connection closed before the request was complete")]
    ConnectionClosed,

    /// Peer has no usable address
    #[error("RS009: No usable address for '{peer}'")]
    NoAddress { peer: String },
}

impl TransportError {
    /// HTTP status the server answers with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            TransportError::Malformed(_) | TransportError::HeadTooLarge { .. } => 400,
            TransportError::BodyTooLarge { .. } => 413,
            _ => 500,
        }
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
