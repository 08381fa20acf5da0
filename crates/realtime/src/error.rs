//! Error types for the realtime channel, its transports and the order API.

use std::time::Duration;

use thiserror::Error;

/// Failures of the underlying connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// No live socket; emits are best-effort and dropped.
    #[error("Not connected to server")]
    NotConnected,

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] topup_protocol::FrameError),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

/// Errors surfaced by `RealtimeOrderChannel`.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Principal id must not be empty")]
    InvalidPrincipal,

    #[error("Transport connect failed: {0}")]
    TransportConnect(#[from] TransportError),

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    /// The channel was torn down with `disconnect()` and cannot be reused.
    #[error("Channel is closed")]
    Closed,

    /// A watch stopped receiving updates before a terminal status.
    #[error("Order watch ended before a terminal status")]
    WatchEnded,
}

/// Errors of the order HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Still unauthorized after a token refresh.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Invalid URL in {var}: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
}
