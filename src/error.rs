//! Error types for the relay server
//!
//! Defines listener/session errors, configuration errors, per-destination
//! delivery errors and client errors. Uses thiserror for ergonomic error definitions.

use std::time::Duration;

use thiserror::Error;

/// Server and session errors
///
/// `Bind` is fatal to the process. Everything else is scoped to a single
/// connection and only ends that connection's session.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not bind its socket (fatal)
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// WebSocket upgrade negotiation failed
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[source] tokio_tungstenite::tungstenite::Error),

    /// Peer did not finish the handshake in time
    #[error("WebSocket handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Transport fault while reading a frame
    #[error("read error: {0}")]
    Read(#[source] tokio_tungstenite::tungstenite::Error),

    /// Transport fault while writing a frame
    #[error("write error: {0}")]
    Write(#[source] tokio_tungstenite::tungstenite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors (fatal to startup)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Routing policy name not recognised
    #[error("unknown routing policy: {0}")]
    UnknownPolicy(String),
}

/// Per-destination delivery errors
///
/// Logged by the sending session and never propagated further.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Destination is closing or its writer is gone
    #[error("connection closed")]
    Closed,

    /// Destination queue stayed full for the whole write timeout
    #[error("delivery timed out")]
    Timeout,

    /// Destination is not registered
    #[error("connection not found")]
    NotFound,
}

/// Interactive client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connecting or upgrading failed
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// WebSocket error after the connection was established
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Terminal IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
