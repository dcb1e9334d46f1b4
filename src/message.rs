//! Message definitions
//!
//! `Message` is the immutable inbound value handed to the Router,
//! `Outbound` is what a session's writer task puts on the wire, and
//! `Envelope` is the JSON shape used by the targeted routing policy.

use serde::Deserialize;

use crate::types::ConnectionId;

/// Inbound text message with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Connection the message arrived on
    pub origin: ConnectionId,
    /// Whole-message text payload
    pub text: String,
}

impl Message {
    pub fn new(origin: ConnectionId, text: impl Into<String>) -> Self {
        Self {
            origin,
            text: text.into(),
        }
    }
}

/// Frame queued for a session's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame
    Text(String),
    /// Start the close handshake with the given code and reason
    Close(CloseReason),
}

/// Why the server is closing a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client asked to leave (close sentinel)
    Normal,
    /// Server is shutting down
    GoingAway,
}

impl CloseReason {
    /// Human readable reason sent in the close frame
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Normal => "bye",
            CloseReason::GoingAway => "server shutting down",
        }
    }
}

/// Targeted delivery envelope
///
/// Clients using the targeted policy send
/// `{"to": [2, 5], "text": "hello"}`.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Destination connection ids, in delivery order
    pub to: Vec<ConnectionId>,
    /// Text to deliver
    pub text: String,
}

impl Envelope {
    /// Parse an envelope from a raw text message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
