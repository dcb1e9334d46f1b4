//! Connection handle definition
//!
//! The session that accepted a socket owns the socket itself; everyone else
//! (the Registry, other sessions delivering to it) holds a `ConnectionHandle`
//! that can only enqueue frames for that session's writer task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::error::DeliveryError;
use crate::message::{CloseReason, Outbound};

/// Cloneable reference to a live connection
///
/// Holds the sender half of the session's outbound channel, the shared
/// liveness flag and the connection's creation time.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Server → client frame channel
    sender: mpsc::Sender<Outbound>,
    /// Cleared by the owning session once it starts closing
    alive: Arc<AtomicBool>,
    /// When the connection was accepted
    created_at: Instant,
}

impl ConnectionHandle {
    /// Create a handle plus the receiver its writer task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            sender,
            alive: Arc::new(AtomicBool::new(true)),
            created_at: Instant::now(),
        };
        (handle, receiver)
    }

    /// Queue a text frame for this connection
    ///
    /// Waits at most `timeout` for room in the queue so one slow consumer
    /// cannot hold the sender forever.
    pub async fn deliver(&self, payload: String, timeout: Duration) -> Result<(), DeliveryError> {
        if !self.is_alive() {
            return Err(DeliveryError::Closed);
        }
        self.sender
            .send_timeout(Outbound::Text(payload), timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Ask the writer task to start the close handshake
    pub async fn close(&self, reason: CloseReason, timeout: Duration) -> Result<(), DeliveryError> {
        self.sender
            .send_timeout(Outbound::Close(reason), timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Whether the owning session is still active
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    /// Mark the connection as closing; further deliveries fail fast
    pub fn mark_closed(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Time since the connection was accepted
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
