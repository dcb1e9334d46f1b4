//! WebSocket Echo/Relay Server Library
//!
//! A small bidirectional connection-handling core built with
//! tokio-tungstenite. Every accepted connection gets its own session task;
//! sessions only meet through the shared `Registry` and `Router`.
//!
//! # Features
//! - WebSocket handshake with timeout
//! - Concurrent connection registry with never-reused identifiers
//! - Pluggable routing policies: echo, broadcast, targeted
//! - Partial-failure tolerant delivery
//! - Close sentinel and graceful shutdown with close handshakes
//! - Interactive line client
//!
//! # Architecture
//! - `Listener` binds the socket and yields accepted streams
//! - `session` upgrades, registers and runs the read/dispatch/write cycle
//! - `Router` turns an inbound `Message` into a `Delivery`
//! - `Registry` maps `ConnectionId` to `ConnectionHandle`
//!
//! # Example
//! ```ignore
//! use echo_relay::{Config, Listener, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let server = Server::new(&config).unwrap();
//!     let listener = Listener::bind(&config.address).await.unwrap();
//!
//!     server
//!         .serve(listener, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use config::Config;
pub use connection::ConnectionHandle;
pub use error::{ClientError, ConfigError, DeliveryError, ServerError};
pub use listener::Listener;
pub use message::{Envelope, Message, Outbound};
pub use registry::Registry;
pub use router::{BroadcastPolicy, Delivery, EchoPolicy, PolicyKind, Router, RoutingPolicy, TargetedPolicy};
pub use server::Server;
pub use session::{SessionEnd, SessionSettings};
pub use types::ConnectionId;
