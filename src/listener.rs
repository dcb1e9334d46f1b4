//! Transport Listener
//!
//! Binds the TCP socket and upgrades accepted streams to WebSocket.
//! Each call to `Listener::bind` binds a fresh socket; the accepted
//! connections form a lazy, unbounded sequence pulled by `accept`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::error::ServerError;

/// Bound listening socket
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind a listening socket on `addr`
    ///
    /// Fails with `ServerError::Bind` if the address is in use or cannot
    /// be resolved.
    pub async fn bind(addr: &str) -> Result<Self, ServerError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { inner })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.inner.local_addr()?)
    }

    /// Wait for the next TCP connection
    ///
    /// The WebSocket upgrade is done separately by `handshake`, inside the
    /// connection's own task, so a slow peer never stalls the accept loop.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        Ok(self.inner.accept().await?)
    }
}

/// Perform the WebSocket upgrade on an accepted stream
///
/// A failed or timed-out handshake drops the stream; the caller never
/// registers it.
pub async fn handshake(
    stream: TcpStream,
    timeout: Duration,
) -> Result<WebSocketStream<TcpStream>, ServerError> {
    match tokio::time::timeout(timeout, tokio_tungstenite::accept_async(stream)).await {
        Ok(Ok(ws)) => Ok(ws),
        Ok(Err(e)) => Err(ServerError::Handshake(e)),
        Err(_) => {
            debug!("Handshake timed out after {:?}", timeout);
            Err(ServerError::HandshakeTimeout(timeout))
        }
    }
}
