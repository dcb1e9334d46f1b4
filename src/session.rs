//! Session Loop
//!
//! One session per accepted connection: WebSocket handshake, registration,
//! then a read → route → deliver cycle until the peer closes, a transport
//! error occurs or the server shuts down. The socket is split so that a
//! dedicated writer task owns the write half; everybody else reaches it
//! through the connection's outbound channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::error::{DeliveryError, ServerError};
use crate::listener::handshake;
use crate::message::{CloseReason, Message, Outbound};
use crate::registry::Registry;
use crate::router::{Delivery, Router};
use crate::types::ConnectionId;

/// Per-session tunables
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Text message that makes the server close the session
    pub close_sentinel: Option<String>,
    /// Outbound queue length per connection
    pub channel_capacity: usize,
    /// Max wait for room in a destination's queue
    pub write_timeout: Duration,
    /// Max wait for the writer to finish the close handshake
    pub close_timeout: Duration,
    /// Max wait for the WebSocket upgrade
    pub handshake_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            close_sentinel: Some("sair".to_string()),
            channel_capacity: 32,
            write_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// State shared by every session
#[derive(Debug)]
pub struct SessionContext {
    pub registry: Arc<Registry>,
    pub router: Router,
    pub settings: SessionSettings,
}

/// Why a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    /// Peer sent the close sentinel
    Sentinel,
    /// Server is shutting down
    Shutdown,
}

/// Outcome of fanning one message out to its destinations
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<(ConnectionId, DeliveryError)>,
}

/// Removes the connection from the Registry when dropped
///
/// Every exit path out of `run_session` drops this exactly once.
struct Registration {
    registry: Arc<Registry>,
    id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake and runs the session. A failed
/// handshake returns before anything is registered.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
    shutdown: broadcast::Receiver<()>,
) -> Result<SessionEnd, ServerError> {
    debug!("New TCP connection from {}", peer);
    let ws = handshake(stream, ctx.settings.handshake_timeout).await?;
    run_session(ws, peer, ctx, shutdown).await
}

/// Run the read/dispatch/write cycle for an upgraded connection
pub async fn run_session<S>(
    ws: WebSocketStream<S>,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<SessionEnd, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (handle, outbound_rx) = ConnectionHandle::channel(ctx.settings.channel_capacity);
    let id = ctx.registry.register(handle.clone());
    let registration = Registration {
        registry: Arc::clone(&ctx.registry),
        id,
    };
    info!("Connection {} opened from {}", id, peer);

    let (ws_sender, mut ws_receiver) = ws.split();
    let mut writer = tokio::spawn(write_loop(id, ws_sender, outbound_rx));
    let mut writer_finished = false;

    let outcome = loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if is_sentinel(&ctx.settings, &text) {
                        debug!("Connection {} sent close sentinel", id);
                        break Ok(SessionEnd::Sentinel);
                    }
                    dispatch(&ctx, Message::new(id, text)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("Connection {} closed by peer", id);
                    break Ok(SessionEnd::PeerClosed);
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    debug!("Ignoring binary frame from {}", id);
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite
                }
                Some(Err(e)) => {
                    warn!("Read error on connection {}: {}", id, e);
                    break Err(ServerError::Read(e));
                }
            },
            result = &mut writer => {
                writer_finished = true;
                break match result {
                    Ok(Ok(())) => Ok(SessionEnd::PeerClosed),
                    Ok(Err(e)) => {
                        warn!("Write error on connection {}: {}", id, e);
                        Err(e)
                    }
                    Err(e) => {
                        warn!("Writer task for {} failed: {}", id, e);
                        Ok(SessionEnd::PeerClosed)
                    }
                };
            }
            _ = shutdown.recv() => {
                debug!("Connection {} received shutdown signal", id);
                break Ok(SessionEnd::Shutdown);
            }
        }
    };

    // Closing: refuse new deliveries, leave the Registry, then finish the
    // close handshake within a bounded time.
    handle.mark_closed();
    drop(registration);

    if !writer_finished {
        let reason = match outcome {
            Ok(SessionEnd::Shutdown) => CloseReason::GoingAway,
            _ => CloseReason::Normal,
        };
        let close_timeout = ctx.settings.close_timeout;
        if handle.close(reason, close_timeout).await.is_err() {
            debug!("Writer for {} did not accept close request", id);
        }
        if tokio::time::timeout(close_timeout, &mut writer).await.is_err() {
            debug!("Writer for {} did not finish in {:?}, aborting", id, close_timeout);
            writer.abort();
        }
    }

    match &outcome {
        Ok(end) => info!(
            "Connection {} from {} closed after {:?} ({:?})",
            id,
            peer,
            handle.age(),
            end
        ),
        Err(e) => info!(
            "Connection {} from {} closed after {:?}: {}",
            id,
            peer,
            handle.age(),
            e
        ),
    }
    outcome
}

/// Route one message and deliver it
async fn dispatch(ctx: &SessionContext, message: Message) {
    let delivery = ctx.router.route(&message, &ctx.registry);
    let report = deliver_all(&ctx.registry, &delivery, ctx.settings.write_timeout).await;
    debug!(
        "Message from {} delivered to {}/{} destinations",
        message.origin,
        report.delivered,
        delivery.targets.len()
    );
}

/// Deliver a routed message to every destination
///
/// Destinations are written concurrently; a failure on one is logged and
/// does not stop delivery to the others.
pub async fn deliver_all(
    registry: &Registry,
    delivery: &Delivery,
    timeout: Duration,
) -> DeliveryReport {
    let attempts = delivery.targets.iter().map(|&target| {
        let handle = registry.lookup(target);
        let payload = delivery.payload.clone();
        async move {
            let result = match handle {
                Some(handle) => handle.deliver(payload, timeout).await,
                None => Err(DeliveryError::NotFound),
            };
            (target, result)
        }
    });

    let mut report = DeliveryReport::default();
    for (target, result) in join_all(attempts).await {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!("Delivery to {} failed: {}", target, e);
                report.failed.push((target, e));
            }
        }
    }
    report
}

fn is_sentinel(settings: &SessionSettings, text: &str) -> bool {
    settings
        .close_sentinel
        .as_deref()
        .is_some_and(|sentinel| text.trim() == sentinel)
}

/// Writer task: outbound channel → WebSocket
async fn write_loop<S>(
    id: ConnectionId,
    mut ws_sender: SplitSink<WebSocketStream<S>, WsMessage>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(outbound) = outbound_rx.recv().await {
        match outbound {
            Outbound::Text(text) => {
                ws_sender
                    .send(WsMessage::Text(text.into()))
                    .await
                    .map_err(ServerError::Write)?;
            }
            Outbound::Close(reason) => {
                let code = match reason {
                    CloseReason::Normal => CloseCode::Normal,
                    CloseReason::GoingAway => CloseCode::Away,
                };
                let frame = CloseFrame {
                    code,
                    reason: reason.as_str().into(),
                };
                // Fails harmlessly if the peer already completed the close
                let _ = ws_sender.send(WsMessage::Close(Some(frame))).await;
                break;
            }
        }
    }

    let _ = ws_sender.close().await;
    debug!("Write task ended for {}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::EchoPolicy;

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_deliver_all_tolerates_partial_failure() {
        let registry = Registry::new();
        let (a, mut rx_a) = ConnectionHandle::channel(4);
        let (b, rx_b) = ConnectionHandle::channel(4);
        let (c, mut rx_c) = ConnectionHandle::channel(4);
        let id_a = registry.register(a);
        let id_b = registry.register(b);
        let id_c = registry.register(c);
        drop(rx_b);

        let delivery = Delivery {
            targets: vec![id_a, id_b, id_c],
            payload: "hi".to_string(),
        };
        let report = deliver_all(&registry, &delivery, TIMEOUT).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, vec![(id_b, DeliveryError::Closed)]);
        assert_eq!(rx_a.recv().await, Some(Outbound::Text("hi".to_string())));
        assert_eq!(rx_c.recv().await, Some(Outbound::Text("hi".to_string())));
    }

    #[tokio::test]
    async fn test_deliver_all_unknown_target() {
        let registry = Registry::new();
        let delivery = Delivery {
            targets: vec![ConnectionId(404)],
            payload: "hi".to_string(),
        };

        let report = deliver_all(&registry, &delivery, TIMEOUT).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, vec![(ConnectionId(404), DeliveryError::NotFound)]);
    }

    #[tokio::test]
    async fn test_deliver_all_skips_closing_destination() {
        let registry = Registry::new();
        let (a, _rx_a) = ConnectionHandle::channel(4);
        let id_a = registry.register(a.clone());
        a.mark_closed();

        let delivery = Delivery {
            targets: vec![id_a],
            payload: "late".to_string(),
        };
        let report = deliver_all(&registry, &delivery, TIMEOUT).await;

        assert_eq!(report.failed, vec![(id_a, DeliveryError::Closed)]);
    }

    #[test]
    fn test_sentinel_matching() {
        let settings = SessionSettings::default();
        assert!(is_sentinel(&settings, "sair"));
        assert!(is_sentinel(&settings, "sair\n"));
        assert!(!is_sentinel(&settings, "sair agora"));

        let disabled = SessionSettings {
            close_sentinel: None,
            ..SessionSettings::default()
        };
        assert!(!is_sentinel(&disabled, "sair"));
    }

    #[tokio::test]
    async fn test_dispatch_echoes_to_origin() {
        let registry = Arc::new(Registry::new());
        let (handle, mut rx) = ConnectionHandle::channel(4);
        let id = registry.register(handle);
        let ctx = SessionContext {
            registry,
            router: Router::new(EchoPolicy {
                prefix: "Echo: ".to_string(),
            }),
            settings: SessionSettings::default(),
        };

        dispatch(&ctx, Message::new(id, "one")).await;
        dispatch(&ctx, Message::new(id, "two")).await;

        assert_eq!(rx.recv().await, Some(Outbound::Text("Echo: one".to_string())));
        assert_eq!(rx.recv().await, Some(Outbound::Text("Echo: two".to_string())));
    }
}
