//! Server lifecycle
//!
//! Owns the Registry and Router, runs the accept loop and spawns one
//! session task per connection. On shutdown every session is told to
//! close cleanly; stragglers are aborted after a grace period.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{ConfigError, ServerError};
use crate::listener::Listener;
use crate::registry::Registry;
use crate::router::Router;
use crate::session::{handle_connection, SessionContext};

/// Pause after a failed accept so errors like EMFILE don't spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The relay server
pub struct Server {
    /// Registry, router and session tunables shared with every session
    ctx: Arc<SessionContext>,
    /// Fan-out shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// How long shutdown waits for sessions to close
    shutdown_grace: Duration,
}

impl Server {
    /// Build a server from configuration
    ///
    /// Fails with `UnknownPolicy` before any socket is bound.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let router = Router::from_name(
            &config.policy,
            &config.echo_prefix,
            config.broadcast_exclude_origin,
        )?;
        Ok(Self::with_router(config, router))
    }

    /// Build a server around a custom router
    pub fn with_router(config: &Config, router: Router) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let ctx = SessionContext {
            registry: Arc::new(Registry::new()),
            router,
            settings: config.session_settings(),
        };
        Self {
            ctx: Arc::new(ctx),
            shutdown_tx,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Shared connection registry
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.ctx.registry)
    }

    /// Accept connections until `shutdown` resolves, then close every session
    pub async fn serve<F>(self, listener: Listener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, closing listener");
                    break;
                }

                res = listener.accept() => match res {
                    Ok((stream, peer)) => {
                        debug!("Accepted TCP connection from {}", peer);
                        let ctx = Arc::clone(&self.ctx);
                        let shutdown_rx = self.shutdown_tx.subscribe();

                        sessions.spawn(async move {
                            match handle_connection(stream, peer, ctx, shutdown_rx).await {
                                Ok(_) => {}
                                Err(e @ (ServerError::Handshake(_) | ServerError::HandshakeTimeout(_))) => {
                                    debug!("Dropped connection from {}: {}", peer, e);
                                }
                                Err(e) => {
                                    warn!("Session for {} terminated: {}", peer, e);
                                }
                            }
                        });
                    }
                    Err(e) => accept_backoff(&e).await,
                },

                Some(res) = sessions.join_next() => {
                    if let Err(e) = res {
                        if e.is_panic() {
                            error!("A session task panicked: {:?}", e);
                        }
                    }
                }
            }
        }

        info!("Signalling {} active sessions to close", self.ctx.registry.len());
        if self.shutdown_tx.send(()).is_err() {
            debug!("No sessions listening for shutdown");
        }

        let drain = async { while sessions.join_next().await.is_some() {} };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(
                "Sessions still open after {:?}, aborting them",
                self.shutdown_grace
            );
            sessions.shutdown().await;
        }

        info!("Server shutdown complete");
    }
}

/// Log a failed accept and wait before the next one
async fn accept_backoff(e: &ServerError) {
    error!("Failed to accept connection: {}", e);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// Bind `config.address` and serve until `shutdown` resolves
pub async fn run<F>(config: &Config, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()>,
{
    let server = Server::new(config)?;
    let listener = Listener::bind(&config.address).await?;
    info!(
        "WebSocket relay listening on {} (policy: {})",
        listener.local_addr()?,
        config.policy
    );
    server.serve(listener, shutdown).await;
    Ok(())
}
