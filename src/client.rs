//! Interactive line client
//!
//! Sends each input line as a text message and prints every text message
//! received. The sentinel line is forwarded so the server closes the
//! session after its pending replies; end of input closes from our side.
//! Either way the client exits once the close handshake completes, or
//! after `CLOSE_TIMEOUT` per stage if the server never answers.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// How long each closing stage waits for the server
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where the client is in its shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Relaying input lines
    Open,
    /// Sentinel sent, waiting for the server to close
    SentinelSent,
    /// Our close frame sent, waiting for the reply
    Closing,
}

/// Connect to `url` and relay lines between `input` and the server
///
/// Received messages are written to `output`, one per line.
pub async fn run<R, W>(url: &str, sentinel: &str, input: R, mut output: W) -> Result<(), ClientError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|source| ClientError::Connect {
            url: url.to_string(),
            source,
        })?;
    info!("Connected to {}", url);

    let (mut ws_sender, mut ws_receiver) = ws.split();
    let mut lines = input.lines();
    let mut phase = Phase::Open;
    let close_deadline = tokio::time::sleep(CLOSE_TIMEOUT);
    tokio::pin!(close_deadline);

    loop {
        tokio::select! {
            line = lines.next_line(), if phase == Phase::Open => {
                match line? {
                    Some(line) if line.trim() == sentinel => {
                        // Server answers with its own close after draining replies
                        debug!("Sentinel entered, asking server to close");
                        ws_sender.send(WsMessage::Text(line)).await?;
                        phase = Phase::SentinelSent;
                        close_deadline.as_mut().reset(Instant::now() + CLOSE_TIMEOUT);
                    }
                    Some(line) => {
                        ws_sender.send(WsMessage::Text(line)).await?;
                    }
                    None => {
                        debug!("Input finished, closing connection");
                        ws_sender.close().await?;
                        phase = Phase::Closing;
                        close_deadline.as_mut().reset(Instant::now() + CLOSE_TIMEOUT);
                    }
                }
            }
            _ = &mut close_deadline, if phase != Phase::Open => {
                if phase == Phase::SentinelSent {
                    debug!("Server did not close after sentinel, closing ourselves");
                    let _ = ws_sender.close().await;
                    phase = Phase::Closing;
                    close_deadline.as_mut().reset(Instant::now() + CLOSE_TIMEOUT);
                } else {
                    warn!("No close reply from server within {:?}", CLOSE_TIMEOUT);
                    break;
                }
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    output.write_all(text.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("Server closed connection: {:?}", frame);
                    // Flushes tungstenite's queued close reply
                    let _ = ws_sender.close().await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Connection error: {}", e);
                    return Err(e.into());
                }
                None => break,
            },
        }
    }

    info!("Disconnected from {}", url);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::listener::Listener;
    use crate::server::Server;

    #[tokio::test]
    async fn test_client_round_trip_until_sentinel() {
        let config = Config {
            address: "127.0.0.1:0".to_string(),
            ..Config::default()
        };
        let server = Server::new(&config).unwrap();
        let registry = server.registry();
        let listener = Listener::bind(&config.address).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener, std::future::pending()));

        let input: &[u8] = "Olá, servidor!\nsegunda\nsair\nnever sent\n".as_bytes();
        let mut output = Vec::new();

        tokio::time::timeout(
            Duration::from_secs(5),
            run(&format!("ws://{}", addr), "sair", input, &mut output),
        )
        .await
        .unwrap()
        .unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("Echo: Olá, servidor!\n"));
        assert!(printed.contains("Echo: segunda\n"));
        assert!(!printed.contains("never sent"));

        tokio::time::timeout(Duration::from_secs(5), async move {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_client_exits_when_server_ignores_sentinel() {
        let config = Config {
            address: "127.0.0.1:0".to_string(),
            close_sentinel: None,
            ..Config::default()
        };
        let server = Server::new(&config).unwrap();
        let registry = server.registry();
        let listener = Listener::bind(&config.address).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener, std::future::pending()));

        let input: &[u8] = b"hi\nsair\nnever sent\n";
        let mut output = Vec::new();

        tokio::time::timeout(
            CLOSE_TIMEOUT * 2 + Duration::from_secs(2),
            run(&format!("ws://{}", addr), "sair", input, &mut output),
        )
        .await
        .expect("client did not exit")
        .unwrap();

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("Echo: hi\n"));
        assert!(!printed.contains("never sent"));

        tokio::time::timeout(Duration::from_secs(5), async move {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_client_connect_failure() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = run(&format!("ws://{}", addr), "sair", &b""[..], Vec::new()).await;
        assert!(matches!(result, Err(ClientError::Connect { .. })));
    }
}
