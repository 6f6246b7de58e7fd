//! CFD broker session plumbing: token pair and keep-alive channel.
//!
//! The broker session dies after ten minutes of silence, so a background
//! task holds a streaming connection open and pings it every nine minutes
//! with the session tokens attached.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

/// Ping cadence keeping the broker session alive.
pub const PING_INTERVAL: Duration = Duration::from_secs(9 * 60);

/// The token pair returned by the session handshake. Both values travel as
/// headers on every authenticated REST call and inside streaming pings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub cst: String,
    pub security_token: String,
}

/// Handle to the keep-alive task; dropping it without [`KeepAlive::shutdown`]
/// leaves the task running until the connection drops.
#[derive(Debug)]
pub struct KeepAlive {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl KeepAlive {
    /// Signals the ping loop to close the channel and waits for it to end.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Opens the streaming channel and pings it on a fixed cadence, independent
/// of request handlers.
pub fn spawn_keepalive(streaming_url: String, tokens: SessionTokens) -> KeepAlive {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let (ws, _) = match connect_async(streaming_url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Keep-alive channel failed to connect: {}", e);
                return;
            }
        };
        info!("Keep-alive streaming channel open");
        let (mut write, mut read) = ws.split();

        let mut ping = interval(PING_INTERVAL);
        ping.tick().await; // consume the immediate first tick
        let mut correlation = 0u64;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    correlation += 1;
                    let msg = json!({
                        "destination": "ping",
                        "correlationId": correlation.to_string(),
                        "cst": tokens.cst,
                        "securityToken": tokens.security_token,
                    });
                    if let Err(e) = write.send(Message::Text(msg.to_string().into())).await {
                        warn!("Keep-alive ping failed: {}", e);
                        break;
                    }
                    debug!(correlation, "Session keep-alive ping sent");
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Keep-alive channel error: {}", e);
                            break;
                        }
                        None => {
                            info!("Keep-alive channel closed by venue");
                            break;
                        }
                    }
                }
                _ = stop_rx.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    KeepAlive {
        stop: stop_tx,
        task,
    }
}
