//! LLM realtime WebSocket client.
//!
//! [`RealtimeClient::connect`] opens the socket and returns a send handle plus
//! an event receiver: the connection task decodes every inbound frame into a
//! [`ServerEvent`] and forwards it on the channel, and the bridge reads that
//! channel from its own event loop. When the socket closes for any reason the
//! channel closes with it, which is the bridge's signal to apply its
//! reconnect policy. The client itself never reconnects.
//!
//! Outbound events are serialized through a bounded channel owned by the
//! connection task, so concurrent senders cannot interleave partial frames.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::{self, Message};

use super::config::{CONNECT_TIMEOUT_SECS, RealtimeOptions};
use super::messages::{ClientEvent, ServerEvent};

/// Capacity of the outbound and inbound event channels.
const CHANNEL_CAPACITY: usize = 256;

/// Errors from the realtime client.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The WebSocket handshake failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The WebSocket handshake did not complete in time
    #[error("connect timed out after {0}s")]
    ConnectTimeout(u64),

    /// The connection task is gone, so the socket is closed
    #[error("not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Handle to a live realtime connection.
///
/// Dropping the handle tears the connection down.
pub struct RealtimeClient {
    sender: mpsc::Sender<ClientEvent>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// Connect to the realtime endpoint and spawn the connection task.
    ///
    /// Returns the send handle and the server-event receiver. The handshake
    /// is bounded by [`CONNECT_TIMEOUT_SECS`].
    pub async fn connect(
        opts: &RealtimeOptions,
    ) -> RealtimeResult<(Self, mpsc::Receiver<ServerEvent>)> {
        let url = opts.ws_url();
        let host = host_of(&url);

        let request = http::Request::builder()
            .uri(&url)
            .header("Authorization", format!("Bearer {}", opts.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let connect = tokio_tungstenite::connect_async(request);
        let (ws_stream, _response) = timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), connect)
            .await
            .map_err(|_| RealtimeError::ConnectTimeout(CONNECT_TIMEOUT_SECS))?
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        tracing::debug!(%url, "realtime socket connected");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(event) = outgoing else {
                            // Send handle dropped: close the socket politely.
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("failed to serialize client event: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::warn!("realtime send failed: {e}");
                            break;
                        }
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if event_tx.send(event).await.is_err() {
                                            // Receiver gone; nothing left to do.
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("dropping malformed server event: {e}");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::warn!("failed to send pong: {e}");
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                tracing::debug!(?frame, "realtime socket closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!("realtime socket error: {e}");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            // event_tx drops here, closing the receiver and signalling the
            // bridge that this connection is gone.
        });

        Ok((
            Self {
                sender: out_tx,
                task,
            },
            event_rx,
        ))
    }

    /// Send an event to the provider.
    pub async fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Host portion of a ws/wss URL, for the handshake `Host` header.
fn host_of(url: &str) -> &str {
    let rest = url.split("://").nth(1).unwrap_or(url);
    rest.split(['/', '?']).next().unwrap_or(rest)
}
