//! Push channel.
//!
//! Connects to the admin WebSocket server, registers this device and turns
//! `REFRESH_STATE` messages into [`PushSignal`]s. Reconnection with backoff is
//! handled here; subscribers only ever see signals.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Message type that asks devices to refetch their state.
const REFRESH_STATE: &str = "REFRESH_STATE";

/// Pending signals beyond this are redundant: one resync covers them all.
const SIGNAL_BUFFER: usize = 16;

/// Opaque "state changed" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushSignal {
    Resync,
}

/// Source of push signals.
pub trait PushChannel {
    /// Start delivering signals until `cancel` fires.
    fn subscribe(self, cancel: CancellationToken) -> mpsc::Receiver<PushSignal>;
}

/// Backoff between reconnection attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Next delay after a failed attempt, clamped to the configured maximum.
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Add up to 25% random jitter so a fleet does not reconnect in lockstep.
fn with_jitter(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 4;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

#[derive(Debug, Serialize)]
struct RegisterMessage<'a> {
    r#type: &'static str,
    payload: RegisterPayload<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPayload<'a> {
    tv_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    #[serde(rename = "type")]
    kind: String,
}

/// Turn a text frame into a signal. Anything unrecognised is ignored.
pub fn classify(text: &str) -> Option<PushSignal> {
    match serde_json::from_str::<IncomingMessage>(text) {
        Ok(msg) if msg.kind == REFRESH_STATE => Some(PushSignal::Resync),
        Ok(msg) => {
            tracing::debug!("Ignoring push message of type {:?}", msg.kind);
            None
        }
        Err(e) => {
            tracing::debug!("Ignoring malformed push message: {} - {}", e, text);
            None
        }
    }
}

/// Push channel over a WebSocket connection.
pub struct WebSocketPushChannel {
    url: String,
    device_id: String,
    reconnect: ReconnectConfig,
}

impl WebSocketPushChannel {
    /// Channel to `url` that registers as `device_id`.
    pub fn new(
        url: impl Into<String>,
        device_id: impl Into<String>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            url: url.into(),
            device_id: device_id.into(),
            reconnect,
        }
    }

    /// Connection loop. Returns when cancelled or nobody listens any more.
    async fn run(self, tx: mpsc::Sender<PushSignal>, cancel: CancellationToken) {
        let url = match Url::parse(&self.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!("Invalid push channel URL {}: {}", self.url, e);
                return;
            }
        };

        let mut delay = self.reconnect.initial_delay;
        loop {
            tracing::info!("Connecting to push channel at {}", url);

            let connected = tokio::select! {
                _ = cancel.cancelled() => return,
                result = connect_async(url.as_str()) => result,
            };

            match connected {
                Ok((ws_stream, _response)) => {
                    delay = self.reconnect.initial_delay;
                    let session = tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = self.listen(ws_stream, &tx) => result,
                    };
                    match session {
                        Ok(()) => tracing::warn!("Push channel closed, reconnecting..."),
                        Err(e) => tracing::error!("Push channel error: {:#}, reconnecting...", e),
                    }
                }
                Err(e) => {
                    tracing::error!("Push channel connection failed: {}", e);
                }
            }

            if tx.is_closed() {
                tracing::debug!("No push subscribers left, stopping");
                return;
            }

            let wait = with_jitter(delay);
            tracing::debug!(delay_ms = wait.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            delay = next_delay(delay, &self.reconnect);
        }
    }

    /// Register and forward signals for one connection.
    async fn listen(
        &self,
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        tx: &mpsc::Sender<PushSignal>,
    ) -> Result<()> {
        let (mut write, mut read) = ws_stream.split();

        let register = serde_json::to_string(&RegisterMessage {
            r#type: "register",
            payload: RegisterPayload {
                tv_id: &self.device_id,
            },
        })
        .context("Failed to encode register message")?;
        write
            .send(Message::Text(register))
            .await
            .context("Failed to register with push server")?;

        tracing::info!("Push channel connected");

        // Updates may have been missed while disconnected.
        if !forward(tx, PushSignal::Resync) {
            return Ok(());
        }

        while let Some(msg) = read.next().await {
            match msg.context("Failed to receive message")? {
                Message::Text(text) => {
                    if let Some(signal) = classify(&text) {
                        if !forward(tx, signal) {
                            return Ok(());
                        }
                    }
                }
                Message::Ping(data) => {
                    write
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Message::Close(_) => {
                    tracing::info!("Push channel closed by server");
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Queue a signal. A full buffer already holds a pending resync, so the
/// signal is dropped. Returns false once the receiver is gone.
fn forward(tx: &mpsc::Sender<PushSignal>, signal: PushSignal) -> bool {
    match tx.try_send(signal) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    }
}

impl PushChannel for WebSocketPushChannel {
    fn subscribe(self, cancel: CancellationToken) -> mpsc::Receiver<PushSignal> {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        tokio::spawn(self.run(tx, cancel));
        rx
    }
}
