//! Live-delivery channel.
//!
//! The channel only moves [`MessageEvent`]s. Payloads are already
//! ciphertext by the time they get here.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use quad_shared::protocol::MessageEvent;

use crate::error::{ClientError, Result};

#[async_trait]
pub trait DeliveryChannel: Send {
    async fn send(&mut self, event: &MessageEvent) -> Result<()>;

    /// The next inbound event, or `None` once the channel has closed.
    async fn recv(&mut self) -> Result<Option<MessageEvent>>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// One end of an in-process channel. Mostly for tests.
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<MessageEvent>,
    rx: mpsc::UnboundedReceiver<MessageEvent>,
}

impl MemoryChannel {
    /// Two connected ends: whatever one sends, the other receives.
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        (
            MemoryChannel { tx: tx1, rx: rx2 },
            MemoryChannel { tx: tx2, rx: rx1 },
        )
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<MessageEvent> {
        self.rx.try_recv().ok()
    }
}

#[async_trait]
impl DeliveryChannel for MemoryChannel {
    async fn send(&mut self, event: &MessageEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| ClientError::Channel("Channel closed".into()))
    }

    async fn recv(&mut self) -> Result<Option<MessageEvent>> {
        Ok(self.rx.recv().await)
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// The relay's `/ws` endpoint.
pub struct WsChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsChannel {
    /// Connect to `ws_url` (for example `ws://host:8080/ws`) as the holder of
    /// `token`.
    pub async fn connect(ws_url: &str, token: &str) -> Result<Self> {
        let url = format!("{ws_url}?token={token}");
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::Channel(format!("Connection failed: {e}")))?;
        debug!(url = ws_url, "Live channel connected");
        Ok(Self { ws })
    }
}

#[async_trait]
impl DeliveryChannel for WsChannel {
    async fn send(&mut self, event: &MessageEvent) -> Result<()> {
        let text = serde_json::to_string(event).map_err(quad_shared::QuadError::from)?;
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| ClientError::Channel(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<MessageEvent>> {
        while let Some(msg) = self.ws.next().await {
            match msg.map_err(|e| ClientError::Channel(e.to_string()))? {
                Message::Text(text) => match serde_json::from_str(&text) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => warn!(error = %e, "Ignoring malformed frame"),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }
}
