//! Live message delivery over WebSocket.
//!
//! Each authenticated user holds at most one live connection; a newer
//! connection replaces the older one. Every frame a client sends is checked
//! against the active-chat ledger, appended to the message log with a server
//! timestamp, and forwarded to the receiver if they are connected. The relay
//! never inspects `content`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use quad_shared::protocol::{MessageEvent, StoredMessage};
use quad_shared::UserId;

use crate::api::AppState;
use crate::error::ServerError;

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<MessageEvent>,
}

/// Routes delivered events to connected users.
#[derive(Clone, Default)]
pub struct DeliveryHub {
    next_id: Arc<AtomicU64>,
    links: Arc<RwLock<HashMap<UserId, Link>>>,
}

impl DeliveryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `user`'s connection, replacing any earlier one. The returned id
    /// is needed to detach this connection later.
    pub async fn register(&self, user: UserId) -> (u64, mpsc::UnboundedReceiver<MessageEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if self.links.write().await.insert(user, Link { id, tx }).is_some() {
            debug!(user = %user, "Replaced existing live connection");
        }
        (id, rx)
    }

    /// Detach `user`'s connection, unless a newer one has replaced it.
    pub async fn unregister(&self, user: UserId, id: u64) {
        let mut links = self.links.write().await;
        if links.get(&user).is_some_and(|l| l.id == id) {
            links.remove(&user);
        }
    }

    /// Forward `event` to its receiver. Returns `false` when the receiver is
    /// offline; the message is still in the log for their next history load.
    pub async fn deliver(&self, event: MessageEvent) -> bool {
        let links = self.links.read().await;
        match links.get(&event.receiver) {
            Some(link) => link.tx.send(event).is_ok(),
            None => false,
        }
    }

    #[cfg(test)]
    pub async fn is_online(&self, user: UserId) -> bool {
        self.links.read().await.contains_key(&user)
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Validate, persist and forward one inbound frame from `user`.
pub async fn relay_frame(
    state: &AppState,
    user: UserId,
    frame: &str,
) -> Result<StoredMessage, ServerError> {
    let event: MessageEvent = serde_json::from_str(frame)
        .map_err(|e| ServerError::BadRequest(format!("Malformed message frame: {e}")))?;

    if event.sender != user {
        return Err(ServerError::Forbidden(
            "Cannot send messages on behalf of another user".into(),
        ));
    }

    let stored = {
        let db = state.db.lock().await;
        if !db.is_active_chat(user, event.receiver)? {
            return Err(ServerError::Forbidden(format!(
                "No active chat with {}",
                event.receiver
            )));
        }
        db.append_message(&event, Utc::now())?
    };

    let online = state.hub.deliver(stored.to_event()).await;
    debug!(
        id = %stored.id,
        sender = %stored.sender,
        receiver = %stored.receiver,
        delivered = online,
        "Relayed message"
    );
    Ok(stored)
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: String,
}

/// `GET /ws?token=…`. Browsers cannot set headers on a WebSocket handshake,
/// so the bearer token travels in the query string.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let user = state
        .tokens
        .resolve(&params.token)
        .await
        .ok_or(ServerError::Unauthorized)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, state)))
}

async fn handle_socket(socket: WebSocket, user: UserId, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (link_id, mut outbound) = state.hub.register(user).await;
    info!(user = %user, "Live connection opened");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let relay_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = relay_frame(&relay_state, user, &text).await {
                        warn!(user = %user, error = %e, "Dropped inbound frame");
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever half finishes first tears down the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.unregister(user, link_id).await;
    info!(user = %user, "Live connection closed");
}
