//! In-memory stand-ins for the Quad server, built on the real
//! [`ConnectionGate`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use quad_client::{ChatBackend, ClientError, DeliveryChannel, MemoryChannel, Result};
use quad_shared::gate::{ChatLedger, ConnectionGate, RequestPayload};
use quad_shared::protocol::{
    AcceptResponse, ChatOverview, MessageEvent, PeerSummary, SendRequestBody, StoredMessage,
};
use quad_shared::types::Identity;
use quad_shared::UserId;

#[derive(Default)]
struct ServerState {
    ledgers: HashMap<UserId, ChatLedger>,
    messages: Vec<StoredMessage>,
    reject_publish: bool,
    overview_calls: usize,
}

pub struct MemoryServer {
    gate: ConnectionGate,
    state: Mutex<ServerState>,
}

impl MemoryServer {
    pub fn new(gate: ConnectionGate) -> Arc<Self> {
        Arc::new(Self {
            gate,
            state: Mutex::new(ServerState::default()),
        })
    }

    pub fn register(&self, username: &str) -> Identity {
        let identity = Identity::new(UserId::new(), username);
        self.state
            .lock()
            .unwrap()
            .ledgers
            .insert(identity.id, ChatLedger::new(identity.id, username, ""));
        identity
    }

    pub fn backend(self: &Arc<Self>, me: UserId) -> Box<dyn ChatBackend> {
        Box::new(MemoryBackend {
            server: Arc::clone(self),
            me,
        })
    }

    /// Make every later `publish_public_key` fail with a 500.
    pub fn reject_publish(&self) {
        self.state.lock().unwrap().reject_publish = true;
    }

    /// How many times any backend has asked for a chat overview.
    pub fn overview_calls(&self) -> usize {
        self.state.lock().unwrap().overview_calls
    }

    pub fn ledger(&self, id: UserId) -> ChatLedger {
        self.state.lock().unwrap().ledgers[&id].clone()
    }

    /// Persist an event the way the relay does and return what the receiver
    /// gets.
    pub fn relay(&self, event: MessageEvent) -> StoredMessage {
        let stored = StoredMessage {
            id: Uuid::new_v4(),
            sender: event.sender,
            receiver: event.receiver,
            content: event.content,
            timestamp: Utc::now(),
            encrypted: event.encrypted,
        };
        self.insert_message(stored.clone());
        stored
    }

    pub fn insert_message(&self, message: StoredMessage) {
        self.state.lock().unwrap().messages.push(message);
    }
}

/// Move one event from the sender's relay end to the receiver's relay end,
/// storing it on the way.
pub async fn forward(
    from: &mut MemoryChannel,
    server: &MemoryServer,
    to: &mut MemoryChannel,
) -> StoredMessage {
    let event = from.recv().await.unwrap().expect("sender channel closed");
    let stored = server.relay(event);
    to.send(&stored.to_event()).await.unwrap();
    stored
}

fn status(code: u16, message: &str) -> ClientError {
    ClientError::Http {
        status: code,
        message: message.to_string(),
    }
}

struct MemoryBackend {
    server: Arc<MemoryServer>,
    me: UserId,
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn publish_public_key(&self, public_key: &str) -> Result<()> {
        let mut state = self.server.state.lock().unwrap();
        if state.reject_publish {
            return Err(status(500, "Internal server error"));
        }
        let ledger = state
            .ledgers
            .get_mut(&self.me)
            .ok_or_else(|| status(404, "User not found"))?;
        ledger.public_key = public_key.to_string();
        Ok(())
    }

    async fn fetch_public_key(&self, user: UserId) -> Result<String> {
        let state = self.server.state.lock().unwrap();
        let mine = &state.ledgers[&self.me];
        if user != self.me && !mine.has_active(user) {
            return Err(status(403, "No active chat"));
        }
        let key = state
            .ledgers
            .get(&user)
            .map(|l| l.public_key.clone())
            .unwrap_or_default();
        if key.is_empty() {
            return Err(status(404, "No public key"));
        }
        Ok(key)
    }

    async fn send_request(&self, body: &SendRequestBody) -> Result<()> {
        let mut state = self.server.state.lock().unwrap();
        let sender = state.ledgers[&self.me].clone();
        let mut recipient = state
            .ledgers
            .get(&body.target_user_id)
            .cloned()
            .ok_or_else(|| status(404, "User not found"))?;

        self.server.gate.send_request(
            &sender,
            &mut recipient,
            RequestPayload {
                message: body.custom_message.clone(),
                location_preferences: body.location_preferences.clone(),
                code_word: body.code_word.clone(),
            },
        )?;

        state.ledgers.insert(recipient.owner, recipient);
        Ok(())
    }

    async fn accept_request(&self, requester: UserId) -> Result<AcceptResponse> {
        let mut state = self.server.state.lock().unwrap();
        let mut recipient = state.ledgers[&self.me].clone();
        let mut requester = state
            .ledgers
            .get(&requester)
            .cloned()
            .ok_or_else(|| status(404, "User not found"))?;

        let outcome = self.server.gate.accept(&mut recipient, &mut requester)?;

        state.ledgers.insert(recipient.owner, recipient);
        state.ledgers.insert(requester.owner, requester);
        Ok(AcceptResponse {
            partner: outcome.partner,
            requester_linked: outcome.requester_linked,
        })
    }

    async fn chat_overview(&self) -> Result<ChatOverview> {
        let mut state = self.server.state.lock().unwrap();
        state.overview_calls += 1;
        let mut overview = state.ledgers[&self.me].overview();
        // Resolve each partner's current key, like the real store does.
        overview.active_chats = overview
            .active_chats
            .into_iter()
            .map(|p| PeerSummary {
                public_key: state.ledgers[&p.id].public_key.clone(),
                ..p
            })
            .collect();
        Ok(overview)
    }

    async fn message_history(&self, partner: UserId) -> Result<Vec<StoredMessage>> {
        let state = self.server.state.lock().unwrap();
        let mut log: Vec<StoredMessage> = state
            .messages
            .iter()
            .filter(|m| m.to_event().is_between(self.me, partner))
            .cloned()
            .collect();
        log.sort_by_key(|m| m.timestamp);
        Ok(log)
    }
}
