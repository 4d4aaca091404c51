//! Shapes exchanged between the client, the REST API and the live channel.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{LocationPreference, UserId};

fn encrypted_by_default() -> bool {
    true
}

/// A chat message on the live-delivery channel.
///
/// A missing `encrypted` field means `true`: older clients never sent it and
/// only ever sent ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub sender: UserId,
    pub receiver: UserId,
    pub content: String,
    #[serde(default = "encrypted_by_default")]
    pub encrypted: bool,
    /// Set by the sender, then overwritten by the relay when it persists the
    /// message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl MessageEvent {
    pub fn encrypted(sender: UserId, receiver: UserId, ciphertext: String) -> Self {
        Self {
            sender,
            receiver,
            content: ciphertext,
            encrypted: true,
            sent_at: Some(Utc::now()),
        }
    }

    /// True when this event belongs to the conversation between `a` and `b`,
    /// in either direction.
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender == a && self.receiver == b) || (self.sender == b && self.receiver == a)
    }
}

/// A persisted chat message, as returned by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: Uuid,
    pub sender: UserId,
    pub receiver: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "encrypted_by_default")]
    pub encrypted: bool,
}

impl StoredMessage {
    pub fn to_event(&self) -> MessageEvent {
        MessageEvent {
            sender: self.sender,
            receiver: self.receiver,
            content: self.content.clone(),
            encrypted: self.encrypted,
            sent_at: Some(self.timestamp),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Requested,
}

/// A pending connection request, held in the recipient's ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub from: UserId,
    pub from_username: String,
    pub message: String,
    pub location_preferences: BTreeSet<LocationPreference>,
    pub code_word: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

/// A mutually authorized conversation slot, with the partner's public key
/// as it was when the chat was opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveChat {
    pub partner: UserId,
    pub partner_username: String,
    pub partner_public_key: String,
}

/// Display data for an active chat partner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: UserId,
    pub username: String,
    pub public_key: String,
}

/// Display data for a pending request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub id: UserId,
    pub username: String,
    pub message: String,
    pub location_preferences: BTreeSet<LocationPreference>,
    pub code_word: String,
}

impl From<&ConnectionRequest> for PendingSummary {
    fn from(r: &ConnectionRequest) -> Self {
        Self {
            id: r.from,
            username: r.from_username.clone(),
            message: r.message.clone(),
            location_preferences: r.location_preferences.clone(),
            code_word: r.code_word.clone(),
        }
    }
}

/// Result of listing a user's chats.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatOverview {
    pub active_chats: Vec<PeerSummary>,
    pub pending_requests: Vec<PendingSummary>,
}

// ---------------------------------------------------------------------------
// REST bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub year: u8,
    pub branch: String,
    pub bio: String,
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishKeyRequest {
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub user_id: UserId,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequestBody {
    pub target_user_id: UserId,
    #[serde(default)]
    pub custom_message: String,
    #[serde(default)]
    pub location_preferences: BTreeSet<LocationPreference>,
    #[serde(default)]
    pub code_word: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequestBody {
    pub requester_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptResponse {
    pub partner: PeerSummary,
    /// False when the requester was already at capacity and did not get the
    /// reciprocal chat.
    pub requester_linked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: UserId,
    pub username: String,
    pub bio: String,
    pub interests: Vec<String>,
    pub year: u8,
    pub branch: String,
    pub common_interests: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<StoredMessage>,
}
