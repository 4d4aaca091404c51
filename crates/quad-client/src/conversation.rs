use chrono::{DateTime, Utc};

use quad_shared::constants::UNDECRYPTABLE_PLACEHOLDER;
use quad_shared::UserId;

/// What the UI shows for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    /// The payload could not be opened. It still occupies its slot in the
    /// conversation.
    Undecryptable { reason: String },
}

impl MessageBody {
    pub fn render(&self) -> &str {
        match self {
            MessageBody::Text(text) => text,
            MessageBody::Undecryptable { .. } => UNDECRYPTABLE_PLACEHOLDER,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, MessageBody::Undecryptable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub sender: UserId,
    pub receiver: UserId,
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
}

/// The open conversation with one partner, ordered by timestamp.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    partner: UserId,
    messages: Vec<DisplayMessage>,
}

impl ConversationLog {
    pub fn new(partner: UserId) -> Self {
        Self {
            partner,
            messages: Vec::new(),
        }
    }

    pub fn partner(&self) -> UserId {
        self.partner
    }

    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Insert keeping timestamp order. Equal timestamps keep arrival order.
    pub fn insert(&mut self, message: DisplayMessage) {
        let at = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(at, message);
    }
}
