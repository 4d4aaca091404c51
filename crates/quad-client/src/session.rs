//! The per-login conversation session.
//!
//! Flow:
//! - `start` generates a fresh key pair off the async runtime, publishes the
//!   public half, then loads the chat overview.
//! - Whenever a chat becomes active (`accept` or `refresh`) the partner's
//!   public key is resolved into the [`PeerKeyDirectory`] before any message
//!   can be sent to them. A partner whose key is not yet available stays
//!   active but unsendable until a later `refresh` resolves it.
//! - `send` encrypts with the partner's key and hands the event to the
//!   delivery channel. `receive` and `load_history` decrypt with our own
//!   private key and never fail as a whole: a message that cannot be opened
//!   becomes a placeholder.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use quad_shared::constants::{DEFAULT_MAX_ACTIVE_CHATS, DEFAULT_MAX_REQUEST_WORDS};
use quad_shared::crypto::{CipherCodec, CryptoProvider, KeyVault, PeerKeyDirectory};
use quad_shared::protocol::{MessageEvent, PeerSummary, PendingSummary, SendRequestBody};
use quad_shared::types::{Identity, LocationPreference};
use quad_shared::validation::{validate_code_word, validate_request_message};
use quad_shared::{GateError, UserId, ValidationError};

use crate::backend::ChatBackend;
use crate::channel::DeliveryChannel;
use crate::conversation::{ConversationLog, DisplayMessage, MessageBody};
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Local bound on simultaneously registered partners (K).
    pub max_active_chats: usize,
    pub max_request_words: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_active_chats: DEFAULT_MAX_ACTIVE_CHATS,
            max_request_words: DEFAULT_MAX_REQUEST_WORDS,
        }
    }
}

pub struct ConversationSession<P: CryptoProvider> {
    identity: Identity,
    config: SessionConfig,
    vault: KeyVault<P>,
    directory: PeerKeyDirectory<P>,
    codec: CipherCodec<P>,
    backend: Box<dyn ChatBackend>,
    channel: Box<dyn DeliveryChannel>,
    active: Vec<PeerSummary>,
    pending: Vec<PendingSummary>,
    open: Option<ConversationLog>,
    /// Plaintext of our own outgoing messages, keyed by ciphertext.
    sent: HashMap<String, String>,
}

impl<P: CryptoProvider> ConversationSession<P> {
    /// Generate this session's key pair, publish it and load the current
    /// chats.
    pub async fn start(
        identity: Identity,
        provider: Arc<P>,
        backend: Box<dyn ChatBackend>,
        channel: Box<dyn DeliveryChannel>,
        config: SessionConfig,
    ) -> Result<Self> {
        let keygen = Arc::clone(&provider);
        let vault = tokio::task::spawn_blocking(move || KeyVault::generate(keygen))
            .await
            .map_err(|e| ClientError::Task(e.to_string()))??;

        backend.publish_public_key(vault.export_public()).await?;
        info!(user = %identity.id, "Session key pair published");

        let mut session = Self {
            identity,
            config,
            vault,
            directory: PeerKeyDirectory::new(Arc::clone(&provider)),
            codec: CipherCodec::new(provider),
            backend,
            channel,
            active: Vec::new(),
            pending: Vec::new(),
            open: None,
            sent: HashMap::new(),
        };
        session.refresh().await?;
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// This session's exported public key.
    pub fn public_key(&self) -> &str {
        self.vault.export_public()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn active_partners(&self) -> &[PeerSummary] {
        &self.active
    }

    pub fn pending_requests(&self) -> &[PendingSummary] {
        &self.pending
    }

    pub fn is_active(&self, partner: UserId) -> bool {
        self.active.iter().any(|p| p.id == partner)
    }

    /// Whether `partner`'s key is cached, i.e. `send` can encrypt for them.
    pub fn can_send_to(&self, partner: UserId) -> bool {
        self.directory.contains(partner)
    }

    pub fn conversation(&self) -> Option<&ConversationLog> {
        self.open.as_ref()
    }

    // ------------------------------------------------------------------
    // Connection gate
    // ------------------------------------------------------------------

    /// Re-read the server's view of our chats. Newly active partners get
    /// their keys resolved; partners that are gone are forgotten.
    pub async fn refresh(&mut self) -> Result<()> {
        let overview = self.backend.chat_overview().await?;
        self.pending = overview.pending_requests;

        let limit = self.config.max_active_chats;
        if overview.active_chats.len() > limit {
            warn!(
                count = overview.active_chats.len(),
                limit, "Server reports more active chats than the local limit"
            );
        }

        let current: Vec<PeerSummary> = overview.active_chats.into_iter().take(limit).collect();
        for stale in self
            .active
            .iter()
            .filter(|p| !current.iter().any(|c| c.id == p.id))
        {
            self.directory.forget(stale.id);
            debug!(partner = %stale.id, "Partner no longer active");
        }
        self.active.retain(|p| current.iter().any(|c| c.id == p.id));

        for partner in current {
            self.activate_partner(partner).await?;
        }
        Ok(())
    }

    pub async fn send_request(
        &mut self,
        target: UserId,
        message: &str,
        location_preferences: BTreeSet<LocationPreference>,
        code_word: &str,
    ) -> Result<()> {
        if target == self.identity.id {
            return Err(ValidationError::SelfRequest.into());
        }
        validate_request_message(message, self.config.max_request_words)?;
        validate_code_word(code_word)?;

        self.backend
            .send_request(&SendRequestBody {
                target_user_id: target,
                custom_message: message.to_string(),
                location_preferences,
                code_word: code_word.to_string(),
            })
            .await?;
        info!(target = %target, "Chat request sent");
        Ok(())
    }

    /// Accept `requester`'s pending request and resolve their key.
    ///
    /// Once the server has accepted, the partner is active locally whatever
    /// happens to the key lookup. Check [`can_send_to`](Self::can_send_to)
    /// before sending; an unresolved key is retried on `refresh`.
    pub async fn accept(&mut self, requester: UserId) -> Result<PeerSummary> {
        if !self.is_active(requester) && self.active.len() >= self.config.max_active_chats {
            return Err(GateError::ChatLimitExceeded {
                owner: self.identity.id,
                limit: self.config.max_active_chats,
            }
            .into());
        }

        let accepted = self.backend.accept_request(requester).await?;
        self.pending.retain(|p| p.id != requester);
        let partner = self.activate_partner(accepted.partner).await?;

        info!(
            partner = %requester,
            requester_linked = accepted.requester_linked,
            sendable = self.can_send_to(requester),
            "Chat request accepted"
        );
        Ok(partner)
    }

    /// Record `partner` as active and try to cache their key, taken from the
    /// summary or fetched when the summary has none. A key that cannot be
    /// fetched or imported is logged and leaves the partner unsendable.
    /// Returns the stored summary, carrying the key only if it resolved.
    async fn activate_partner(&mut self, mut partner: PeerSummary) -> Result<PeerSummary> {
        let id = partner.id;
        let key = if partner.public_key.is_empty() {
            self.backend.fetch_public_key(id).await
        } else {
            Ok(std::mem::take(&mut partner.public_key))
        };

        match key.and_then(|key| {
            self.directory.resolve(id, &key)?;
            Ok(key)
        }) {
            Ok(key) => partner.public_key = key,
            Err(e) => warn!(partner = %id, error = %e, "Partner key unavailable"),
        }

        self.upsert_partner(partner.clone())?;
        Ok(partner)
    }

    fn upsert_partner(&mut self, partner: PeerSummary) -> Result<()> {
        if let Some(existing) = self.active.iter_mut().find(|p| p.id == partner.id) {
            *existing = partner;
            return Ok(());
        }
        if self.active.len() >= self.config.max_active_chats {
            return Err(GateError::ChatLimitExceeded {
                owner: self.identity.id,
                limit: self.config.max_active_chats,
            }
            .into());
        }
        self.active.push(partner);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Encrypt `plaintext` for `partner` and dispatch it. The sender keeps a
    /// plaintext copy since it cannot decrypt its own ciphertext.
    ///
    /// The returned copy is stamped with the local clock. Once the relay has
    /// stored the message, `load_history` shows it again with the server's
    /// timestamp, so a reload orders it consistently with inbound messages.
    pub async fn send(&mut self, partner: UserId, plaintext: &str) -> Result<DisplayMessage> {
        let key = self.directory.lookup(partner)?;
        let ciphertext = self.codec.encrypt(plaintext, key)?;

        let event = MessageEvent::encrypted(self.identity.id, partner, ciphertext);
        self.channel.send(&event).await?;
        self.sent.insert(event.content.clone(), plaintext.to_string());

        let message = DisplayMessage {
            sender: self.identity.id,
            receiver: partner,
            body: MessageBody::Text(plaintext.to_string()),
            timestamp: event.sent_at.unwrap_or_else(Utc::now),
        };
        if let Some(log) = self.open.as_mut().filter(|l| l.partner() == partner) {
            log.insert(message.clone());
        }
        debug!(partner = %partner, "Message sent");
        Ok(message)
    }

    /// Feed one inbound event. Events outside the open conversation are
    /// ignored and return `None`.
    pub fn receive(&mut self, event: MessageEvent) -> Option<DisplayMessage> {
        let me = self.identity.id;
        let log = self.open.as_mut()?;
        if !event.is_between(me, log.partner()) {
            debug!(sender = %event.sender, "Event outside the open conversation");
            return None;
        }

        let message = DisplayMessage {
            body: open_body(&self.codec, &self.vault, &event.content, event.encrypted),
            sender: event.sender,
            receiver: event.receiver,
            timestamp: event.sent_at.unwrap_or_else(Utc::now),
        };
        log.insert(message.clone());
        Some(message)
    }

    /// Wait for the next event on the delivery channel and feed it through
    /// [`receive`](Self::receive). Returns `false` once the channel closes.
    pub async fn process_next(&mut self) -> Result<bool> {
        match self.channel.recv().await? {
            Some(event) => {
                self.receive(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fetch and decrypt the whole conversation with `partner`. Each message
    /// is opened on its own. Messages this session sent are shown from the
    /// plaintext kept at send time, under the server's timestamp.
    pub async fn load_history(&self, partner: UserId) -> Result<ConversationLog> {
        let stored = self.backend.message_history(partner).await?;

        let mut log = ConversationLog::new(partner);
        let mut failed = 0usize;
        for message in stored {
            let body = match self.sent.get(&message.content) {
                Some(text) if message.sender == self.identity.id => {
                    MessageBody::Text(text.clone())
                }
                _ => open_body(&self.codec, &self.vault, &message.content, message.encrypted),
            };
            failed += usize::from(body.is_placeholder());
            log.insert(DisplayMessage {
                sender: message.sender,
                receiver: message.receiver,
                body,
                timestamp: message.timestamp,
            });
        }

        debug!(partner = %partner, total = log.len(), failed, "History loaded");
        Ok(log)
    }

    /// Load the history with `partner` and make it the open conversation.
    pub async fn open_conversation(&mut self, partner: UserId) -> Result<&ConversationLog> {
        if !self.is_active(partner) {
            return Err(ClientError::NotActive(partner));
        }
        let log = self.load_history(partner).await?;
        Ok(self.open.insert(log))
    }

    pub fn close_conversation(&mut self) -> Option<ConversationLog> {
        self.open.take()
    }
}

fn open_body<P: CryptoProvider>(
    codec: &CipherCodec<P>,
    vault: &KeyVault<P>,
    payload: &str,
    encrypted: bool,
) -> MessageBody {
    match codec.open(payload, encrypted, vault) {
        Ok(text) => MessageBody::Text(text),
        Err(e) => {
            warn!(error = %e, "Message could not be decrypted");
            MessageBody::Undecryptable {
                reason: e.to_string(),
            }
        }
    }
}
