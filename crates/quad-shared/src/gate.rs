//! The request/accept handshake that decides who may exchange keys.
//!
//! Per ordered pair (sender, recipient) the state moves
//! `None -> Requested -> Accepted`; there is no rejected state. The gate
//! works on in-memory [`ChatLedger`]s and either applies a transition
//! completely or returns an error without touching them. Persisting both
//! ledgers atomically is the store's job.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::debug;

use crate::constants::{DEFAULT_MAX_ACTIVE_CHATS, DEFAULT_MAX_REQUEST_WORDS};
use crate::error::{GateError, QuadError, ValidationError};
use crate::protocol::{
    ActiveChat, ChatOverview, ConnectionRequest, PeerSummary, PendingSummary, RequestStatus,
};
use crate::types::{LocationPreference, UserId};
use crate::validation::{validate_code_word, validate_request_message};

/// Gate-relevant slice of one user's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLedger {
    pub owner: UserId,
    pub username: String,
    pub public_key: String,
    pub active_chats: Vec<ActiveChat>,
    pub pending: Vec<ConnectionRequest>,
}

impl ChatLedger {
    pub fn new(owner: UserId, username: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            owner,
            username: username.into(),
            public_key: public_key.into(),
            active_chats: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn has_active(&self, partner: UserId) -> bool {
        self.active_chats.iter().any(|c| c.partner == partner)
    }

    pub fn has_pending_from(&self, sender: UserId) -> bool {
        self.pending.iter().any(|r| r.from == sender)
    }

    /// Cached view of this ledger: partner keys as stored at accept time.
    pub fn overview(&self) -> ChatOverview {
        ChatOverview {
            active_chats: self
                .active_chats
                .iter()
                .map(|c| PeerSummary {
                    id: c.partner,
                    username: c.partner_username.clone(),
                    public_key: c.partner_public_key.clone(),
                })
                .collect(),
            pending_requests: self.pending.iter().map(PendingSummary::from).collect(),
        }
    }

    fn as_partner_of(&self) -> ActiveChat {
        ActiveChat {
            partner: self.owner,
            partner_username: self.username.clone(),
            partner_public_key: self.public_key.clone(),
        }
    }

    /// Insert `chat`, or refresh the cached display data if the partner is
    /// already present.
    fn upsert_active(&mut self, chat: ActiveChat) {
        match self.active_chats.iter_mut().find(|c| c.partner == chat.partner) {
            Some(existing) => *existing = chat,
            None => self.active_chats.push(chat),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    None,
    Requested,
    Accepted,
}

/// Payload a sender attaches to a connection request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestPayload {
    pub message: String,
    pub location_preferences: BTreeSet<LocationPreference>,
    pub code_word: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptOutcome {
    /// The requester, as the recipient now sees them.
    pub partner: PeerSummary,
    /// Whether the requester got the reciprocal chat.
    pub requester_linked: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionGate {
    max_active_chats: usize,
    max_request_words: usize,
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ACTIVE_CHATS, DEFAULT_MAX_REQUEST_WORDS)
    }
}

impl ConnectionGate {
    pub fn new(max_active_chats: usize, max_request_words: usize) -> Self {
        Self {
            max_active_chats,
            max_request_words,
        }
    }

    pub fn max_active_chats(&self) -> usize {
        self.max_active_chats
    }

    pub fn max_request_words(&self) -> usize {
        self.max_request_words
    }

    pub fn pair_state(&self, sender: UserId, recipient: &ChatLedger) -> PairState {
        if recipient.has_active(sender) {
            PairState::Accepted
        } else if recipient.has_pending_from(sender) {
            PairState::Requested
        } else {
            PairState::None
        }
    }

    /// Append a request from `sender` to `recipient`'s pending set.
    pub fn send_request(
        &self,
        sender: &ChatLedger,
        recipient: &mut ChatLedger,
        payload: RequestPayload,
    ) -> Result<(), QuadError> {
        if sender.owner == recipient.owner {
            return Err(ValidationError::SelfRequest.into());
        }
        validate_request_message(&payload.message, self.max_request_words)?;
        validate_code_word(&payload.code_word)?;

        match self.pair_state(sender.owner, recipient) {
            PairState::Requested => {
                return Err(GateError::DuplicateRequest {
                    sender: sender.owner,
                    recipient: recipient.owner,
                }
                .into())
            }
            PairState::Accepted => {
                return Err(GateError::AlreadyConnected(sender.owner, recipient.owner).into())
            }
            PairState::None => {}
        }
        if sender.has_active(recipient.owner) {
            return Err(GateError::AlreadyConnected(sender.owner, recipient.owner).into());
        }

        recipient.pending.push(ConnectionRequest {
            from: sender.owner,
            from_username: sender.username.clone(),
            message: payload.message.trim().to_string(),
            location_preferences: payload.location_preferences,
            code_word: payload.code_word.trim().to_string(),
            status: RequestStatus::Requested,
            created_at: Utc::now(),
        });

        debug!(
            sender = %sender.owner,
            recipient = %recipient.owner,
            pending = recipient.pending.len(),
            "connection request queued"
        );
        Ok(())
    }

    /// `recipient` accepts the pending request from `requester`.
    ///
    /// The recipient always gets the chat. The requester gets the reciprocal
    /// chat only while under the limit; otherwise the pairing is one-sided.
    pub fn accept(
        &self,
        recipient: &mut ChatLedger,
        requester: &mut ChatLedger,
    ) -> Result<AcceptOutcome, QuadError> {
        if recipient.active_chats.len() >= self.max_active_chats {
            return Err(GateError::ChatLimitExceeded {
                owner: recipient.owner,
                limit: self.max_active_chats,
            }
            .into());
        }

        let index = recipient
            .pending
            .iter()
            .position(|r| r.from == requester.owner)
            .ok_or(GateError::RequestNotFound(requester.owner))?;

        // Nothing below can fail.
        recipient.pending.remove(index);
        recipient.upsert_active(requester.as_partner_of());

        let requester_linked = if requester.has_active(recipient.owner) {
            requester.upsert_active(recipient.as_partner_of());
            true
        } else if requester.active_chats.len() < self.max_active_chats {
            requester.active_chats.push(recipient.as_partner_of());
            true
        } else {
            false
        };

        if requester_linked {
            // A crossing request in the other direction is now moot.
            requester.pending.retain(|r| r.from != recipient.owner);
        }

        debug!(
            recipient = %recipient.owner,
            requester = %requester.owner,
            requester_linked,
            "connection request accepted"
        );

        Ok(AcceptOutcome {
            partner: PeerSummary {
                id: requester.owner,
                username: requester.username.clone(),
                public_key: requester.public_key.clone(),
            },
            requester_linked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(name: &str) -> ChatLedger {
        ChatLedger::new(UserId::new(), name, format!("{name}-key"))
    }

    fn payload(message: &str) -> RequestPayload {
        RequestPayload {
            message: message.into(),
            location_preferences: [LocationPreference::Library].into_iter().collect(),
            code_word: "owl".into(),
        }
    }

    /// Fill `owner` up to the gate's limit with throwaway partners.
    fn saturate(owner: &mut ChatLedger, gate: &ConnectionGate) {
        while owner.active_chats.len() < gate.max_active_chats() {
            owner.active_chats.push(ledger("filler").as_partner_of());
        }
    }

    #[test]
    fn test_send_request_appends_pending() {
        let gate = ConnectionGate::default();
        let a = ledger("a");
        let mut b = ledger("b");

        gate.send_request(&a, &mut b, payload("hi there")).unwrap();

        assert_eq!(b.pending.len(), 1);
        assert_eq!(b.pending[0].from, a.owner);
        assert_eq!(b.pending[0].from_username, "a");
        assert_eq!(b.pending[0].status, RequestStatus::Requested);
        assert_eq!(gate.pair_state(a.owner, &b), PairState::Requested);
    }

    #[test]
    fn test_duplicate_request_rejected() {
        let gate = ConnectionGate::default();
        let a = ledger("a");
        let mut b = ledger("b");

        gate.send_request(&a, &mut b, payload("first")).unwrap();
        let err = gate.send_request(&a, &mut b, payload("second")).unwrap_err();

        assert!(matches!(
            err,
            QuadError::Gate(GateError::DuplicateRequest { .. })
        ));
        assert_eq!(b.pending.len(), 1);
        assert_eq!(b.pending[0].message, "first");
    }

    #[test]
    fn test_request_word_limit() {
        let gate = ConnectionGate::new(3, 5);
        let a = ledger("a");
        let mut b = ledger("b");

        let err = gate
            .send_request(&a, &mut b, payload("one two three four five six"))
            .unwrap_err();
        assert!(matches!(
            err,
            QuadError::Validation(ValidationError::MessageTooLong { words: 6, max: 5 })
        ));
        assert!(b.pending.is_empty());
    }

    #[test]
    fn test_self_request_rejected() {
        let gate = ConnectionGate::default();
        let a = ledger("a");
        let mut same = a.clone();

        assert!(matches!(
            gate.send_request(&a, &mut same, payload("me")),
            Err(QuadError::Validation(ValidationError::SelfRequest))
        ));
    }

    #[test]
    fn test_accept_links_both_sides() {
        let gate = ConnectionGate::default();
        let mut a = ledger("a");
        let mut b = ledger("b");

        gate.send_request(&a, &mut b, payload("hello")).unwrap();
        let outcome = gate.accept(&mut b, &mut a).unwrap();

        assert!(outcome.requester_linked);
        assert_eq!(outcome.partner.id, a.owner);
        assert_eq!(outcome.partner.public_key, "a-key");
        assert_eq!(a.active_chats.len(), 1);
        assert_eq!(a.active_chats[0].partner, b.owner);
        assert_eq!(a.active_chats[0].partner_public_key, "b-key");
        assert_eq!(b.active_chats.len(), 1);
        assert_eq!(b.active_chats[0].partner, a.owner);
        assert!(!b.has_pending_from(a.owner));
        assert_eq!(gate.pair_state(a.owner, &b), PairState::Accepted);
    }

    #[test]
    fn test_accept_at_recipient_limit_changes_nothing() {
        let gate = ConnectionGate::default();
        let mut a = ledger("a");
        let mut b = ledger("b");
        gate.send_request(&a, &mut b, payload("hello")).unwrap();
        saturate(&mut b, &gate);

        let (a_before, b_before) = (a.clone(), b.clone());
        let err = gate.accept(&mut b, &mut a).unwrap_err();

        assert!(matches!(
            err,
            QuadError::Gate(GateError::ChatLimitExceeded { limit: 3, .. })
        ));
        assert_eq!(a, a_before);
        assert_eq!(b, b_before);
    }

    #[test]
    fn test_accept_with_requester_at_limit_is_one_sided() {
        let gate = ConnectionGate::default();
        let mut a = ledger("a");
        let mut b = ledger("b");
        gate.send_request(&a, &mut b, payload("hello")).unwrap();
        saturate(&mut a, &gate);

        let outcome = gate.accept(&mut b, &mut a).unwrap();

        assert!(!outcome.requester_linked);
        assert!(b.has_active(a.owner));
        assert!(!a.has_active(b.owner));
        assert_eq!(a.active_chats.len(), gate.max_active_chats());
    }

    #[test]
    fn test_accept_without_request() {
        let gate = ConnectionGate::default();
        let mut a = ledger("a");
        let mut b = ledger("b");

        let err = gate.accept(&mut b, &mut a).unwrap_err();
        assert!(matches!(err, QuadError::Gate(GateError::RequestNotFound(id)) if id == a.owner));
        assert!(b.active_chats.is_empty());
    }

    #[test]
    fn test_no_duplicate_active_entries() {
        let gate = ConnectionGate::default();
        let mut a = ledger("a");
        let mut b = ledger("b");

        // Crossing requests: both sent before either accepted.
        gate.send_request(&a, &mut b, payload("hi b")).unwrap();
        gate.send_request(&b, &mut a, payload("hi a")).unwrap();

        gate.accept(&mut b, &mut a).unwrap();
        assert!(a.pending.is_empty());

        assert_eq!(a.active_chats.len(), 1);
        assert_eq!(b.active_chats.len(), 1);
    }

    #[test]
    fn test_request_after_accept_rejected() {
        let gate = ConnectionGate::default();
        let mut a = ledger("a");
        let mut b = ledger("b");
        gate.send_request(&a, &mut b, payload("hello")).unwrap();
        gate.accept(&mut b, &mut a).unwrap();

        assert!(matches!(
            gate.send_request(&a, &mut b, payload("again")),
            Err(QuadError::Gate(GateError::AlreadyConnected(..)))
        ));
        assert!(matches!(
            gate.send_request(&b, &mut a, payload("again")),
            Err(QuadError::Gate(GateError::AlreadyConnected(..)))
        ));
    }

    #[test]
    fn test_overview_uses_cached_data() {
        let gate = ConnectionGate::default();
        let mut a = ledger("a");
        let mut b = ledger("b");
        let c = ledger("c");
        gate.send_request(&a, &mut b, payload("hello")).unwrap();
        gate.send_request(&c, &mut b, payload("yo")).unwrap();
        gate.accept(&mut b, &mut a).unwrap();

        let overview = b.overview();
        assert_eq!(overview.active_chats.len(), 1);
        assert_eq!(overview.active_chats[0].username, "a");
        assert_eq!(overview.pending_requests.len(), 1);
        assert_eq!(overview.pending_requests[0].id, c.owner);
        assert_eq!(overview.pending_requests[0].message, "yo");
    }
}
