mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use quad_client::{
    ChatBackend, ClientError, ConversationSession, MemoryChannel, MessageBody, SessionConfig,
};
use quad_shared::crypto::{CipherCodec, CryptoProvider, KeyVault, PeerKeyDirectory, RsaOaepProvider};
use quad_shared::gate::ConnectionGate;
use quad_shared::protocol::{MessageEvent, SendRequestBody, StoredMessage};
use quad_shared::testing::{ToyKey, ToyProvider};
use quad_shared::types::{Identity, LocationPreference};
use quad_shared::{CryptoError, GateError, UserId};

use common::{forward, MemoryServer};

struct Peer<P: CryptoProvider> {
    session: ConversationSession<P>,
    /// The relay's end of this peer's delivery channel.
    relay: MemoryChannel,
}

async fn start<P: CryptoProvider>(
    server: &Arc<MemoryServer>,
    identity: Identity,
    provider: Arc<P>,
    config: SessionConfig,
) -> Peer<P> {
    let (client_end, relay) = MemoryChannel::pair();
    let session = ConversationSession::start(
        identity.clone(),
        provider,
        server.backend(identity.id),
        Box::new(client_end),
        config,
    )
    .await
    .unwrap();
    Peer { session, relay }
}

fn prefs() -> BTreeSet<LocationPreference> {
    [LocationPreference::Cafeteria, LocationPreference::Library]
        .into_iter()
        .collect()
}

/// A and B, connected through the gate, each with a live session.
async fn connected_pair<P: CryptoProvider>(
    server: &Arc<MemoryServer>,
    provider: Arc<P>,
) -> (Peer<P>, Peer<P>) {
    let a_id = server.register("asha");
    let b_id = server.register("ben");
    let mut a = start(server, a_id, provider.clone(), SessionConfig::default()).await;
    let mut b = start(server, b_id.clone(), provider, SessionConfig::default()).await;

    a.session
        .send_request(b_id.id, "library at 5?", prefs(), "owl")
        .await
        .unwrap();
    b.session.refresh().await.unwrap();
    let requester = b.session.pending_requests()[0].id;
    b.session.accept(requester).await.unwrap();
    a.session.refresh().await.unwrap();

    (a, b)
}

/// Ciphertext for `recipient`'s current key, produced outside any session.
fn seal(provider: &Arc<ToyProvider>, recipient: UserId, exported: &str, text: &str) -> String {
    let mut directory = PeerKeyDirectory::new(provider.clone());
    let key = directory.resolve(recipient, exported).unwrap();
    CipherCodec::new(provider.clone()).encrypt(text, key).unwrap()
}

#[tokio::test]
async fn accept_opens_chat_on_both_sides() {
    let server = MemoryServer::new(ConnectionGate::default());
    let provider = Arc::new(ToyProvider::new());
    let a_id = server.register("asha");
    let b_id = server.register("ben");
    let mut a = start(&server, a_id.clone(), provider.clone(), SessionConfig::default()).await;
    let mut b = start(&server, b_id.clone(), provider, SessionConfig::default()).await;

    a.session
        .send_request(b_id.id, "coffee?", prefs(), "owl")
        .await
        .unwrap();

    b.session.refresh().await.unwrap();
    let pending = b.session.pending_requests();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, a_id.id);
    assert_eq!(pending[0].username, "asha");
    assert_eq!(pending[0].code_word, "owl");

    let partner = b.session.accept(a_id.id).await.unwrap();
    assert_eq!(partner.public_key, a.session.public_key());
    assert!(b.session.can_send_to(a_id.id));
    assert!(b.session.pending_requests().is_empty());

    a.session.refresh().await.unwrap();
    assert!(a.session.is_active(b_id.id));
    assert!(a.session.can_send_to(b_id.id));

    let a_ledger = server.ledger(a_id.id);
    let b_ledger = server.ledger(b_id.id);
    assert_eq!(a_ledger.active_chats.len(), 1);
    assert_eq!(a_ledger.active_chats[0].partner, b_id.id);
    assert_eq!(b_ledger.active_chats.len(), 1);
    assert_eq!(b_ledger.active_chats[0].partner, a_id.id);
    assert!(!b_ledger.has_pending_from(a_id.id));
}

#[tokio::test]
async fn duplicate_request_is_rejected() {
    let server = MemoryServer::new(ConnectionGate::default());
    let provider = Arc::new(ToyProvider::new());
    let a_id = server.register("asha");
    let b_id = server.register("ben");
    let mut a = start(&server, a_id, provider, SessionConfig::default()).await;

    a.session.send_request(b_id.id, "hi", prefs(), "").await.unwrap();
    let err = a
        .session
        .send_request(b_id.id, "hi again", prefs(), "")
        .await
        .unwrap_err();

    assert!(matches!(
        err.as_gate(),
        Some(GateError::DuplicateRequest { .. })
    ));
    assert_eq!(server.ledger(b_id.id).pending.len(), 1);
}

#[tokio::test]
async fn long_request_message_is_rejected_before_sending() {
    let server = MemoryServer::new(ConnectionGate::default());
    let provider = Arc::new(ToyProvider::new());
    let a_id = server.register("asha");
    let b_id = server.register("ben");
    let mut a = start(&server, a_id, provider, SessionConfig::default()).await;

    let long = vec!["word"; 31].join(" ");
    assert!(a.session.send_request(b_id.id, &long, prefs(), "").await.is_err());
    assert!(server.ledger(b_id.id).pending.is_empty());
}

#[tokio::test]
async fn send_and_receive_through_relay() {
    let server = MemoryServer::new(ConnectionGate::default());
    let (mut a, mut b) = connected_pair(&server, Arc::new(ToyProvider::new())).await;
    let (a_id, b_id) = (a.session.identity().id, b.session.identity().id);

    a.session.open_conversation(b_id).await.unwrap();
    b.session.open_conversation(a_id).await.unwrap();

    let sent = a.session.send(b_id, "see you at the library").await.unwrap();
    assert_eq!(sent.body, MessageBody::Text("see you at the library".into()));

    let stored = forward(&mut a.relay, &server, &mut b.relay).await;
    assert!(stored.encrypted);
    assert_ne!(stored.content, "see you at the library");

    assert!(b.session.process_next().await.unwrap());

    let b_log = b.session.conversation().unwrap();
    assert_eq!(b_log.len(), 1);
    assert_eq!(b_log.messages()[0].sender, a_id);
    assert_eq!(
        b_log.messages()[0].body,
        MessageBody::Text("see you at the library".into())
    );

    // The sender keeps its own plaintext copy.
    let a_log = a.session.conversation().unwrap();
    assert_eq!(a_log.messages()[0].body.render(), "see you at the library");
}

#[tokio::test]
async fn missing_encrypted_flag_is_decrypted() {
    let server = MemoryServer::new(ConnectionGate::default());
    let provider = Arc::new(ToyProvider::new());
    let (a, mut b) = connected_pair(&server, provider.clone()).await;
    let (a_id, b_id) = (a.session.identity().id, b.session.identity().id);
    b.session.open_conversation(a_id).await.unwrap();

    let ciphertext = seal(&provider, b_id, b.session.public_key(), "no flag");
    let json = format!(r#"{{"sender":"{a_id}","receiver":"{b_id}","content":"{ciphertext}"}}"#);
    let event: MessageEvent = serde_json::from_str(&json).unwrap();

    let shown = b.session.receive(event).unwrap();
    assert_eq!(shown.body, MessageBody::Text("no flag".into()));

    // An explicit `false` is passed through untouched.
    let mut plain = MessageEvent::encrypted(a_id, b_id, "already plain".into());
    plain.encrypted = false;
    let shown = b.session.receive(plain).unwrap();
    assert_eq!(shown.body, MessageBody::Text("already plain".into()));
}

#[tokio::test]
async fn receive_ignores_events_outside_open_conversation() {
    let server = MemoryServer::new(ConnectionGate::default());
    let provider = Arc::new(ToyProvider::new());
    let (a, mut b) = connected_pair(&server, provider).await;
    let (a_id, b_id) = (a.session.identity().id, b.session.identity().id);

    let stray = MessageEvent::encrypted(a_id, b_id, "x".into());
    assert!(b.session.receive(stray.clone()).is_none());

    b.session.open_conversation(a_id).await.unwrap();
    let other = MessageEvent::encrypted(UserId::new(), b_id, "x".into());
    assert!(b.session.receive(other).is_none());
    assert!(b.session.conversation().unwrap().is_empty());
}

#[tokio::test]
async fn undecryptable_live_message_becomes_placeholder() {
    let server = MemoryServer::new(ConnectionGate::default());
    let (a, mut b) = connected_pair(&server, Arc::new(ToyProvider::new())).await;
    let (a_id, b_id) = (a.session.identity().id, b.session.identity().id);
    b.session.open_conversation(a_id).await.unwrap();

    let shown = b
        .session
        .receive(MessageEvent::encrypted(a_id, b_id, "%%% not base64".into()))
        .unwrap();
    assert!(shown.body.is_placeholder());
    assert_eq!(b.session.conversation().unwrap().len(), 1);
}

#[tokio::test]
async fn history_survives_one_corrupted_message() {
    let server = MemoryServer::new(ConnectionGate::default());
    let provider = Arc::new(ToyProvider::new());
    let (a, mut b) = connected_pair(&server, provider.clone()).await;
    let (a_id, b_id) = (a.session.identity().id, b.session.identity().id);

    // Well-formed base64, but sealed for a key B does not hold.
    let stranger = KeyVault::generate(provider.clone()).unwrap();

    let t0 = Utc::now();
    let texts = ["one", "two", "three", "CORRUPT", "four", "five"];
    // Stored out of order; history must come back by timestamp.
    for i in [4usize, 0, 3, 5, 1, 2] {
        let content = if texts[i] == "CORRUPT" {
            seal(&provider, UserId::new(), stranger.export_public(), texts[i])
        } else {
            seal(&provider, b_id, b.session.public_key(), texts[i])
        };
        server.insert_message(StoredMessage {
            id: Uuid::new_v4(),
            sender: a_id,
            receiver: b_id,
            content,
            timestamp: t0 + Duration::seconds(i as i64),
            encrypted: true,
        });
    }

    let log = b.session.open_conversation(a_id).await.unwrap();
    assert_eq!(log.len(), 6);

    let rendered: Vec<&MessageBody> = log.messages().iter().map(|m| &m.body).collect();
    for (i, body) in rendered.iter().enumerate() {
        if i == 3 {
            let MessageBody::Undecryptable { reason } = body else {
                panic!("expected a placeholder, got {body:?}");
            };
            assert!(reason.starts_with("Decryption failed"), "{reason}");
        } else {
            assert_eq!(**body, MessageBody::Text(texts[i].into()));
        }
    }
    assert_eq!(rendered.iter().filter(|b| !b.is_placeholder()).count(), 5);
}

#[tokio::test]
async fn send_without_cached_key_fails() {
    let server = MemoryServer::new(ConnectionGate::default());
    let provider = Arc::new(ToyProvider::new());
    let a_id = server.register("asha");
    let mut a = start(&server, a_id, provider, SessionConfig::default()).await;

    let stranger = UserId::new();
    let err = a.session.send(stranger, "hello?").await.unwrap_err();
    assert_eq!(err.as_crypto(), Some(&CryptoError::PeerKeyUnavailable(stranger)));

    // Nothing reached the relay.
    assert!(a.relay.try_recv().is_none());
}

#[tokio::test]
async fn oversized_message_is_rejected() {
    let server = MemoryServer::new(ConnectionGate::default());
    let (mut a, b) = connected_pair(&server, Arc::new(ToyProvider::new())).await;
    let b_id = b.session.identity().id;

    let err = a.session.send(b_id, &"x".repeat(191)).await.unwrap_err();
    assert!(matches!(
        err.as_crypto(),
        Some(CryptoError::PayloadTooLarge { len: 191, max: 190 })
    ));
    assert!(a.relay.try_recv().is_none());
}

#[tokio::test]
async fn local_limit_blocks_accept_before_server() {
    let server = MemoryServer::new(ConnectionGate::default());
    let provider = Arc::new(ToyProvider::new());
    let config = SessionConfig {
        max_active_chats: 1,
        ..SessionConfig::default()
    };
    let a_id = server.register("asha");
    let b_id = server.register("ben");
    let c_id = server.register("chitra");
    let mut a = start(&server, a_id.clone(), provider.clone(), SessionConfig::default()).await;
    let mut b = start(&server, b_id.clone(), provider.clone(), config).await;
    let mut c = start(&server, c_id.clone(), provider, SessionConfig::default()).await;

    a.session.send_request(b_id.id, "", prefs(), "").await.unwrap();
    c.session.send_request(b_id.id, "", prefs(), "").await.unwrap();
    b.session.refresh().await.unwrap();
    b.session.accept(a_id.id).await.unwrap();

    let err = b.session.accept(c_id.id).await.unwrap_err();
    assert!(matches!(
        err.as_gate(),
        Some(GateError::ChatLimitExceeded { limit: 1, .. })
    ));
    // The server never saw the second accept.
    assert!(server.ledger(b_id.id).has_pending_from(c_id.id));
}

#[tokio::test]
async fn regenerated_keys_turn_old_history_into_placeholders() {
    let server = MemoryServer::new(ConnectionGate::default());
    let provider = Arc::new(ToyProvider::new());
    let (mut a, mut b) = connected_pair(&server, provider.clone()).await;
    let (a_id, b_id) = (a.session.identity().id, b.session.identity().id);

    a.session.send(b_id, "before logout").await.unwrap();
    forward(&mut a.relay, &server, &mut b.relay).await;

    // B logs out and back in with a fresh key pair.
    drop(b);
    let mut b = start(&server, Identity::new(b_id, "ben"), provider, SessionConfig::default()).await;
    let log = b.session.open_conversation(a_id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert!(log.messages()[0].body.is_placeholder());

    // A picks up the new key on refresh and can talk again.
    a.session.refresh().await.unwrap();
    a.session.send(b_id, "after login").await.unwrap();
    forward(&mut a.relay, &server, &mut b.relay).await;
    assert!(b.session.process_next().await.unwrap());
    let last = b.session.conversation().unwrap().messages().last().unwrap();
    assert_eq!(last.body.render(), "after login");
}

#[tokio::test]
async fn rsa_sessions_exchange_messages() {
    let server = MemoryServer::new(ConnectionGate::default());
    // Small modulus keeps key generation fast in debug builds.
    let provider = Arc::new(RsaOaepProvider::with_modulus_bits(1024));
    let (mut a, mut b) = connected_pair(&server, provider).await;
    let (a_id, b_id) = (a.session.identity().id, b.session.identity().id);

    b.session.open_conversation(a_id).await.unwrap();
    a.session.send(b_id, "hello over rsa").await.unwrap();
    forward(&mut a.relay, &server, &mut b.relay).await;
    assert!(b.session.process_next().await.unwrap());

    assert_eq!(
        b.session.conversation().unwrap().messages()[0].body,
        MessageBody::Text("hello over rsa".into())
    );
}

/// Fails key generation and otherwise behaves like [`ToyProvider`].
struct NoEntropyProvider(ToyProvider);

impl CryptoProvider for NoEntropyProvider {
    type PublicKey = ToyKey;
    type PrivateKey = ToyKey;

    fn generate(&self) -> Result<(ToyKey, ToyKey), CryptoError> {
        Err(CryptoError::KeyGeneration("entropy source unavailable".into()))
    }

    fn export_public(&self, key: &ToyKey) -> Result<Vec<u8>, CryptoError> {
        self.0.export_public(key)
    }

    fn import_public(&self, der: &[u8]) -> Result<ToyKey, CryptoError> {
        self.0.import_public(der)
    }

    fn max_plaintext_len(&self, key: &ToyKey) -> usize {
        self.0.max_plaintext_len(key)
    }

    fn encrypt(&self, key: &ToyKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0.encrypt(key, plaintext)
    }

    fn decrypt(&self, key: &ToyKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0.decrypt(key, ciphertext)
    }
}

#[tokio::test]
async fn start_fails_when_key_generation_fails() {
    let server = MemoryServer::new(ConnectionGate::default());
    let identity = server.register("asha");
    let (client_end, _relay) = MemoryChannel::pair();

    let err = ConversationSession::start(
        identity.clone(),
        Arc::new(NoEntropyProvider(ToyProvider::new())),
        server.backend(identity.id),
        Box::new(client_end),
        SessionConfig::default(),
    )
    .await
    .err()
    .expect("session must not start without a key pair");

    assert!(matches!(err.as_crypto(), Some(CryptoError::KeyGeneration(_))));
    assert_eq!(server.ledger(identity.id).public_key, "");
    assert_eq!(server.overview_calls(), 0);
}

#[tokio::test]
async fn start_fails_when_publish_fails() {
    let server = MemoryServer::new(ConnectionGate::default());
    let identity = server.register("asha");
    let (client_end, _relay) = MemoryChannel::pair();
    server.reject_publish();

    let err = ConversationSession::start(
        identity.clone(),
        Arc::new(ToyProvider::new()),
        server.backend(identity.id),
        Box::new(client_end),
        SessionConfig::default(),
    )
    .await
    .err()
    .expect("session must not start with an unpublished key");

    assert!(matches!(err, ClientError::Http { status: 500, .. }));
    assert_eq!(server.overview_calls(), 0);
}

#[tokio::test]
async fn accept_without_requester_key_keeps_partner_active() {
    let server = MemoryServer::new(ConnectionGate::default());
    let provider = Arc::new(ToyProvider::new());
    let a_id = server.register("asha");
    let b_id = server.register("ben");
    let mut b = start(&server, b_id.clone(), provider.clone(), SessionConfig::default()).await;

    // A has no session yet, so no key was ever published.
    server
        .backend(a_id.id)
        .send_request(&SendRequestBody {
            target_user_id: b_id.id,
            custom_message: "coffee?".into(),
            location_preferences: prefs(),
            code_word: "owl".into(),
        })
        .await
        .unwrap();
    b.session.refresh().await.unwrap();

    let partner = b.session.accept(a_id.id).await.unwrap();
    assert_eq!(partner.id, a_id.id);
    assert_eq!(partner.public_key, "");
    assert!(b.session.is_active(a_id.id));
    assert!(!b.session.can_send_to(a_id.id));
    assert!(b.session.pending_requests().is_empty());
    assert!(server.ledger(b_id.id).has_active(a_id.id));

    let err = b.session.send(a_id.id, "hi").await.unwrap_err();
    assert_eq!(err.as_crypto(), Some(&CryptoError::PeerKeyUnavailable(a_id.id)));

    // A logs in and publishes; B's next refresh makes A sendable.
    let a = start(&server, a_id.clone(), provider, SessionConfig::default()).await;
    b.session.refresh().await.unwrap();
    assert!(b.session.can_send_to(a_id.id));
    assert_eq!(
        b.session.active_partners()[0].public_key,
        a.session.public_key()
    );
}

#[tokio::test]
async fn reloaded_history_shows_own_messages_with_server_time() {
    let server = MemoryServer::new(ConnectionGate::default());
    let (mut a, mut b) = connected_pair(&server, Arc::new(ToyProvider::new())).await;
    let (a_id, b_id) = (a.session.identity().id, b.session.identity().id);

    a.session.open_conversation(b_id).await.unwrap();
    a.session.send(b_id, "first").await.unwrap();
    let first = forward(&mut a.relay, &server, &mut b.relay).await;

    // B's reply is stamped by the server after A's message.
    b.session.send(a_id, "second").await.unwrap();
    let stored_reply = forward(&mut b.relay, &server, &mut a.relay).await;

    let log = a.session.open_conversation(b_id).await.unwrap();
    let shown: Vec<(String, chrono::DateTime<Utc>)> = log
        .messages()
        .iter()
        .map(|m| (m.body.render().to_string(), m.timestamp))
        .collect();
    assert_eq!(
        shown,
        vec![
            ("first".to_string(), first.timestamp),
            ("second".to_string(), stored_reply.timestamp),
        ]
    );

    // A fresh session no longer has the plaintext of what it sent.
    drop(a);
    let a = start(
        &server,
        Identity::new(a_id, "asha"),
        Arc::new(ToyProvider::new()),
        SessionConfig::default(),
    )
    .await;
    let log = a.session.load_history(b_id).await.unwrap();
    assert!(log.messages()[0].body.is_placeholder());
}
