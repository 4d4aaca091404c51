use std::collections::HashMap;
use std::sync::Arc;

use crate::crypto::{b64_decode, CryptoProvider};
use crate::error::CryptoError;
use crate::types::UserId;

struct CachedKey<K> {
    exported: String,
    key: K,
}

/// Imported public keys of conversation partners, keyed by identity.
pub struct PeerKeyDirectory<P: CryptoProvider> {
    provider: Arc<P>,
    entries: HashMap<UserId, CachedKey<P::PublicKey>>,
}

impl<P: CryptoProvider> PeerKeyDirectory<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            entries: HashMap::new(),
        }
    }

    /// Import `exported` for `peer` and cache it.
    ///
    /// Re-resolving the same string is a no-op; a different string (the peer
    /// started a new session) replaces the cached key. On failure the
    /// existing entry, if any, is left untouched.
    pub fn resolve(&mut self, peer: UserId, exported: &str) -> Result<&P::PublicKey, CryptoError> {
        let cached = self
            .entries
            .get(&peer)
            .is_some_and(|entry| entry.exported == exported);

        if !cached {
            let der = b64_decode(exported)
                .map_err(|e| CryptoError::KeyImport(format!("invalid base64: {e}")))?;
            let key = self.provider.import_public(&der)?;

            let replaced = self
                .entries
                .insert(
                    peer,
                    CachedKey {
                        exported: exported.to_string(),
                        key,
                    },
                )
                .is_some();

            tracing::debug!(peer = %peer, replaced, "cached peer public key");
        }

        self.lookup(peer)
    }

    /// Cached key for `peer`. Absence is a hard failure: callers must not
    /// encrypt without a key.
    pub fn lookup(&self, peer: UserId) -> Result<&P::PublicKey, CryptoError> {
        self.entries
            .get(&peer)
            .map(|entry| &entry.key)
            .ok_or(CryptoError::PeerKeyUnavailable(peer))
    }

    /// The exported string the cached key was imported from.
    pub fn exported(&self, peer: UserId) -> Option<&str> {
        self.entries.get(&peer).map(|entry| entry.exported.as_str())
    }

    pub fn contains(&self, peer: UserId) -> bool {
        self.entries.contains_key(&peer)
    }

    pub fn forget(&mut self, peer: UserId) -> bool {
        self.entries.remove(&peer).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
