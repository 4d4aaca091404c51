use std::sync::Arc;

use crate::crypto::{b64_encode, CryptoProvider};
use crate::error::CryptoError;

/// The session's own key pair.
///
/// Generated once per session and never persisted. The private half has no
/// public accessor: only [`CipherCodec`](crate::crypto::CipherCodec) reads it.
pub struct KeyVault<P: CryptoProvider> {
    provider: Arc<P>,
    public: P::PublicKey,
    private: P::PrivateKey,
    exported: String,
}

impl<P: CryptoProvider> KeyVault<P> {
    /// Generate a fresh key pair and pre-compute its exported form.
    pub fn generate(provider: Arc<P>) -> Result<Self, CryptoError> {
        let (public, private) = provider.generate()?;
        let exported = export_public(provider.as_ref(), &public)?;

        tracing::debug!(
            key_prefix = %&exported[..exported.len().min(16)],
            "generated session key pair"
        );

        Ok(Self {
            provider,
            public,
            private,
            exported,
        })
    }

    /// Base64 SPKI-DER form of the public key, ready to publish.
    pub fn export_public(&self) -> &str {
        &self.exported
    }

    pub fn public_key(&self) -> &P::PublicKey {
        &self.public
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub(crate) fn private_key(&self) -> &P::PrivateKey {
        &self.private
    }
}

impl<P: CryptoProvider> std::fmt::Debug for KeyVault<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("public", &self.exported)
            .finish_non_exhaustive()
    }
}

/// Serialize a public key to its transport form (base64 of SPKI-DER).
pub fn export_public<P: CryptoProvider>(
    provider: &P,
    key: &P::PublicKey,
) -> Result<String, CryptoError> {
    let der = provider.export_public(key)?;
    Ok(b64_encode(&der))
}
