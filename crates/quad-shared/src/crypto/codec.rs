use std::sync::Arc;

use crate::crypto::{b64_decode, b64_encode, CryptoProvider, KeyVault};
use crate::error::CryptoError;

/// Text <-> base64 ciphertext transcoding for single-shot chat messages.
///
/// Messages are encrypted directly under the recipient's public key with no
/// symmetric envelope, so a payload is capped by the key's OAEP limit.
pub struct CipherCodec<P: CryptoProvider> {
    provider: Arc<P>,
}

impl<P: CryptoProvider> Clone for CipherCodec<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
        }
    }
}

impl<P: CryptoProvider> CipherCodec<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Largest UTF-8 payload, in bytes, that `encrypt` accepts for `recipient`.
    pub fn max_plaintext_len(&self, recipient: &P::PublicKey) -> usize {
        self.provider.max_plaintext_len(recipient)
    }

    pub fn encrypt(&self, plaintext: &str, recipient: &P::PublicKey) -> Result<String, CryptoError> {
        let data = plaintext.as_bytes();
        let max = self.provider.max_plaintext_len(recipient);
        if data.len() > max {
            return Err(CryptoError::PayloadTooLarge {
                len: data.len(),
                max,
            });
        }

        let ciphertext = self.provider.encrypt(recipient, data)?;
        Ok(b64_encode(&ciphertext))
    }

    /// Decrypt a base64 ciphertext with the session's own private key.
    ///
    /// Malformed base64 is rejected before any cryptographic work.
    pub fn decrypt(&self, ciphertext: &str, own: &KeyVault<P>) -> Result<String, CryptoError> {
        let data = b64_decode(ciphertext).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

        let plaintext = self.provider.decrypt(own.private_key(), &data)?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption {
            reason: format!("plaintext is not valid UTF-8: {e}"),
        })
    }

    /// Apply the inbound policy: decrypt unless the sender explicitly marked
    /// the payload as plaintext.
    pub fn open(
        &self,
        payload: &str,
        encrypted: bool,
        own: &KeyVault<P>,
    ) -> Result<String, CryptoError> {
        if encrypted {
            self.decrypt(payload, own)
        } else {
            Ok(payload.to_string())
        }
    }
}
