use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::constants::{OAEP_DIGEST_SIZE, RSA_MODULUS_BITS};
use crate::error::CryptoError;

/// Asymmetric encryption capability injected into the key vault, the peer
/// directory and the codec.
///
/// Public keys travel as SPKI-DER bytes; the provider never sees base64.
pub trait CryptoProvider: Send + Sync + 'static {
    type PublicKey: Clone + Send + Sync + 'static;
    type PrivateKey: Send + Sync + 'static;

    /// Generate a fresh key pair.
    fn generate(&self) -> Result<(Self::PublicKey, Self::PrivateKey), CryptoError>;

    /// Serialize a public key to SPKI-DER.
    fn export_public(&self, key: &Self::PublicKey) -> Result<Vec<u8>, CryptoError>;

    /// Parse an SPKI-DER public key.
    fn import_public(&self, der: &[u8]) -> Result<Self::PublicKey, CryptoError>;

    /// Largest plaintext `encrypt` accepts for this key.
    fn max_plaintext_len(&self, key: &Self::PublicKey) -> usize;

    fn encrypt(&self, key: &Self::PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, key: &Self::PrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// RSA-OAEP with SHA-256 and public exponent 65537.
#[derive(Debug, Clone)]
pub struct RsaOaepProvider {
    modulus_bits: usize,
}

impl RsaOaepProvider {
    pub fn new() -> Self {
        Self {
            modulus_bits: RSA_MODULUS_BITS,
        }
    }

    /// Smaller moduli are only meant for tests.
    pub fn with_modulus_bits(modulus_bits: usize) -> Self {
        Self { modulus_bits }
    }
}

impl Default for RsaOaepProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider for RsaOaepProvider {
    type PublicKey = RsaPublicKey;
    type PrivateKey = RsaPrivateKey;

    fn generate(&self) -> Result<(RsaPublicKey, RsaPrivateKey), CryptoError> {
        // RsaPrivateKey::new always uses e = 65537.
        let private = RsaPrivateKey::new(&mut OsRng, self.modulus_bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok((public, private))
    }

    fn export_public(&self, key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
        let doc = key
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyExport(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    fn import_public(&self, der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
        RsaPublicKey::from_public_key_der(der).map_err(|e| CryptoError::KeyImport(e.to_string()))
    }

    fn max_plaintext_len(&self, key: &RsaPublicKey) -> usize {
        key.size().saturating_sub(2 * OAEP_DIGEST_SIZE + 2)
    }

    fn encrypt(&self, key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    fn decrypt(&self, key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        key.decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|e| CryptoError::Decryption {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsa_export_import_roundtrip() {
        let provider = RsaOaepProvider::with_modulus_bits(1024);
        let (public, _) = provider.generate().unwrap();

        let der = provider.export_public(&public).unwrap();
        let imported = provider.import_public(&der).unwrap();

        assert_eq!(imported, public);
        assert_eq!(provider.export_public(&imported).unwrap(), der);
    }

    #[test]
    fn test_rsa_public_exponent_is_65537() {
        let provider = RsaOaepProvider::with_modulus_bits(1024);
        let (public, _) = provider.generate().unwrap();
        assert_eq!(public.e(), &rsa::BigUint::from(65_537u32));
    }

    #[test]
    fn test_rsa_oaep_overhead() {
        let provider = RsaOaepProvider::with_modulus_bits(1024);
        let (public, _) = provider.generate().unwrap();
        // 128 - 2 * 32 - 2
        assert_eq!(provider.max_plaintext_len(&public), 62);
    }

    #[test]
    fn test_rsa_wrong_key_fails() {
        let provider = RsaOaepProvider::with_modulus_bits(1024);
        let (public, _) = provider.generate().unwrap();
        let (_, other_private) = provider.generate().unwrap();

        let ciphertext = provider.encrypt(&public, b"hello").unwrap();
        let err = provider.decrypt(&other_private, &ciphertext).unwrap_err();
        assert!(matches!(err, CryptoError::Decryption { .. }));
    }

    #[test]
    fn test_import_garbage_fails() {
        let provider = RsaOaepProvider::new();
        let err = provider.import_public(b"not a key").unwrap_err();
        assert!(matches!(err, CryptoError::KeyImport(_)));
    }
}
