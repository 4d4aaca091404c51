//! Deterministic [`CryptoProvider`] double.
//!
//! Keys are sequential integers and "encryption" is a keyed XOR tagged with
//! the recipient's key id, so ciphertexts are reproducible and a wrong key
//! is detected just like a real OAEP padding failure. Never use outside
//! tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::crypto::CryptoProvider;
use crate::error::CryptoError;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

const DER_TAG: &[u8; 4] = b"TOY1";
const MAX_PLAINTEXT: usize = 190;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToyKey(pub u64);

#[derive(Debug, Default)]
pub struct ToyProvider {
    imports: AtomicUsize,
}

impl ToyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `import_public` has been called.
    pub fn import_count(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    fn mask(id: u64, i: usize) -> u8 {
        (id as u8) ^ (i as u8).wrapping_mul(31) ^ 0x5a
    }
}

impl CryptoProvider for ToyProvider {
    type PublicKey = ToyKey;
    type PrivateKey = ToyKey;

    fn generate(&self) -> Result<(ToyKey, ToyKey), CryptoError> {
        let id = NEXT_KEY_ID.fetch_add(1, Ordering::SeqCst);
        Ok((ToyKey(id), ToyKey(id)))
    }

    fn export_public(&self, key: &ToyKey) -> Result<Vec<u8>, CryptoError> {
        let mut der = DER_TAG.to_vec();
        der.extend_from_slice(&key.0.to_be_bytes());
        Ok(der)
    }

    fn import_public(&self, der: &[u8]) -> Result<ToyKey, CryptoError> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        if der.len() != 12 || &der[..4] != DER_TAG {
            return Err(CryptoError::KeyImport("not a toy key".into()));
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&der[4..]);
        Ok(ToyKey(u64::from_be_bytes(id)))
    }

    fn max_plaintext_len(&self, _key: &ToyKey) -> usize {
        MAX_PLAINTEXT
    }

    fn encrypt(&self, key: &ToyKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = key.0.to_be_bytes().to_vec();
        out.extend(
            plaintext
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ Self::mask(key.0, i)),
        );
        Ok(out)
    }

    fn decrypt(&self, key: &ToyKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < 8 || ciphertext[..8] != key.0.to_be_bytes() {
            return Err(CryptoError::Decryption {
                reason: "ciphertext was not encrypted for this key".into(),
            });
        }
        Ok(ciphertext[8..]
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ Self::mask(key.0, i))
            .collect())
    }
}
