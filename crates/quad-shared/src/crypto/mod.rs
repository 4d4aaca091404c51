//! End-to-end message encryption.
//!
//! The key material lives behind an injected [`CryptoProvider`]; everything
//! that crosses a process boundary (public keys, ciphertexts) is carried as
//! standard padded base64.

pub mod codec;
pub mod directory;
pub mod provider;
pub mod vault;

pub use codec::CipherCodec;
pub use directory::PeerKeyDirectory;
pub use provider::{CryptoProvider, RsaOaepProvider};
pub use vault::KeyVault;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub(crate) fn b64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub(crate) fn b64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(s)
}
