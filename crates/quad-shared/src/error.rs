use thiserror::Error;

use crate::types::UserId;

#[derive(Error, Debug)]
pub enum QuadError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Connection gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Public key export failed: {0}")]
    KeyExport(String),

    #[error("Public key import failed: {0}")]
    KeyImport(String),

    #[error("No public key cached for peer {0}")]
    PeerKeyUnavailable(UserId),

    #[error("Invalid base64 payload: {0}")]
    InvalidEncoding(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Wrong key, corrupted ciphertext, padding mismatch or non UTF-8 output.
    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("A request from {sender} to {recipient} is already pending")]
    DuplicateRequest { sender: UserId, recipient: UserId },

    #[error("Maximum active chats limit reached ({limit})")]
    ChatLimitExceeded { owner: UserId, limit: usize },

    #[error("{0} and {1} are already chatting")]
    AlreadyConnected(UserId, UserId),

    #[error("No pending request from {0}")]
    RequestNotFound(UserId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message has {words} words (max {max})")]
    MessageTooLong { words: usize, max: usize },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("At least {min} interests must be selected (got {got})")]
    TooFewInterests { got: usize, min: usize },

    #[error("Email must be a valid {domain} address")]
    InvalidEmail { domain: String },

    #[error("Code word is too long ({len} chars, max {max})")]
    CodeWordTooLong { len: usize, max: usize },

    #[error("Bio is too long ({len} chars, max {max})")]
    BioTooLong { len: usize, max: usize },

    #[error("Year must be between 1 and 4 (got {0})")]
    InvalidYear(u8),

    #[error("Cannot send a chat request to yourself")]
    SelfRequest,
}
