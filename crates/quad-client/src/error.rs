use thiserror::Error;

use quad_shared::{CryptoError, GateError, QuadError, UserId, ValidationError};

/// Errors surfaced to the UI layer.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The request never got a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("Server returned {status}: {message}")]
    Http { status: u16, message: String },

    /// The live-delivery channel failed or closed.
    #[error("Delivery channel error: {0}")]
    Channel(String),

    /// `partner` is not one of this session's active chats.
    #[error("No active chat with {0}")]
    NotActive(UserId),

    /// A background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Quad(#[from] QuadError),
}

impl From<CryptoError> for ClientError {
    fn from(e: CryptoError) -> Self {
        ClientError::Quad(e.into())
    }
}

impl From<GateError> for ClientError {
    fn from(e: GateError) -> Self {
        ClientError::Quad(e.into())
    }
}

impl From<ValidationError> for ClientError {
    fn from(e: ValidationError) -> Self {
        ClientError::Quad(e.into())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

impl ClientError {
    /// The crypto error behind this failure, if any.
    pub fn as_crypto(&self) -> Option<&CryptoError> {
        match self {
            ClientError::Quad(QuadError::Crypto(e)) => Some(e),
            _ => None,
        }
    }

    pub fn as_gate(&self) -> Option<&GateError> {
        match self {
            ClientError::Quad(QuadError::Gate(e)) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
