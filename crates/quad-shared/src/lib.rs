//! Types, crypto and gate logic shared by the Quad client, store and server.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod gate;
pub mod protocol;
pub mod types;
pub mod validation;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{CryptoError, GateError, QuadError, ValidationError};
pub use types::UserId;
