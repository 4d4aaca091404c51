//! # quad-client
//!
//! The client side of Quad's end-to-end encryption.
//!
//! A [`ConversationSession`] is created at login and dropped at logout. It
//! owns the user's key pair, the cache of partners' public keys, and the
//! open conversation. The server (through [`ChatBackend`]) and the live
//! relay (through [`DeliveryChannel`]) only ever see ciphertext.

pub mod backend;
pub mod channel;
pub mod conversation;
pub mod error;
pub mod session;

pub use backend::{ChatBackend, HttpBackend};
pub use channel::{DeliveryChannel, MemoryChannel, WsChannel};
pub use conversation::{ConversationLog, DisplayMessage, MessageBody};
pub use error::{ClientError, Result};
pub use session::{ConversationSession, SessionConfig};
