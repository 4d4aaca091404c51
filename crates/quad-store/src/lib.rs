//! # quad-store
//!
//! Durable storage for the Quad server, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for user profiles,
//! published public keys, chat ledgers (pending requests and active chats)
//! and the message log. Connection-gate transitions are applied inside a
//! single transaction so both participants' records change together.

pub mod database;
pub mod ledger;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod password;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
