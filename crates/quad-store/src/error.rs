use thiserror::Error;

use quad_shared::QuadError;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Username already registered.
    #[error("Username already exists")]
    UsernameTaken,

    /// Email already registered.
    #[error("Email already exists")]
    EmailTaken,

    /// A gate transition or input validation was rejected. Nothing was
    /// written.
    #[error(transparent)]
    Rejected(#[from] QuadError),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Password hashing failed.
    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    /// JSON column could not be (de)serialized.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
