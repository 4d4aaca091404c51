//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quad_shared::types::{Identity, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user's profile. Credentials are never loaded into this
/// struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub username: String,
    pub email: String,
    /// Year of study, 1 to 4.
    pub year: u8,
    pub branch: String,
    pub bio: String,
    pub interests: Vec<String>,
    /// Base64 SPKI-DER key from the user's current session; empty until the
    /// first publish.
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn identity(&self) -> Identity {
        Identity::new(self.id, self.username.clone())
    }
}
