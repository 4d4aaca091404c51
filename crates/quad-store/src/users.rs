//! CRUD operations for [`UserRecord`]s and their published public keys.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use quad_shared::protocol::{RegisterRequest, Suggestion};
use quad_shared::types::UserId;
use quad_shared::validation::normalize_interests;

use crate::database::{conversion_err, format_ts, parse_ts, parse_uuid, Database};
use crate::error::{Result, StoreError};
use crate::models::UserRecord;

const USER_COLUMNS: &str =
    "id, name, username, email, year, branch, bio, interests, public_key, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Register a new user. Input is expected to be validated already and
    /// `password_hash` is the PHC string from [`crate::password::hash_password`].
    pub fn create_user(&self, req: &RegisterRequest, password_hash: &str) -> Result<UserRecord> {
        let username = req.username.trim();
        let email = req.email.trim();

        if self.exists("SELECT 1 FROM users WHERE username = ?1", username)? {
            return Err(StoreError::UsernameTaken);
        }
        if self.exists("SELECT 1 FROM users WHERE email = ?1", email)? {
            return Err(StoreError::EmailTaken);
        }

        let user = UserRecord {
            id: UserId::new(),
            name: req.name.trim().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            year: req.year,
            branch: req.branch.trim().to_string(),
            bio: req.bio.trim().to_string(),
            interests: normalize_interests(&req.interests),
            public_key: String::new(),
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO users (id, name, username, email, password_hash,
                                year, branch, bio, interests, public_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                user.id.to_string(),
                user.name,
                user.username,
                user.email,
                password_hash,
                user.year,
                user.branch,
                user.bio,
                serde_json::to_string(&user.interests)?,
                user.public_key,
                format_ts(&user.created_at),
            ],
        )?;

        tracing::info!(user = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: UserId) -> Result<UserRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    /// The account id and stored PHC hash for `email`, if registered.
    /// Verification is left to the caller so it can run off the lock.
    pub fn credentials(&self, email: &str) -> Result<Option<(UserId, String)>> {
        self.conn()
            .query_row(
                "SELECT id, password_hash FROM users WHERE email = ?1",
                params![email.trim()],
                |row| {
                    let id: String = row.get(0)?;
                    Ok((UserId(parse_uuid(0, &id)?), row.get(1)?))
                },
            )
            .optional()
            .map_err(Into::into)
    }

    // ------------------------------------------------------------------
    // Public keys
    // ------------------------------------------------------------------

    /// Overwrite the user's published public key.
    pub fn set_public_key(&self, id: UserId, public_key: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET public_key = ?1 WHERE id = ?2",
            params![public_key, id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        tracing::debug!(user = %id, "public key published");
        Ok(())
    }

    /// The user's published key, or an empty string if they never published.
    pub fn get_public_key(&self, id: UserId) -> Result<String> {
        self.conn()
            .query_row(
                "SELECT public_key FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    // ------------------------------------------------------------------
    // Suggestions
    // ------------------------------------------------------------------

    /// Other users ranked by how many interests they share with `id`.
    /// Users with nothing in common are left out.
    pub fn suggestions(&self, id: UserId, limit: usize) -> Result<Vec<Suggestion>> {
        let me = self.get_user(id)?;
        let mine: HashSet<String> = me.interests.iter().map(|i| i.to_lowercase()).collect();

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id != ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![id.to_string()], row_to_user)?;

        let mut ranked = Vec::new();
        for row in rows {
            let user = row?;
            let common = user
                .interests
                .iter()
                .filter(|i| mine.contains(&i.to_lowercase()))
                .count();
            if common == 0 {
                continue;
            }
            ranked.push(Suggestion {
                id: user.id,
                username: user.username,
                bio: user.bio,
                interests: user.interests,
                year: user.year,
                branch: user.branch,
                common_interests: common,
            });
        }

        // Stable sort keeps older accounts first among ties.
        ranked.sort_by(|a, b| b.common_interests.cmp(&a.common_interests));
        ranked.truncate(limit);
        Ok(ranked)
    }

    fn exists(&self, sql: &str, value: &str) -> Result<bool> {
        Ok(self
            .conn()
            .query_row(sql, params![value], |_| Ok(()))
            .optional()?
            .is_some())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let id: String = row.get(0)?;
    let interests: String = row.get(7)?;
    let created_at: String = row.get(9)?;

    Ok(UserRecord {
        id: UserId(parse_uuid(0, &id)?),
        name: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        year: row.get(4)?,
        branch: row.get(5)?,
        bio: row.get(6)?,
        interests: serde_json::from_str(&interests).map_err(|e| conversion_err(7, e))?,
        public_key: row.get(8)?,
        created_at: parse_ts(9, &created_at)?,
    })
}
