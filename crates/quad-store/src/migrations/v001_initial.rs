//! v001 -- Initial schema creation.
//!
//! Creates `users`, `active_chats`, `connection_requests` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (profile + the published public key)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,          -- UUID v4
    name          TEXT NOT NULL,
    username      TEXT NOT NULL UNIQUE COLLATE NOCASE,
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,                      -- Argon2id PHC string
    year          INTEGER NOT NULL,
    branch        TEXT NOT NULL,
    bio           TEXT NOT NULL,
    interests     TEXT NOT NULL DEFAULT '[]',         -- JSON array
    public_key    TEXT NOT NULL DEFAULT '',           -- base64 SPKI-DER
    created_at    TEXT NOT NULL                       -- RFC-3339
);

-- ----------------------------------------------------------------
-- Active chats (one row per side of a pairing)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS active_chats (
    owner_id           TEXT NOT NULL,
    partner_id         TEXT NOT NULL,
    partner_username   TEXT NOT NULL,
    partner_public_key TEXT NOT NULL,
    position           INTEGER NOT NULL,

    PRIMARY KEY (owner_id, partner_id),
    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Pending connection requests, held by the recipient
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS connection_requests (
    recipient_id         TEXT NOT NULL,
    sender_id            TEXT NOT NULL,
    sender_username      TEXT NOT NULL,
    message              TEXT NOT NULL,
    location_preferences TEXT NOT NULL DEFAULT '[]',  -- JSON array
    code_word            TEXT NOT NULL DEFAULT '',
    status               TEXT NOT NULL DEFAULT 'requested',
    created_at           TEXT NOT NULL,

    PRIMARY KEY (recipient_id, sender_id),
    FOREIGN KEY (recipient_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,            -- UUID v4
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    content     TEXT NOT NULL,
    encrypted   INTEGER NOT NULL DEFAULT 1,           -- boolean 0/1
    timestamp   TEXT NOT NULL                         -- RFC-3339, fixed width
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, receiver_id, timestamp);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
