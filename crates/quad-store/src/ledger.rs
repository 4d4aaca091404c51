//! Persistence for chat ledgers: pending connection requests and active
//! chats.
//!
//! Every gate transition loads both participants' ledgers, applies the
//! transition in memory through [`ConnectionGate`], and writes the result
//! back inside one `IMMEDIATE` transaction. A rejected transition rolls
//! back with nothing written.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use quad_shared::gate::{AcceptOutcome, ChatLedger, ConnectionGate, RequestPayload};
use quad_shared::protocol::{
    ActiveChat, ChatOverview, ConnectionRequest, PeerSummary, PendingSummary, RequestStatus,
};
use quad_shared::types::{LocationPreference, UserId};

use crate::database::{conversion_err, format_ts, parse_ts, parse_uuid, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Load the gate-relevant slice of `id`'s record.
    pub fn load_ledger(&self, id: UserId) -> Result<ChatLedger> {
        load_ledger(self.conn(), id)
    }

    /// Queue a connection request from `sender` to `recipient`.
    pub fn send_request(
        &mut self,
        gate: &ConnectionGate,
        sender: UserId,
        recipient: UserId,
        payload: RequestPayload,
    ) -> Result<()> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sender_ledger = load_ledger(&tx, sender)?;
        let mut recipient_ledger = load_ledger(&tx, recipient)?;

        gate.send_request(&sender_ledger, &mut recipient_ledger, payload)?;

        write_ledger(&tx, &recipient_ledger)?;
        tx.commit()?;

        tracing::info!(sender = %sender, recipient = %recipient, "chat request stored");
        Ok(())
    }

    /// `recipient` accepts the pending request from `requester`. Both sides
    /// are written in the same transaction.
    pub fn accept_request(
        &mut self,
        gate: &ConnectionGate,
        recipient: UserId,
        requester: UserId,
    ) -> Result<AcceptOutcome> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut recipient_ledger = load_ledger(&tx, recipient)?;
        let mut requester_ledger = load_ledger(&tx, requester)?;

        let outcome = gate.accept(&mut recipient_ledger, &mut requester_ledger)?;

        write_ledger(&tx, &recipient_ledger)?;
        write_ledger(&tx, &requester_ledger)?;
        tx.commit()?;

        tracing::info!(
            recipient = %recipient,
            requester = %requester,
            requester_linked = outcome.requester_linked,
            "chat request accepted"
        );
        Ok(outcome)
    }

    /// Active chats resolved to each partner's current username and public
    /// key, plus pending requests resolved to the requester's current
    /// username.
    pub fn chat_overview(&self, id: UserId) -> Result<ChatOverview> {
        // Fails with NotFound for unknown users.
        self.get_public_key(id)?;

        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.username, u.public_key
             FROM active_chats c
             JOIN users u ON u.id = c.partner_id
             WHERE c.owner_id = ?1
             ORDER BY c.position ASC",
        )?;
        let active_chats = stmt
            .query_map(params![id.to_string()], |row| {
                let partner: String = row.get(0)?;
                Ok(PeerSummary {
                    id: UserId(parse_uuid(0, &partner)?),
                    username: row.get(1)?,
                    public_key: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = self.conn().prepare(
            "SELECT r.sender_id, COALESCE(u.username, r.sender_username),
                    r.message, r.location_preferences, r.code_word
             FROM connection_requests r
             LEFT JOIN users u ON u.id = r.sender_id
             WHERE r.recipient_id = ?1
             ORDER BY r.created_at ASC",
        )?;
        let pending_requests = stmt
            .query_map(params![id.to_string()], |row| {
                let sender: String = row.get(0)?;
                let prefs: String = row.get(3)?;
                Ok(PendingSummary {
                    id: UserId(parse_uuid(0, &sender)?),
                    username: row.get(1)?,
                    message: row.get(2)?,
                    location_preferences: parse_prefs(3, &prefs)?,
                    code_word: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ChatOverview {
            active_chats,
            pending_requests,
        })
    }

    /// Whether `owner` has `partner` among their active chats.
    pub fn is_active_chat(&self, owner: UserId, partner: UserId) -> Result<bool> {
        Ok(self
            .conn()
            .query_row(
                "SELECT 1 FROM active_chats WHERE owner_id = ?1 AND partner_id = ?2",
                params![owner.to_string(), partner.to_string()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }
}

fn load_ledger(conn: &Connection, id: UserId) -> Result<ChatLedger> {
    let (username, public_key): (String, String) = conn
        .query_row(
            "SELECT username, public_key FROM users WHERE id = ?1",
            params![id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or(StoreError::NotFound)?;

    let mut ledger = ChatLedger::new(id, username, public_key);

    let mut stmt = conn.prepare(
        "SELECT partner_id, partner_username, partner_public_key
         FROM active_chats
         WHERE owner_id = ?1
         ORDER BY position ASC",
    )?;
    ledger.active_chats = stmt
        .query_map(params![id.to_string()], |row| {
            let partner: String = row.get(0)?;
            Ok(ActiveChat {
                partner: UserId(parse_uuid(0, &partner)?),
                partner_username: row.get(1)?,
                partner_public_key: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT sender_id, sender_username, message, location_preferences, code_word, created_at
         FROM connection_requests
         WHERE recipient_id = ?1
         ORDER BY created_at ASC",
    )?;
    ledger.pending = stmt
        .query_map(params![id.to_string()], |row| {
            let sender: String = row.get(0)?;
            let prefs: String = row.get(3)?;
            let created_at: String = row.get(5)?;
            Ok(ConnectionRequest {
                from: UserId(parse_uuid(0, &sender)?),
                from_username: row.get(1)?,
                message: row.get(2)?,
                location_preferences: parse_prefs(3, &prefs)?,
                code_word: row.get(4)?,
                status: RequestStatus::Requested,
                created_at: parse_ts(5, &created_at)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(ledger)
}

/// Replace the stored active chats and pending requests of `ledger.owner`.
fn write_ledger(conn: &Connection, ledger: &ChatLedger) -> Result<()> {
    let owner = ledger.owner.to_string();

    conn.execute("DELETE FROM active_chats WHERE owner_id = ?1", params![owner])?;
    for (position, chat) in ledger.active_chats.iter().enumerate() {
        conn.execute(
            "INSERT INTO active_chats (owner_id, partner_id, partner_username, partner_public_key, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                owner,
                chat.partner.to_string(),
                chat.partner_username,
                chat.partner_public_key,
                position as i64,
            ],
        )?;
    }

    conn.execute(
        "DELETE FROM connection_requests WHERE recipient_id = ?1",
        params![owner],
    )?;
    for request in &ledger.pending {
        conn.execute(
            "INSERT INTO connection_requests
                (recipient_id, sender_id, sender_username, message, location_preferences, code_word, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'requested', ?7)",
            params![
                owner,
                request.from.to_string(),
                request.from_username,
                request.message,
                serde_json::to_string(&request.location_preferences)?,
                request.code_word,
                format_ts(&request.created_at),
            ],
        )?;
    }

    Ok(())
}

fn parse_prefs(idx: usize, json: &str) -> rusqlite::Result<BTreeSet<LocationPreference>> {
    serde_json::from_str(json).map_err(|e| conversion_err(idx, e))
}
