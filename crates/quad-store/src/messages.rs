use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::params;
use uuid::Uuid;

use quad_shared::protocol::{MessageEvent, StoredMessage};
use quad_shared::types::UserId;

use crate::database::{format_ts, parse_ts, parse_uuid, Database};
use crate::error::Result;

impl Database {
    /// Append a delivered event to the log, stamped with `timestamp`
    /// (truncated to the microsecond precision the column keeps).
    pub fn append_message(
        &self,
        event: &MessageEvent,
        timestamp: DateTime<Utc>,
    ) -> Result<StoredMessage> {
        let message = StoredMessage {
            id: Uuid::new_v4(),
            sender: event.sender,
            receiver: event.receiver,
            content: event.content.clone(),
            timestamp: timestamp.trunc_subsecs(6),
            encrypted: event.encrypted,
        };
        self.insert_message(&message)?;
        Ok(message)
    }

    pub fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, encrypted, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                message.sender.to_string(),
                message.receiver.to_string(),
                message.content,
                message.encrypted,
                format_ts(&message.timestamp),
            ],
        )?;
        Ok(())
    }

    /// The full conversation between `a` and `b`, in both directions, oldest
    /// first.
    pub fn messages_between(&self, a: UserId, b: UserId) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, content, encrypted, timestamp
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY timestamp ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![a.to_string(), b.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let id: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let receiver: String = row.get(2)?;
    let ts: String = row.get(5)?;

    Ok(StoredMessage {
        id: parse_uuid(0, &id)?,
        sender: UserId(parse_uuid(1, &sender)?),
        receiver: UserId(parse_uuid(2, &receiver)?),
        content: row.get(3)?,
        encrypted: row.get(4)?,
        timestamp: parse_ts(5, &ts)?,
    })
}
