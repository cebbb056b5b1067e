use chrono::{DateTime, Utc};
use rusqlite::params;
use tether_shared::MediaKind;

use crate::database::{ts_from_sql, ts_to_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::{MessageSender, StoredMessage};

impl Database {
    /// Upsert a message by `(id, chat_address)`. Messages with neither
    /// text nor media are dropped; an empty sender name falls back to the
    /// sender address. A sender the platform did not preserve is stored
    /// as NULL, never as a substitute address.
    pub fn store_message(&self, msg: &StoredMessage) -> Result<()> {
        if msg.is_empty() {
            return Ok(());
        }

        let sender_name = if msg.sender_name.is_empty() {
            msg.sender.as_known().map(|s| s.to_string())
        } else {
            Some(msg.sender_name.clone())
        };

        self.conn()?.execute(
            "INSERT OR REPLACE INTO messages
             (id, chat_address, sender, sender_name, content, timestamp, is_from_me,
              media_type, filename, url, media_key, file_sha256, file_enc_sha256, file_length)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                msg.id,
                msg.chat_address,
                msg.sender.as_known(),
                sender_name,
                msg.content,
                ts_to_sql(msg.timestamp),
                msg.is_from_me,
                msg.media_type.map(|m| m.as_str()),
                msg.filename,
                msg.url,
                msg.media_key,
                msg.file_sha256,
                msg.file_enc_sha256,
                msg.file_length.map(|l| l as i64),
            ],
        )?;
        Ok(())
    }

    /// Messages for a chat, most recent first.
    pub fn get_messages(&self, chat_address: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, chat_address, sender, sender_name, content, timestamp, is_from_me,
                    media_type, filename, url, media_key, file_sha256, file_enc_sha256, file_length
             FROM messages
             WHERE chat_address = ?1
             ORDER BY timestamp DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_address, limit], row_to_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn count_messages(&self) -> Result<i64> {
        let count = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Timestamp of the most recent message across all chats, for the
    /// sync-status view.
    pub fn latest_message_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self.conn()?.query_row(
            "SELECT MAX(timestamp) FROM messages",
            [],
            |row| row.get(0),
        )?;
        match raw {
            Some(raw) => Ok(Some(ts_from_sql(&raw)?)),
            None => Ok(None),
        }
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let ts_str: String = row.get(5)?;
    let timestamp = ts_from_sql(&ts_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let media_type: Option<String> = row.get(7)?;
    let media_type = media_type.and_then(|m| m.parse::<MediaKind>().ok());

    let sender_raw: Option<String> = row.get(2)?;
    let sender = match sender_raw {
        Some(address) => MessageSender::Known(address),
        None => MessageSender::Unknown,
    };
    let sender_name: Option<String> = row.get(3)?;
    let file_length: Option<i64> = row.get(13)?;

    Ok(StoredMessage {
        id: row.get(0)?,
        chat_address: row.get(1)?,
        sender_name: sender_name
            .or_else(|| sender.as_known().map(|s| s.to_string()))
            .unwrap_or_default(),
        sender,
        content: row.get(4)?,
        timestamp,
        is_from_me: row.get(6)?,
        media_type,
        filename: row.get(8)?,
        url: row.get(9)?,
        media_key: row.get(10)?,
        file_sha256: row.get(11)?,
        file_enc_sha256: row.get(12)?,
        file_length: file_length.map(|l| l as u64),
    })
}
