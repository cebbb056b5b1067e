use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::{ts_from_sql, ts_to_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::Chat;

impl Database {
    /// Upsert a chat by address. The stored activity time only ever moves
    /// forward, toward the most recent message observed.
    pub fn store_chat(&self, address: &str, name: &str, last_message_time: DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO chats (address, name, last_message_time) VALUES (?1, ?2, ?3)
             ON CONFLICT(address) DO UPDATE SET
                 name = excluded.name,
                 last_message_time = MAX(last_message_time, excluded.last_message_time)",
            params![address, name, ts_to_sql(last_message_time)],
        )?;
        Ok(())
    }

    /// The stored display name for a chat, if any. Empty names count as
    /// unresolved.
    pub fn get_chat_name(&self, address: &str) -> Result<Option<String>> {
        let name: Option<String> = self
            .conn()?
            .query_row(
                "SELECT name FROM chats WHERE address = ?1",
                params![address],
                |row| row.get(0),
            )
            .map(|n: Option<String>| n.filter(|n| !n.is_empty()))
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(name)
    }

    pub fn get_chats(&self) -> Result<Vec<Chat>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT address, name, last_message_time FROM chats ORDER BY last_message_time DESC",
        )?;
        let rows = stmt.query_map([], row_to_chat)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn count_chats(&self) -> Result<i64> {
        let count = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let address: String = row.get(0)?;
    let name: Option<String> = row.get(1)?;
    let ts_str: String = row.get(2)?;

    let last_message_time = ts_from_sql(&ts_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Chat {
        address,
        name: name.unwrap_or_default(),
        last_message_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, sec).unwrap()
    }

    #[test]
    fn upsert_keeps_latest_activity() {
        let db = Database::open_in_memory().unwrap();

        db.store_chat("111@individual", "Alice", ts(30)).unwrap();
        // A history backfill delivering an older message must not move the
        // chat backwards.
        db.store_chat("111@individual", "Alice", ts(10)).unwrap();

        let chats = db.get_chats().unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].last_message_time, ts(30));

        db.store_chat("111@individual", "Alice", ts(50)).unwrap();
        assert_eq!(db.get_chats().unwrap()[0].last_message_time, ts(50));
    }

    #[test]
    fn name_lookup_treats_empty_as_unresolved() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_chat_name("x@group").unwrap(), None);

        db.store_chat("x@group", "", ts(1)).unwrap();
        assert_eq!(db.get_chat_name("x@group").unwrap(), None);

        db.store_chat("x@group", "Team", ts(2)).unwrap();
        assert_eq!(db.get_chat_name("x@group").unwrap(), Some("Team".into()));
    }

    #[test]
    fn chats_ordered_by_activity() {
        let db = Database::open_in_memory().unwrap();
        db.store_chat("a@individual", "A", ts(10)).unwrap();
        db.store_chat("b@individual", "B", ts(20)).unwrap();

        let chats = db.get_chats().unwrap();
        assert_eq!(chats[0].address, "b@individual");
        assert_eq!(db.count_chats().unwrap(), 2);
    }
}
