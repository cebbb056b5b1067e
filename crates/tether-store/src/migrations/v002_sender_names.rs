//! v002 -- Denormalized sender display names.
//!
//! Adds the nullable `sender_name` column to `messages`. Databases created
//! before the column existed are upgraded in place; a database that
//! already carries the column reports "duplicate column name", which is
//! treated as a no-op so the migration stays idempotent.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub fn up(conn: &Connection) -> Result<()> {
    match conn.execute("ALTER TABLE messages ADD COLUMN sender_name TEXT", []) {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("duplicate column name") => Ok(()),
        Err(e) => Err(StoreError::Migration(e.to_string())),
    }
}
