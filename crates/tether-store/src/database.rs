//! Database connection management.
//!
//! The [`Database`] struct owns a single [`rusqlite::Connection`] behind a
//! mutex and guarantees that migrations are run before any other
//! operation. All three schemas (chats, messages, webhook configuration)
//! live in one file so that webhook mutations and message writes share
//! transactional boundaries.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Default on-disk location, alongside the platform session store.
pub const DEFAULT_DB_PATH: &str = "store/messages.db";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the default bridge database under `store/`.
    pub fn open_default() -> Result<Self> {
        let path = Path::new(DEFAULT_DB_PATH);
        if let Some(dir) = path.parent() {
            create_store_dir(dir)?;
        }
        Self::open_at(path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the shared connection. All store operations serialize
    /// through this lock.
    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.conn().ok().and_then(|c| c.path().map(PathBuf::from))
    }
}

#[cfg(unix)]
fn create_store_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_store_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Timestamps are stored as fixed-width RFC3339 UTC text so that SQLite's
/// lexicographic ordering matches chronological ordering.
pub(crate) fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_sql(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
    }

    #[test]
    fn timestamp_text_orders_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(250);
        assert!(ts_to_sql(early) < ts_to_sql(late));
        assert_eq!(ts_from_sql(&ts_to_sql(late)).unwrap(), late);
    }
}
