//! v001 -- Initial schema creation.
//!
//! Creates the chat/message history tables and the three webhook tables
//! (configs, triggers, delivery logs).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    address           TEXT PRIMARY KEY NOT NULL,  -- user@server
    name              TEXT,
    last_message_time TEXT NOT NULL               -- RFC-3339 UTC
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT NOT NULL,                -- platform message id
    chat_address    TEXT NOT NULL,                -- FK -> chats(address)
    sender          TEXT,                         -- sender address, NULL when not preserved
    content         TEXT NOT NULL,
    timestamp       TEXT NOT NULL,                -- RFC-3339 UTC
    is_from_me      INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    media_type      TEXT,                         -- image|video|audio|document
    filename        TEXT,
    url             TEXT,
    media_key       BLOB,
    file_sha256     BLOB,
    file_enc_sha256 BLOB,
    file_length     INTEGER,

    PRIMARY KEY (id, chat_address),
    FOREIGN KEY (chat_address) REFERENCES chats(address)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_address, timestamp DESC);

-- ----------------------------------------------------------------
-- Webhook configurations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS webhook_configs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    target_url TEXT NOT NULL,
    secret     TEXT,
    enabled    INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS webhook_triggers (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    webhook_config_id INTEGER NOT NULL REFERENCES webhook_configs(id),
    trigger_type      TEXT NOT NULL,              -- all|chat|sender|keyword|media_kind
    trigger_value     TEXT NOT NULL DEFAULT '',
    match_type        TEXT NOT NULL DEFAULT 'exact',
    enabled           INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_webhook_triggers_config
    ON webhook_triggers(webhook_config_id);

-- ----------------------------------------------------------------
-- Webhook delivery logs (one row per attempt)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS webhook_logs (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    webhook_config_id INTEGER NOT NULL REFERENCES webhook_configs(id),
    message_id        TEXT NOT NULL DEFAULT '',
    chat_address      TEXT NOT NULL DEFAULT '',
    trigger_type      TEXT NOT NULL DEFAULT '',
    trigger_value     TEXT NOT NULL DEFAULT '',
    payload           TEXT NOT NULL DEFAULT '',
    response_status   INTEGER NOT NULL DEFAULT 0,
    response_body     TEXT NOT NULL DEFAULT '',
    attempt_count     INTEGER NOT NULL DEFAULT 1,
    delivered_at      TEXT,                       -- set only on 2xx
    created_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_webhook_logs_config
    ON webhook_logs(webhook_config_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
