//! Webhook configuration, trigger and delivery-log persistence.
//!
//! Trigger updates are atomic: the config row update, the delete of the
//! old trigger set and the insert of the new one happen in a single
//! transaction with an explicit commit; dropping the transaction on any
//! error path rolls everything back.

use chrono::Utc;
use rusqlite::{params, Connection, Transaction};

use crate::database::{ts_from_sql, ts_to_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::{MatchType, TriggerType, WebhookConfig, WebhookLog, WebhookTrigger};

const CONFIG_COLUMNS: &str = "id, name, target_url, secret, enabled, created_at, updated_at";

impl Database {
    /// Insert a new config and its triggers. Assigns `cfg.id` and the
    /// trigger ids.
    pub fn store_webhook_config(&self, cfg: &mut WebhookConfig) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let now = ts_to_sql(Utc::now());
        tx.execute(
            "INSERT INTO webhook_configs (name, target_url, secret, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![cfg.name, cfg.target_url, cfg.secret, cfg.enabled, now],
        )?;
        cfg.id = tx.last_insert_rowid();

        insert_triggers(&tx, cfg.id, &mut cfg.triggers)?;

        tx.commit()?;
        Ok(())
    }

    /// Update a config row and replace its trigger set in one transaction.
    /// Fails with [`StoreError::NotFound`] when the id does not exist.
    pub fn update_webhook_config(&self, cfg: &mut WebhookConfig) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let touched = tx.execute(
            "UPDATE webhook_configs
             SET name = ?1, target_url = ?2, secret = ?3, enabled = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                cfg.name,
                cfg.target_url,
                cfg.secret,
                cfg.enabled,
                ts_to_sql(Utc::now()),
                cfg.id
            ],
        )?;
        if touched == 0 {
            return Err(StoreError::NotFound);
        }

        tx.execute(
            "DELETE FROM webhook_triggers WHERE webhook_config_id = ?1",
            params![cfg.id],
        )?;
        insert_triggers(&tx, cfg.id, &mut cfg.triggers)?;

        tx.commit()?;
        Ok(())
    }

    /// Delete a config with its delivery logs and triggers, in that order.
    pub fn delete_webhook_config(&self, id: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM webhook_configs WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if count == 0 {
            return Err(StoreError::NotFound);
        }

        tx.execute(
            "DELETE FROM webhook_logs WHERE webhook_config_id = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM webhook_triggers WHERE webhook_config_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM webhook_configs WHERE id = ?1", params![id])?;

        tx.commit()?;
        Ok(())
    }

    pub fn get_webhook_config(&self, id: i64) -> Result<WebhookConfig> {
        let conn = self.conn()?;
        let mut cfg = conn
            .query_row(
                &format!("SELECT {CONFIG_COLUMNS} FROM webhook_configs WHERE id = ?1"),
                params![id],
                row_to_config,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        cfg.triggers = load_triggers(&conn, cfg.id)?;
        Ok(cfg)
    }

    pub fn list_webhook_configs(&self) -> Result<Vec<WebhookConfig>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFIG_COLUMNS} FROM webhook_configs ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], row_to_config)?;
        let mut configs = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)?;
        for cfg in &mut configs {
            cfg.triggers = load_triggers(&conn, cfg.id)?;
        }
        Ok(configs)
    }

    pub fn store_webhook_log(&self, log: &WebhookLog) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO webhook_logs
             (webhook_config_id, message_id, chat_address, trigger_type, trigger_value,
              payload, response_status, response_body, attempt_count, delivered_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                log.webhook_config_id,
                log.message_id,
                log.chat_address,
                log.trigger_type,
                log.trigger_value,
                log.payload,
                log.response_status,
                log.response_body,
                log.attempt_count,
                log.delivered_at.map(ts_to_sql),
                ts_to_sql(log.created_at),
            ],
        )?;
        Ok(())
    }

    /// Delivery logs, most recent first. `config_id = 0` returns logs
    /// across all configs.
    pub fn get_webhook_logs(&self, config_id: i64, limit: u32) -> Result<Vec<WebhookLog>> {
        let conn = self.conn()?;
        let base = "SELECT id, webhook_config_id, message_id, chat_address, trigger_type,
                           trigger_value, payload, response_status, response_body,
                           attempt_count, delivered_at, created_at
                    FROM webhook_logs";

        let mut logs = Vec::new();
        if config_id > 0 {
            let mut stmt = conn.prepare(&format!(
                "{base} WHERE webhook_config_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![config_id, limit], row_to_log)?;
            for row in rows {
                logs.push(row?);
            }
        } else {
            let mut stmt =
                conn.prepare(&format!("{base} ORDER BY created_at DESC, id DESC LIMIT ?1"))?;
            let rows = stmt.query_map(params![limit], row_to_log)?;
            for row in rows {
                logs.push(row?);
            }
        }
        Ok(logs)
    }
}

fn insert_triggers(tx: &Transaction<'_>, config_id: i64, triggers: &mut [WebhookTrigger]) -> Result<()> {
    for trigger in triggers.iter_mut() {
        trigger.webhook_config_id = config_id;
        tx.execute(
            "INSERT INTO webhook_triggers
             (webhook_config_id, trigger_type, trigger_value, match_type, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                config_id,
                trigger.trigger_type.as_str(),
                trigger.trigger_value,
                trigger.match_type.as_str(),
                trigger.enabled
            ],
        )?;
        trigger.id = tx.last_insert_rowid();
    }
    Ok(())
}

fn load_triggers(conn: &Connection, config_id: i64) -> Result<Vec<WebhookTrigger>> {
    let mut stmt = conn.prepare(
        "SELECT id, webhook_config_id, trigger_type, trigger_value, match_type, enabled
         FROM webhook_triggers WHERE webhook_config_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![config_id], row_to_trigger)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(StoreError::Sqlite)
}

fn row_to_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookConfig> {
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;
    let created_at = ts_from_sql(&created_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let updated_at = ts_from_sql(&updated_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(WebhookConfig {
        id: row.get(0)?,
        name: row.get(1)?,
        target_url: row.get(2)?,
        secret: row.get(3)?,
        enabled: row.get(4)?,
        created_at,
        updated_at,
        triggers: Vec::new(),
    })
}

fn row_to_trigger(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookTrigger> {
    let type_str: String = row.get(2)?;
    let match_str: String = row.get(4)?;

    let trigger_type = TriggerType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown trigger type '{type_str}'").into(),
        )
    })?;
    let match_type = MatchType::parse(&match_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown match type '{match_str}'").into(),
        )
    })?;

    Ok(WebhookTrigger {
        id: row.get(0)?,
        webhook_config_id: row.get(1)?,
        trigger_type,
        trigger_value: row.get(3)?,
        match_type,
        enabled: row.get(5)?,
    })
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookLog> {
    let delivered_str: Option<String> = row.get(10)?;
    let created_str: String = row.get(11)?;

    let delivered_at = delivered_str
        .map(|s| ts_from_sql(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let created_at = ts_from_sql(&created_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(WebhookLog {
        id: row.get(0)?,
        webhook_config_id: row.get(1)?,
        message_id: row.get(2)?,
        chat_address: row.get(3)?,
        trigger_type: row.get(4)?,
        trigger_value: row.get(5)?,
        payload: row.get(6)?,
        response_status: row.get(7)?,
        response_body: row.get(8)?,
        attempt_count: row.get(9)?,
        delivered_at,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_config(name: &str) -> WebhookConfig {
        WebhookConfig {
            id: 0,
            name: name.into(),
            target_url: "https://example.com/hook".into(),
            secret: Some("secret123".into()),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            triggers: vec![WebhookTrigger {
                id: 0,
                webhook_config_id: 0,
                trigger_type: TriggerType::Keyword,
                trigger_value: "test".into(),
                match_type: MatchType::Contains,
                enabled: true,
            }],
        }
    }

    fn sample_log(config_id: i64, attempt: u32) -> WebhookLog {
        WebhookLog {
            id: 0,
            webhook_config_id: config_id,
            message_id: "m1".into(),
            chat_address: "111@individual".into(),
            trigger_type: "keyword".into(),
            trigger_value: "test".into(),
            payload: "{}".into(),
            response_status: 500,
            response_body: "err".into(),
            attempt_count: attempt,
            delivered_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn store_assigns_ids() {
        let db = Database::open_in_memory().unwrap();
        let mut cfg = sample_config("hook");

        db.store_webhook_config(&mut cfg).unwrap();
        assert!(cfg.id > 0);
        assert!(cfg.triggers[0].id > 0);
        assert_eq!(cfg.triggers[0].webhook_config_id, cfg.id);
    }

    #[test]
    fn update_replaces_trigger_set() {
        let db = Database::open_in_memory().unwrap();
        let mut cfg = sample_config("hook");
        db.store_webhook_config(&mut cfg).unwrap();
        let id = cfg.id;

        cfg.name = "renamed".into();
        cfg.target_url = "https://example.com/v2".into();
        cfg.secret = Some("newsecret456".into());
        cfg.triggers = vec![
            WebhookTrigger {
                id: 0,
                webhook_config_id: 0,
                trigger_type: TriggerType::Keyword,
                trigger_value: "urgent".into(),
                match_type: MatchType::Contains,
                enabled: true,
            },
            WebhookTrigger {
                id: 0,
                webhook_config_id: 0,
                trigger_type: TriggerType::Sender,
                trigger_value: "123456@individual".into(),
                match_type: MatchType::Exact,
                enabled: true,
            },
        ];
        db.update_webhook_config(&mut cfg).unwrap();

        let updated = db.get_webhook_config(id).unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.secret.as_deref(), Some("newsecret456"));
        assert_eq!(updated.triggers.len(), 2);
        assert_eq!(updated.triggers[0].trigger_value, "urgent");
        assert_eq!(updated.triggers[1].trigger_type, TriggerType::Sender);
        for trigger in &updated.triggers {
            assert!(trigger.id > 0);
            assert_eq!(trigger.webhook_config_id, id);
        }
    }

    #[test]
    fn update_refreshes_updated_at_only() {
        let db = Database::open_in_memory().unwrap();
        let mut cfg = sample_config("hook");
        db.store_webhook_config(&mut cfg).unwrap();

        let before = db.get_webhook_config(cfg.id).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut same = before.clone();
        db.update_webhook_config(&mut same).unwrap();

        let after = db.get_webhook_config(cfg.id).unwrap();
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
        assert_eq!(after.triggers.len(), before.triggers.len());
        assert_eq!(after.name, before.name);
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let mut cfg = sample_config("hook");
        cfg.id = 424242;
        assert!(matches!(
            db.update_webhook_config(&mut cfg),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn delete_cascades_triggers_and_logs() {
        let db = Database::open_in_memory().unwrap();
        let mut cfg = sample_config("hook");
        db.store_webhook_config(&mut cfg).unwrap();
        db.store_webhook_log(&sample_log(cfg.id, 1)).unwrap();
        db.store_webhook_log(&sample_log(cfg.id, 2)).unwrap();

        db.delete_webhook_config(cfg.id).unwrap();

        assert!(matches!(
            db.get_webhook_config(cfg.id),
            Err(StoreError::NotFound)
        ));
        assert!(db.get_webhook_logs(cfg.id, 10).unwrap().is_empty());

        let conn = db.conn().unwrap();
        let orphans: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM webhook_triggers WHERE webhook_config_id = ?1",
                params![cfg.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn delete_unknown_id_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.delete_webhook_config(99),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn logs_filter_by_config_and_zero_means_all() {
        let db = Database::open_in_memory().unwrap();
        let mut a = sample_config("a");
        let mut b = sample_config("b");
        db.store_webhook_config(&mut a).unwrap();
        db.store_webhook_config(&mut b).unwrap();

        db.store_webhook_log(&sample_log(a.id, 1)).unwrap();
        db.store_webhook_log(&sample_log(b.id, 1)).unwrap();
        db.store_webhook_log(&sample_log(b.id, 2)).unwrap();

        assert_eq!(db.get_webhook_logs(a.id, 100).unwrap().len(), 1);
        assert_eq!(db.get_webhook_logs(b.id, 100).unwrap().len(), 2);
        assert_eq!(db.get_webhook_logs(0, 100).unwrap().len(), 3);
        assert_eq!(db.get_webhook_logs(0, 2).unwrap().len(), 2);
    }

    #[test]
    fn delivered_at_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let mut cfg = sample_config("hook");
        db.store_webhook_config(&mut cfg).unwrap();

        let mut log = sample_log(cfg.id, 4);
        log.response_status = 200;
        log.delivered_at = Some(Utc::now());
        db.store_webhook_log(&log).unwrap();

        let logs = db.get_webhook_logs(cfg.id, 10).unwrap();
        assert_eq!(logs[0].response_status, 200);
        assert!(logs[0].delivered_at.is_some());
    }
}
