//! Webhook configuration snapshot and trigger matching.
//!
//! The manager keeps an in-memory copy of the enabled configuration set,
//! rebuilt from the store on every CRUD mutation. Readers work against a
//! clone taken under the read lock, so a mutation publishes a whole new
//! snapshot and never a partially updated one.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, info, warn};

use tether_client::{IncomingMessage, MessageSink};
use tether_store::{Database, MatchType, TriggerType, WebhookConfig, WebhookTrigger};

use crate::delivery::{DeliveryService, TestOutcome};
use crate::error::Result;
use crate::payload::WebhookPayload;
use crate::validation;

pub struct WebhookManager {
    store: Arc<Database>,
    configs: RwLock<Vec<WebhookConfig>>,
    delivery: DeliveryService,
    download_url: String,
    skip_ssrf: bool,
}

impl WebhookManager {
    pub fn new(store: Arc<Database>, download_url: String, skip_ssrf: bool) -> Result<Self> {
        let delivery = DeliveryService::new(store.clone())?;
        Ok(Self {
            store,
            configs: RwLock::new(Vec::new()),
            delivery,
            download_url,
            skip_ssrf,
        })
    }

    /// Replace the snapshot with the current store contents. Called once
    /// at boot and after every configuration mutation.
    pub fn load(&self) -> Result<()> {
        let configs = self.store.list_webhook_configs()?;
        info!(count = configs.len(), "loaded webhook configurations");
        if let Ok(mut snapshot) = self.configs.write() {
            *snapshot = configs;
        }
        Ok(())
    }

    /// A copy of the current configuration snapshot.
    pub fn configs(&self) -> Vec<WebhookConfig> {
        self.configs
            .read()
            .map(|configs| configs.clone())
            .unwrap_or_default()
    }

    /// Validate a config against the shape rules and the SSRF filter.
    pub async fn validate(&self, config: &WebhookConfig) -> Result<()> {
        validation::validate_config(config, self.skip_ssrf).await
    }

    pub fn delivery(&self) -> &DeliveryService {
        &self.delivery
    }

    /// One-shot test delivery for an existing config.
    pub async fn test(&self, config: &WebhookConfig) -> Result<TestOutcome> {
        self.delivery.test(config).await
    }

    /// Enabled configs whose first enabled matching trigger fires for this
    /// message. Each config matches at most once.
    pub fn matching_configs(
        &self,
        message: &IncomingMessage,
    ) -> Vec<(WebhookConfig, WebhookTrigger)> {
        let content = message.content.body();
        let media_kind = message
            .content
            .media
            .as_ref()
            .map(|m| m.kind.to_string())
            .unwrap_or_default();

        let mut matched = Vec::new();
        for config in self.configs() {
            if !config.enabled {
                continue;
            }
            let hit = config
                .triggers
                .iter()
                .filter(|t| t.enabled)
                .find(|t| trigger_matches(t, message, content, &media_kind))
                .cloned();
            if let Some(trigger) = hit {
                matched.push((config, trigger));
            }
        }
        matched
    }

    /// Match the message against the snapshot and spawn one delivery task
    /// per matched config. Never blocks on the network.
    pub fn process_message(&self, message: &IncomingMessage, chat_name: &str) {
        let started = Instant::now();

        let matched = self.matching_configs(message);
        if matched.is_empty() {
            return;
        }
        debug!(
            message = %message.id,
            configs = matched.len(),
            "message matched webhook configs"
        );

        for (config, trigger) in matched {
            let payload = WebhookPayload::for_message(
                &config,
                &trigger,
                message,
                chat_name,
                &self.download_url,
                started.elapsed().as_millis() as i64,
            );
            let delivery = self.delivery.clone();
            let message_id = message.id.clone();
            let chat_address = message.chat.to_string();
            tokio::spawn(async move {
                delivery
                    .deliver(config, payload, trigger, message_id, chat_address)
                    .await;
            });
        }
    }
}

impl MessageSink for WebhookManager {
    fn on_message(&self, message: &IncomingMessage, chat_name: &str) {
        self.process_message(message, chat_name);
    }
}

fn trigger_matches(
    trigger: &WebhookTrigger,
    message: &IncomingMessage,
    content: &str,
    media_kind: &str,
) -> bool {
    match trigger.trigger_type {
        TriggerType::All => true,
        TriggerType::Chat => matches_string(
            &message.chat.to_string(),
            &trigger.trigger_value,
            trigger.match_type,
        ),
        TriggerType::Sender => {
            // Either the full address or the bare user part counts.
            matches_string(
                &message.sender.to_string(),
                &trigger.trigger_value,
                trigger.match_type,
            ) || matches_string(&message.sender.user, &trigger.trigger_value, trigger.match_type)
        }
        TriggerType::Keyword => matches_string(content, &trigger.trigger_value, trigger.match_type),
        TriggerType::MediaKind => {
            matches_string(media_kind, &trigger.trigger_value, trigger.match_type)
        }
    }
}

fn matches_string(text: &str, pattern: &str, match_type: MatchType) -> bool {
    match match_type {
        MatchType::Exact => text == pattern,
        MatchType::Contains => text.to_lowercase().contains(&pattern.to_lowercase()),
        MatchType::Regex => match regex::Regex::new(pattern) {
            Ok(re) => re.is_match(text),
            Err(e) => {
                // Validation compiles patterns at write time, so this
                // only fires for configs written before that rule.
                warn!(pattern = %pattern, error = %e, "invalid trigger regex");
                false
            }
        },
    }
}
