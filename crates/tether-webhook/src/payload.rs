//! The JSON document POSTed to webhook targets.

use chrono::Utc;
use serde::Serialize;

use tether_client::IncomingMessage;
use tether_store::{WebhookConfig, WebhookTrigger};

pub const EVENT_MESSAGE_RECEIVED: &str = "message_received";
pub const EVENT_TEST: &str = "test";

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub event_type: String,
    pub timestamp: String,
    pub webhook_config: ConfigInfo,
    pub trigger: TriggerInfo,
    pub message: MessageInfo,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigInfo {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerInfo {
    #[serde(rename = "type")]
    pub trigger_type: String,
    pub value: String,
    pub match_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageInfo {
    pub id: String,
    pub chat_address: String,
    pub chat_name: String,
    pub sender: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    pub is_from_me: bool,
    pub media_type: String,
    pub filename: String,
    pub media_download_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_info: Option<GroupMeta>,
    pub delivery_attempt: u32,
    pub processing_time_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMeta {
    pub is_group: bool,
    pub group_name: String,
    pub participant_count: u32,
}

impl WebhookPayload {
    /// Assemble the payload for one (config, message) pair.
    ///
    /// `download_base` is the caller-resolvable endpoint where the media
    /// referenced by the message can be fetched; it is only embedded for
    /// media messages.
    pub fn for_message(
        config: &WebhookConfig,
        trigger: &WebhookTrigger,
        message: &IncomingMessage,
        chat_name: &str,
        download_base: &str,
        processing_time_ms: i64,
    ) -> Self {
        let media = message.content.media.as_ref();
        let media_type = media.map(|m| m.kind.to_string()).unwrap_or_default();
        let filename = media
            .map(|m| m.resolved_filename(message.timestamp))
            .unwrap_or_default();
        let media_download_url = if media.is_some() {
            download_base.to_string()
        } else {
            String::new()
        };

        let group_info = message.chat.is_group().then(|| GroupMeta {
            is_group: true,
            group_name: chat_name.to_string(),
            participant_count: 0,
        });

        Self {
            event_type: EVENT_MESSAGE_RECEIVED.to_string(),
            timestamp: message.timestamp.to_rfc3339(),
            webhook_config: ConfigInfo {
                id: config.id,
                name: config.name.clone(),
            },
            trigger: TriggerInfo {
                trigger_type: trigger.trigger_type.as_str().to_string(),
                value: trigger.trigger_value.clone(),
                match_type: trigger.match_type.as_str().to_string(),
            },
            message: MessageInfo {
                id: message.id.clone(),
                chat_address: message.chat.to_string(),
                chat_name: chat_name.to_string(),
                sender: message.sender.to_string(),
                sender_name: if message.push_name.is_empty() {
                    message.sender.user.clone()
                } else {
                    message.push_name.clone()
                },
                content: message.content.body().to_string(),
                timestamp: message.timestamp.to_rfc3339(),
                push_name: (!message.push_name.is_empty()).then(|| message.push_name.clone()),
                is_from_me: message.is_from_me,
                media_type,
                filename,
                media_download_url,
            },
            metadata: Metadata {
                group_info,
                delivery_attempt: 1,
                processing_time_ms,
            },
        }
    }

    /// Synthetic payload used by operator-initiated connectivity tests.
    pub fn for_test(config: &WebhookConfig) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            event_type: EVENT_TEST.to_string(),
            timestamp: now.clone(),
            webhook_config: ConfigInfo {
                id: config.id,
                name: config.name.clone(),
            },
            trigger: TriggerInfo {
                trigger_type: String::new(),
                value: String::new(),
                match_type: String::new(),
            },
            message: MessageInfo {
                id: "test-message-id".to_string(),
                chat_address: "test@individual".to_string(),
                chat_name: "Test Chat".to_string(),
                sender: "test".to_string(),
                sender_name: "Test User".to_string(),
                content: "This is a test message".to_string(),
                timestamp: now,
                push_name: None,
                is_from_me: false,
                media_type: String::new(),
                filename: String::new(),
                media_download_url: String::new(),
            },
            metadata: Metadata {
                group_info: None,
                delivery_attempt: 1,
                processing_time_ms: 0,
            },
        }
    }
}
