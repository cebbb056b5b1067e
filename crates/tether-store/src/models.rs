use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_shared::MediaKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub address: String,
    pub name: String,
    pub last_message_time: DateTime<Utc>,
}

/// Sender attribution for a stored message.
///
/// The platform does not always preserve the original sender of
/// backfilled group messages; that case is stored as [`Unknown`]
/// instead of being attributed to the group address.
///
/// [`Unknown`]: MessageSender::Unknown
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MessageSender {
    Known(String),
    #[default]
    Unknown,
}

impl MessageSender {
    pub fn known(address: impl Into<String>) -> Self {
        MessageSender::Known(address.into())
    }

    /// The rendered sender address, when the platform preserved one.
    pub fn as_known(&self) -> Option<&str> {
        match self {
            MessageSender::Known(address) => Some(address),
            MessageSender::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, MessageSender::Unknown)
    }
}

impl std::fmt::Display for MessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_known().unwrap_or("unknown"))
    }
}

/// A persisted chat message. Identity is `(id, chat_address)` -- the
/// platform reuses message ids across chats.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredMessage {
    pub id: String,
    pub chat_address: String,
    pub sender: MessageSender,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub media_type: Option<MediaKind>,
    pub filename: Option<String>,
    pub url: Option<String>,
    pub media_key: Option<Vec<u8>>,
    pub file_sha256: Option<Vec<u8>>,
    pub file_enc_sha256: Option<Vec<u8>>,
    pub file_length: Option<u64>,
}

impl StoredMessage {
    /// A message with neither text nor media carries nothing worth
    /// persisting.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.media_type.is_none()
    }
}

/// What a trigger compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    All,
    Chat,
    Sender,
    Keyword,
    MediaKind,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::All => "all",
            TriggerType::Chat => "chat",
            TriggerType::Sender => "sender",
            TriggerType::Keyword => "keyword",
            TriggerType::MediaKind => "media_kind",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(TriggerType::All),
            "chat" => Some(TriggerType::Chat),
            "sender" => Some(TriggerType::Sender),
            "keyword" => Some(TriggerType::Keyword),
            "media_kind" => Some(TriggerType::MediaKind),
            _ => None,
        }
    }
}

/// How a trigger value is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Contains,
    Regex,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Contains => "contains",
            MatchType::Regex => "regex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(MatchType::Exact),
            "contains" => Some(MatchType::Contains),
            "regex" => Some(MatchType::Regex),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTrigger {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub webhook_config_id: i64,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_value: String,
    pub match_type: MatchType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub id: i64,
    pub name: String,
    pub target_url: String,
    pub secret: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub triggers: Vec<WebhookTrigger>,
}

impl WebhookConfig {
    /// Masked form of the secret for API responses. The plain secret never
    /// leaves the store through the public surface.
    pub fn secret_hint(&self) -> Option<String> {
        let secret = self.secret.as_deref()?;
        if secret.is_empty() {
            return None;
        }
        if secret.len() <= 8 {
            return Some("****".to_string());
        }
        Some(format!(
            "{}****{}",
            &secret[..4],
            &secret[secret.len() - 4..]
        ))
    }
}

/// One webhook delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookLog {
    pub id: i64,
    pub webhook_config_id: i64,
    pub message_id: String,
    pub chat_address: String,
    pub trigger_type: String,
    pub trigger_value: String,
    pub payload: String,
    pub response_status: u16,
    pub response_body: String,
    pub attempt_count: u32,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
