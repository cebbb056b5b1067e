//! Events emitted by the platform library, normalized for the bridge.
//!
//! The platform binding translates its own wire-level events into
//! [`PlatformEvent`] values; everything downstream (ingestion, webhook
//! matching) works on these types only.

use chrono::{DateTime, Utc};
use tether_shared::{ChatAddress, MediaKind};

#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// A live message, delivered while connected.
    Message(IncomingMessage),
    /// A bulk history backfill (at link time or on demand).
    HistorySync(HistorySync),
    Connected,
    Disconnected,
    LoggedOut,
    PairSuccess,
    PairError { reason: String },
    KeepAliveTimeout { error_count: u32 },
    StreamError { code: String },
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: String,
    pub chat: ChatAddress,
    pub sender: ChatAddress,
    /// Self-assigned display name carried on the wire, may be empty.
    pub push_name: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub content: MessageContent,
}

/// Raw content variants as the platform presents them. A message carries
/// at most one text variant and at most one recognized media variant.
#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    pub text: Option<String>,
    pub extended_text: Option<String>,
    pub media: Option<MediaPayload>,
}

impl MessageContent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// The textual content: the plain variant wins over the extended one.
    /// Non-text variants yield the empty string.
    pub fn body(&self) -> &str {
        if let Some(text) = self.text.as_deref() {
            if !text.is_empty() {
                return text;
            }
        }
        self.extended_text.as_deref().unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.body().is_empty() && self.media.is_none()
    }
}

/// Media attachment fields the platform exposes on inbound messages.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub kind: MediaKind,
    /// Only documents usually carry a real filename.
    pub filename: Option<String>,
    pub url: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

impl MediaPayload {
    /// The filename to persist: the carried one, or a synthetic
    /// `<kind>_<YYYYMMDD_HHMMSS>.<ext>` derived from the message time.
    pub fn resolved_filename(&self, at: DateTime<Utc>) -> String {
        if let Some(name) = self.filename.as_deref() {
            if !name.is_empty() {
                return name.to_string();
            }
        }
        let stamp = at.format("%Y%m%d_%H%M%S");
        match self.kind.synthetic_extension() {
            Some(ext) => format!("{}_{}.{}", self.kind, stamp, ext),
            None => format!("{}_{}", self.kind, stamp),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistorySync {
    pub conversations: Vec<HistoryConversation>,
}

/// One conversation from a history backfill. The platform's conversation
/// object is vendor-defined; this adapter pins down the two optional name
/// fields the bridge cares about.
#[derive(Debug, Clone)]
pub struct HistoryConversation {
    /// Raw chat address as sent by the platform.
    pub id: String,
    display_name: Option<String>,
    name: Option<String>,
    pub messages: Vec<HistoryMessage>,
}

impl HistoryConversation {
    pub fn new(
        id: impl Into<String>,
        display_name: Option<String>,
        name: Option<String>,
        messages: Vec<HistoryMessage>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name,
            name,
            messages,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref().filter(|s| !s.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub id: String,
    /// Absent on some backfilled messages; those are skipped.
    pub timestamp: Option<DateTime<Utc>>,
    pub is_from_me: bool,
    /// Original sender address for group conversations; `None` when the
    /// platform did not preserve it.
    pub participant: Option<String>,
    pub content: MessageContent,
}
