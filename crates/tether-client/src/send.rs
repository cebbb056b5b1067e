//! Outbound operations.
//!
//! Every operation validates the session, parses address strings and
//! delegates to the platform with a fresh context -- caller cancellation
//! is deliberately not propagated into the platform library, since
//! aborting a send mid-flight would leave session state ambiguous.

use chrono::{DateTime, Utc};
use tracing::warn;

use tether_shared::{ChatAddress, MediaKind};
use tether_store::{Database, MessageSender, StoredMessage};

use crate::audio;
use crate::client::BridgeClient;
use crate::error::{ClientError, Result};
use crate::media_guard;
use crate::platform::{
    BlocklistAction, ChatState, GroupInfo, HistoryAnchor, HistorySender, OutgoingMedia,
    ParticipantChange, Presence, VoiceNote,
};

/// Recommended page size for on-demand history requests.
const HISTORY_REQUEST_MAX: usize = 50;

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub recipient: ChatAddress,
}

impl BridgeClient {
    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Recipients may be full addresses or a bare user id, which is
    /// shorthand for a direct chat.
    pub fn parse_recipient(recipient: &str) -> Result<ChatAddress> {
        if recipient.contains('@') {
            Ok(ChatAddress::parse(recipient)?)
        } else if recipient.is_empty() {
            Err(ClientError::Invalid("recipient is required".into()))
        } else {
            Ok(ChatAddress::individual(recipient))
        }
    }

    /// Send a text or media message and persist our own copy.
    pub async fn send_message(
        &self,
        store: &Database,
        recipient: &str,
        text: &str,
        media_path: Option<&str>,
    ) -> Result<SendOutcome> {
        self.ensure_connected()?;
        let to = Self::parse_recipient(recipient)?;

        let (receipt, media_kind, filename) = match media_path {
            Some(path) if !path.is_empty() => {
                let media = self.build_outgoing_media(path, text).await?;
                let kind = media.kind;
                let filename = media.filename.clone();
                let receipt = self.platform().send_media(&to, media).await?;
                (receipt, Some(kind), filename)
            }
            _ => {
                let receipt = self.platform().send_text(&to, text).await?;
                (receipt, None, None)
            }
        };

        if let Some(device) = self.device_id() {
            let own = StoredMessage {
                id: receipt.message_id.clone(),
                chat_address: to.to_string(),
                sender: MessageSender::known(device.to_string()),
                sender_name: device.user.clone(),
                content: text.to_string(),
                timestamp: receipt.timestamp,
                is_from_me: true,
                media_type: media_kind,
                filename,
                ..Default::default()
            };
            if let Err(e) = store.store_chat(&to.to_string(), "", receipt.timestamp) {
                warn!(error = %e, "failed to store chat for own message");
            }
            if let Err(e) = store.store_message(&own) {
                warn!(error = %e, "failed to store own message");
            }
        }

        Ok(SendOutcome {
            message_id: receipt.message_id,
            timestamp: receipt.timestamp,
            recipient: to,
        })
    }

    async fn build_outgoing_media(&self, path: &str, caption: &str) -> Result<OutgoingMedia> {
        let checked =
            media_guard::validate_media_path(path, self.options().path_check_disabled)?;
        let data = tokio::fs::read(&checked).await?;

        let extension = checked
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let (kind, mime_type) = media_kind_for_extension(&extension);

        let voice_note = if kind == MediaKind::Audio && mime_type.contains("ogg") {
            let (duration_secs, waveform) = audio::analyze_ogg_opus(&data)?;
            Some(VoiceNote {
                duration_secs,
                waveform,
            })
        } else {
            None
        };

        let filename = match kind {
            MediaKind::Document => checked
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.to_string()),
            _ => None,
        };

        let uploaded = self.platform().upload(&data, kind).await?;

        Ok(OutgoingMedia {
            kind,
            mime_type: mime_type.to_string(),
            caption: caption.to_string(),
            filename,
            uploaded,
            voice_note,
        })
    }

    pub async fn send_reaction(&self, chat: &str, message_id: &str, emoji: &str) -> Result<()> {
        self.ensure_connected()?;
        let chat = ChatAddress::parse(chat)?;
        self.platform()
            .send_reaction(&chat, message_id, emoji)
            .await?;
        Ok(())
    }

    pub async fn edit_message(&self, chat: &str, message_id: &str, new_text: &str) -> Result<()> {
        self.ensure_connected()?;
        let chat = ChatAddress::parse(chat)?;
        self.platform().send_edit(&chat, message_id, new_text).await?;
        Ok(())
    }

    /// Revoke a message. `sender` is only needed when an admin revokes
    /// someone else's group message.
    pub async fn revoke_message(
        &self,
        chat: &str,
        message_id: &str,
        sender: Option<&str>,
    ) -> Result<()> {
        self.ensure_connected()?;
        let chat = ChatAddress::parse(chat)?;
        let sender = sender.map(ChatAddress::parse).transpose()?;
        self.platform()
            .send_revoke(&chat, message_id, sender.as_ref())
            .await?;
        Ok(())
    }

    pub async fn create_poll(
        &self,
        chat: &str,
        question: &str,
        options: Vec<String>,
        multi_select: bool,
    ) -> Result<SendOutcome> {
        self.ensure_connected()?;
        let chat = ChatAddress::parse(chat)?;
        if question.is_empty() || options.len() < 2 {
            return Err(ClientError::Invalid(
                "a poll needs a question and at least two options".into(),
            ));
        }
        let selectable_count = if multi_select { options.len() } else { 1 };
        let receipt = self
            .platform()
            .send_poll(&chat, question, &options, selectable_count)
            .await?;
        Ok(SendOutcome {
            message_id: receipt.message_id,
            timestamp: receipt.timestamp,
            recipient: chat,
        })
    }

    pub async fn mark_read(
        &self,
        chat: &str,
        message_ids: &[String],
        sender: Option<&str>,
    ) -> Result<()> {
        self.ensure_connected()?;
        let chat = ChatAddress::parse(chat)?;
        let sender = sender.map(ChatAddress::parse).transpose()?;
        self.platform()
            .mark_read(&chat, message_ids, sender.as_ref())
            .await?;
        Ok(())
    }

    pub async fn set_presence(&self, presence: &str) -> Result<()> {
        self.ensure_connected()?;
        let presence = match presence {
            "available" => Presence::Available,
            "unavailable" => Presence::Unavailable,
            other => {
                return Err(ClientError::Invalid(format!(
                    "invalid presence '{other}' (must be 'available' or 'unavailable')"
                )))
            }
        };
        self.platform().set_presence(presence).await?;
        Ok(())
    }

    pub async fn set_chat_state(&self, chat: &str, state: &str) -> Result<()> {
        self.ensure_connected()?;
        let chat = ChatAddress::parse(chat)?;
        let state = match state {
            "typing" => ChatState::Typing,
            "paused" => ChatState::Paused,
            "recording" => ChatState::Recording,
            other => {
                return Err(ClientError::Invalid(format!(
                    "invalid state '{other}' (must be 'typing', 'paused' or 'recording')"
                )))
            }
        };
        self.platform().set_chat_state(&chat, state).await?;
        Ok(())
    }

    pub async fn update_blocklist(&self, user: &str, action: &str) -> Result<()> {
        self.ensure_connected()?;
        let user = ChatAddress::parse(user)?;
        let action = match action {
            "block" => BlocklistAction::Block,
            "unblock" => BlocklistAction::Unblock,
            other => {
                return Err(ClientError::Invalid(format!(
                    "invalid action '{other}' (must be 'block' or 'unblock')"
                )))
            }
        };
        self.platform().update_blocklist(&user, action).await?;
        Ok(())
    }

    pub async fn follow_newsletter(&self, address: &str) -> Result<()> {
        self.ensure_connected()?;
        let address = ChatAddress::parse(address)?;
        self.platform().follow_newsletter(&address).await?;
        Ok(())
    }

    pub async fn create_group(&self, name: &str, participants: &[String]) -> Result<GroupInfo> {
        self.ensure_connected()?;
        let participants = parse_addresses(participants)?;
        Ok(self.platform().create_group(name, &participants).await?)
    }

    pub async fn update_group_participants(
        &self,
        group: &str,
        participants: &[String],
        change: &str,
    ) -> Result<()> {
        self.ensure_connected()?;
        let group = ChatAddress::parse(group)?;
        let participants = parse_addresses(participants)?;
        let change = match change {
            "add" => ParticipantChange::Add,
            "remove" => ParticipantChange::Remove,
            "promote" => ParticipantChange::Promote,
            "demote" => ParticipantChange::Demote,
            other => {
                return Err(ClientError::Invalid(format!(
                    "invalid change '{other}' (must be 'add', 'remove', 'promote' or 'demote')"
                )))
            }
        };
        self.platform()
            .update_group_participants(&group, &participants, change)
            .await?;
        Ok(())
    }

    pub async fn leave_group(&self, group: &str) -> Result<()> {
        self.ensure_connected()?;
        let group = ChatAddress::parse(group)?;
        self.platform().leave_group(&group).await?;
        Ok(())
    }

    pub async fn update_group(
        &self,
        group: &str,
        name: Option<&str>,
        topic: Option<&str>,
    ) -> Result<()> {
        self.ensure_connected()?;
        let group = ChatAddress::parse(group)?;
        if name.is_none() && topic.is_none() {
            return Err(ClientError::Invalid("nothing to update".into()));
        }
        if let Some(name) = name {
            self.platform().set_group_name(&group, name).await?;
        }
        if let Some(topic) = topic {
            self.platform().set_group_topic(&group, topic).await?;
        }
        Ok(())
    }

    pub async fn group_info(&self, group: &str) -> Result<GroupInfo> {
        self.ensure_connected()?;
        let group = ChatAddress::parse(group)?;
        Ok(self.platform().group_info(&group).await?)
    }

    /// Ask the primary device for messages older than the given anchor.
    /// The backfill arrives later as a history-sync event.
    #[allow(clippy::too_many_arguments)]
    pub async fn request_chat_history(
        &self,
        chat: &str,
        oldest_message_id: &str,
        oldest_from_me: bool,
        oldest_timestamp_millis: i64,
        oldest_sender: Option<&str>,
        count: usize,
    ) -> Result<()> {
        self.ensure_connected()?;
        let chat = ChatAddress::parse(chat)?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(oldest_timestamp_millis)
            .ok_or_else(|| ClientError::Invalid("invalid anchor timestamp".into()))?;

        // The original sender of an old group message is not always known;
        // that stays an explicit case for the platform binding to resolve.
        let sender = if oldest_from_me {
            HistorySender::Me
        } else {
            match oldest_sender {
                Some(raw) => HistorySender::Known(ChatAddress::parse(raw)?),
                None if chat.is_group() => HistorySender::Unknown,
                None => HistorySender::Known(chat.clone()),
            }
        };

        let count = if count == 0 || count > HISTORY_REQUEST_MAX {
            HISTORY_REQUEST_MAX
        } else {
            count
        };

        let anchor = HistoryAnchor {
            chat,
            message_id: oldest_message_id.to_string(),
            timestamp,
            sender,
        };
        self.platform().request_history(&anchor, count).await?;
        Ok(())
    }
}

fn parse_addresses(raw: &[String]) -> Result<Vec<ChatAddress>> {
    raw.iter()
        .map(|r| ChatAddress::parse(r).map_err(ClientError::from))
        .collect()
}

fn media_kind_for_extension(extension: &str) -> (MediaKind, &'static str) {
    match extension {
        "jpg" | "jpeg" => (MediaKind::Image, "image/jpeg"),
        "png" => (MediaKind::Image, "image/png"),
        "gif" => (MediaKind::Image, "image/gif"),
        "webp" => (MediaKind::Image, "image/webp"),
        "ogg" => (MediaKind::Audio, "audio/ogg; codecs=opus"),
        "mp4" => (MediaKind::Video, "video/mp4"),
        "avi" => (MediaKind::Video, "video/avi"),
        "mov" => (MediaKind::Video, "video/quicktime"),
        _ => (MediaKind::Document, "application/octet-stream"),
    }
}
