//! The seam to the platform's client library.
//!
//! The encrypted wire protocol, session store and crypto all live behind
//! this trait; the bridge only sees an event stream and a send API. A
//! production deployment injects a vendor binding in the composition
//! root. [`ChannelPlatform`] is the in-memory implementation used by the
//! integration tests and as a stand-in driver when no binding is wired.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use tether_shared::{ChatAddress, MediaKind};

use crate::events::PlatformEvent;

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("not connected")]
    NotConnected,

    #[error("no linked device")]
    NotPaired,

    #[error("rejected by platform: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of uploading an encrypted media blob to the platform's CDN.
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

/// Duration and synthetic waveform attached to outgoing voice notes.
#[derive(Debug, Clone)]
pub struct VoiceNote {
    pub duration_secs: u32,
    pub waveform: [u8; 64],
}

#[derive(Debug, Clone)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub mime_type: String,
    pub caption: String,
    pub filename: Option<String>,
    pub uploaded: UploadedMedia,
    pub voice_note: Option<VoiceNote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Typing,
    Paused,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlocklistAction {
    Block,
    Unblock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantChange {
    Add,
    Remove,
    Promote,
    Demote,
}

#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub address: ChatAddress,
    pub name: String,
}

/// QR pairing feed for a device without stored credentials.
#[derive(Debug, Clone)]
pub enum QrEvent {
    Code(String),
    Success,
}

/// Who sent the anchor message of an on-demand history request. The
/// platform does not always preserve the original sender of old group
/// messages; that case stays distinguishable instead of being silently
/// replaced by the group address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistorySender {
    Me,
    Known(ChatAddress),
    Unknown,
}

#[derive(Debug, Clone)]
pub struct HistoryAnchor {
    pub chat: ChatAddress,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub sender: HistorySender,
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn connect(&self) -> Result<(), PlatformError>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;
    /// The linked device identity; `None` until pairing completes.
    fn device_id(&self) -> Option<ChatAddress>;
    /// One-shot handover of the event stream. Returns `None` after the
    /// first call.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<PlatformEvent>>;
    /// One-shot handover of the QR pairing feed.
    fn qr_events(&self) -> Option<mpsc::UnboundedReceiver<QrEvent>>;

    async fn send_text(&self, to: &ChatAddress, text: &str) -> Result<SendReceipt, PlatformError>;
    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadedMedia, PlatformError>;
    async fn send_media(
        &self,
        to: &ChatAddress,
        media: OutgoingMedia,
    ) -> Result<SendReceipt, PlatformError>;
    async fn send_reaction(
        &self,
        chat: &ChatAddress,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), PlatformError>;
    async fn send_edit(
        &self,
        chat: &ChatAddress,
        message_id: &str,
        new_text: &str,
    ) -> Result<(), PlatformError>;
    async fn send_revoke(
        &self,
        chat: &ChatAddress,
        message_id: &str,
        sender: Option<&ChatAddress>,
    ) -> Result<(), PlatformError>;
    async fn send_poll(
        &self,
        chat: &ChatAddress,
        question: &str,
        options: &[String],
        selectable_count: usize,
    ) -> Result<SendReceipt, PlatformError>;
    async fn mark_read(
        &self,
        chat: &ChatAddress,
        message_ids: &[String],
        sender: Option<&ChatAddress>,
    ) -> Result<(), PlatformError>;
    async fn set_presence(&self, presence: Presence) -> Result<(), PlatformError>;
    async fn set_chat_state(
        &self,
        chat: &ChatAddress,
        state: ChatState,
    ) -> Result<(), PlatformError>;
    async fn update_blocklist(
        &self,
        user: &ChatAddress,
        action: BlocklistAction,
    ) -> Result<(), PlatformError>;
    async fn follow_newsletter(&self, address: &ChatAddress) -> Result<(), PlatformError>;

    async fn create_group(
        &self,
        name: &str,
        participants: &[ChatAddress],
    ) -> Result<GroupInfo, PlatformError>;
    async fn update_group_participants(
        &self,
        group: &ChatAddress,
        participants: &[ChatAddress],
        change: ParticipantChange,
    ) -> Result<(), PlatformError>;
    async fn leave_group(&self, group: &ChatAddress) -> Result<(), PlatformError>;
    async fn set_group_name(&self, group: &ChatAddress, name: &str) -> Result<(), PlatformError>;
    async fn set_group_topic(&self, group: &ChatAddress, topic: &str) -> Result<(), PlatformError>;
    async fn group_info(&self, group: &ChatAddress) -> Result<GroupInfo, PlatformError>;

    async fn contact_display_name(&self, user: &ChatAddress) -> Option<String>;

    /// Request an 8-character pairing code for the given phone number.
    async fn pair_phone(&self, phone_number: &str) -> Result<String, PlatformError>;
    /// Ask the primary device for messages older than the anchor. The
    /// result arrives asynchronously as a [`PlatformEvent::HistorySync`].
    async fn request_history(
        &self,
        anchor: &HistoryAnchor,
        count: usize,
    ) -> Result<(), PlatformError>;
}

/// What a [`ChannelPlatform`] recorded for one outbound operation.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text {
        to: ChatAddress,
        text: String,
    },
    Media {
        to: ChatAddress,
        kind: MediaKind,
        caption: String,
        voice_note: Option<VoiceNote>,
    },
    Reaction {
        chat: ChatAddress,
        message_id: String,
        emoji: String,
    },
    Edit {
        chat: ChatAddress,
        message_id: String,
        new_text: String,
    },
    Revoke {
        chat: ChatAddress,
        message_id: String,
    },
    Poll {
        chat: ChatAddress,
        question: String,
        options: Vec<String>,
        selectable_count: usize,
    },
    Read {
        chat: ChatAddress,
        message_ids: Vec<String>,
    },
    Presence(Presence),
    ChatState {
        chat: ChatAddress,
        state: ChatState,
    },
    HistoryRequest {
        anchor: HistoryAnchor,
        count: usize,
    },
}

/// In-memory platform used by tests and as the default driver when no
/// vendor binding is injected. Events are fed in with
/// [`ChannelPlatform::inject_event`]; outbound operations are recorded
/// and can be inspected with [`ChannelPlatform::outbound`].
pub struct ChannelPlatform {
    connected: AtomicBool,
    device: Mutex<Option<ChatAddress>>,
    events_tx: mpsc::UnboundedSender<PlatformEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PlatformEvent>>>,
    qr_tx: mpsc::UnboundedSender<QrEvent>,
    qr_rx: Mutex<Option<mpsc::UnboundedReceiver<QrEvent>>>,
    contacts: Mutex<HashMap<String, String>>,
    groups: Mutex<HashMap<String, String>>,
    outbound: Mutex<Vec<Outbound>>,
    next_id: AtomicU64,
    fail_sends: AtomicBool,
}

impl ChannelPlatform {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (qr_tx, qr_rx) = mpsc::unbounded_channel();
        Self {
            connected: AtomicBool::new(false),
            device: Mutex::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            qr_tx,
            qr_rx: Mutex::new(Some(qr_rx)),
            contacts: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            outbound: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn with_device(device: ChatAddress) -> Self {
        let platform = Self::new();
        *lock(&platform.device) = Some(device);
        platform
    }

    pub fn inject_event(&self, event: PlatformEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn inject_qr(&self, event: QrEvent) {
        let _ = self.qr_tx.send(event);
    }

    pub fn add_contact(&self, address: &ChatAddress, full_name: &str) {
        lock(&self.contacts)
            .insert(address.to_string(), full_name.to_string());
    }

    pub fn add_group(&self, address: &ChatAddress, name: &str) {
        lock(&self.groups)
            .insert(address.to_string(), name.to_string());
    }

    pub fn set_paired(&self, device: ChatAddress) {
        *lock(&self.device) = Some(device);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn outbound(&self) -> Vec<Outbound> {
        lock(&self.outbound).clone()
    }

    fn record(&self, op: Outbound) -> Result<(), PlatformError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PlatformError::Rejected("send disabled".into()));
        }
        lock(&self.outbound).push(op);
        Ok(())
    }

    fn receipt(&self) -> SendReceipt {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        SendReceipt {
            message_id: format!("sent-{n:04}"),
            timestamp: Utc::now(),
        }
    }
}

/// Locks that only guard test/driver bookkeeping recover from poisoning
/// instead of propagating it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Default for ChannelPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for ChannelPlatform {
    async fn connect(&self) -> Result<(), PlatformError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn device_id(&self) -> Option<ChatAddress> {
        lock(&self.device).clone()
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<PlatformEvent>> {
        lock(&self.events_rx).take()
    }

    fn qr_events(&self) -> Option<mpsc::UnboundedReceiver<QrEvent>> {
        lock(&self.qr_rx).take()
    }

    async fn send_text(&self, to: &ChatAddress, text: &str) -> Result<SendReceipt, PlatformError> {
        self.record(Outbound::Text {
            to: to.clone(),
            text: text.to_string(),
        })?;
        Ok(self.receipt())
    }

    async fn upload(&self, data: &[u8], _kind: MediaKind) -> Result<UploadedMedia, PlatformError> {
        Ok(UploadedMedia {
            url: "https://cdn.invalid/upload".into(),
            direct_path: "/upload".into(),
            media_key: vec![0x11; 32],
            file_sha256: vec![0x22; 32],
            file_enc_sha256: vec![0x33; 32],
            file_length: data.len() as u64,
        })
    }

    async fn send_media(
        &self,
        to: &ChatAddress,
        media: OutgoingMedia,
    ) -> Result<SendReceipt, PlatformError> {
        self.record(Outbound::Media {
            to: to.clone(),
            kind: media.kind,
            caption: media.caption,
            voice_note: media.voice_note,
        })?;
        Ok(self.receipt())
    }

    async fn send_reaction(
        &self,
        chat: &ChatAddress,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        self.record(Outbound::Reaction {
            chat: chat.clone(),
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
        })
    }

    async fn send_edit(
        &self,
        chat: &ChatAddress,
        message_id: &str,
        new_text: &str,
    ) -> Result<(), PlatformError> {
        self.record(Outbound::Edit {
            chat: chat.clone(),
            message_id: message_id.to_string(),
            new_text: new_text.to_string(),
        })
    }

    async fn send_revoke(
        &self,
        chat: &ChatAddress,
        message_id: &str,
        _sender: Option<&ChatAddress>,
    ) -> Result<(), PlatformError> {
        self.record(Outbound::Revoke {
            chat: chat.clone(),
            message_id: message_id.to_string(),
        })
    }

    async fn send_poll(
        &self,
        chat: &ChatAddress,
        question: &str,
        options: &[String],
        selectable_count: usize,
    ) -> Result<SendReceipt, PlatformError> {
        self.record(Outbound::Poll {
            chat: chat.clone(),
            question: question.to_string(),
            options: options.to_vec(),
            selectable_count,
        })?;
        Ok(self.receipt())
    }

    async fn mark_read(
        &self,
        chat: &ChatAddress,
        message_ids: &[String],
        _sender: Option<&ChatAddress>,
    ) -> Result<(), PlatformError> {
        self.record(Outbound::Read {
            chat: chat.clone(),
            message_ids: message_ids.to_vec(),
        })
    }

    async fn set_presence(&self, presence: Presence) -> Result<(), PlatformError> {
        self.record(Outbound::Presence(presence))
    }

    async fn set_chat_state(
        &self,
        chat: &ChatAddress,
        state: ChatState,
    ) -> Result<(), PlatformError> {
        self.record(Outbound::ChatState {
            chat: chat.clone(),
            state,
        })
    }

    async fn update_blocklist(
        &self,
        _user: &ChatAddress,
        _action: BlocklistAction,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn follow_newsletter(&self, _address: &ChatAddress) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn create_group(
        &self,
        name: &str,
        _participants: &[ChatAddress],
    ) -> Result<GroupInfo, PlatformError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let address = ChatAddress::new(format!("g{n}"), tether_shared::AddressServer::Group);
        self.add_group(&address, name);
        Ok(GroupInfo {
            address,
            name: name.to_string(),
        })
    }

    async fn update_group_participants(
        &self,
        _group: &ChatAddress,
        _participants: &[ChatAddress],
        _change: ParticipantChange,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn leave_group(&self, _group: &ChatAddress) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn set_group_name(&self, group: &ChatAddress, name: &str) -> Result<(), PlatformError> {
        self.add_group(group, name);
        Ok(())
    }

    async fn set_group_topic(&self, _group: &ChatAddress, _topic: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn group_info(&self, group: &ChatAddress) -> Result<GroupInfo, PlatformError> {
        let groups = lock(&self.groups);
        match groups.get(&group.to_string()) {
            Some(name) => Ok(GroupInfo {
                address: group.clone(),
                name: name.clone(),
            }),
            None => Err(PlatformError::Rejected("unknown group".into())),
        }
    }

    async fn contact_display_name(&self, user: &ChatAddress) -> Option<String> {
        lock(&self.contacts).get(&user.to_string()).cloned()
    }

    async fn pair_phone(&self, _phone_number: &str) -> Result<String, PlatformError> {
        if !self.is_connected() {
            return Err(PlatformError::NotConnected);
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{n:08}"))
    }

    async fn request_history(
        &self,
        anchor: &HistoryAnchor,
        count: usize,
    ) -> Result<(), PlatformError> {
        self.record(Outbound::HistoryRequest {
            anchor: anchor.clone(),
            count,
        })
    }
}
