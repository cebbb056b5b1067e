//! Platform event ingestion.
//!
//! Consumes the platform's event stream, normalizes live and backfilled
//! messages, writes them through the store and hands live messages to an
//! optional subscriber. The subscriber is a single-method trait so that
//! the webhook engine can be wired in at construction time without this
//! crate depending on it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tether_shared::ChatAddress;
use tether_store::{Database, MessageSender, StoredMessage};

use crate::client::BridgeClient;
use crate::events::{HistoryConversation, HistorySync, IncomingMessage, PlatformEvent};

/// Keep-alive timeouts tolerated before the connection is recycled.
const KEEPALIVE_TIMEOUT_LIMIT: u32 = 3;

/// Receiver of live messages after they have been persisted.
///
/// Implementations must not block: delivery work is expected to be
/// spawned onto the runtime.
pub trait MessageSink: Send + Sync {
    fn on_message(&self, message: &IncomingMessage, chat_name: &str);
}

pub struct Ingestor {
    client: Arc<BridgeClient>,
    store: Arc<Database>,
    sink: Option<Arc<dyn MessageSink>>,
}

impl Ingestor {
    pub fn new(
        client: Arc<BridgeClient>,
        store: Arc<Database>,
        sink: Option<Arc<dyn MessageSink>>,
    ) -> Self {
        Self {
            client,
            store,
            sink,
        }
    }

    /// Drain the event stream until the platform closes it.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<PlatformEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("platform event stream closed");
    }

    pub async fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::Message(message) => self.handle_message(message).await,
            PlatformEvent::HistorySync(sync) => self.handle_history_sync(sync).await,
            PlatformEvent::Connected => {
                self.client.mark_connected();
                // Refresh presence so the platform keeps routing live
                // messages to this device. Best effort.
                if let Err(e) = self.client.set_presence("available").await {
                    warn!(error = %e, "failed to set presence after connect");
                }
                info!("connected to platform");
            }
            PlatformEvent::Disconnected => {
                self.client.mark_disconnected();
                warn!("disconnected from platform, reconnecting");
            }
            PlatformEvent::LoggedOut => {
                warn!("device logged out, re-pairing required");
            }
            PlatformEvent::PairSuccess => self.client.handle_pair_success().await,
            PlatformEvent::PairError { reason } => self.client.handle_pair_error(&reason).await,
            PlatformEvent::KeepAliveTimeout { error_count } => {
                warn!(error_count, "keep-alive timeout");
                if error_count >= KEEPALIVE_TIMEOUT_LIMIT {
                    error!(
                        error_count,
                        "keep-alive failures over limit, recycling connection"
                    );
                    let client = self.client.clone();
                    client.platform().disconnect().await;
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        if let Err(e) = client.platform().connect().await {
                            error!(error = %e, "reconnect after keep-alive failure");
                        }
                    });
                }
            }
            PlatformEvent::StreamError { code } => {
                error!(code = %code, "stream error");
            }
        }
    }

    async fn handle_message(&self, message: IncomingMessage) {
        let chat_address = message.chat.to_string();

        let name = self
            .resolve_chat_name(&message.chat, None, &message.push_name)
            .await;

        if let Err(e) = self
            .store
            .store_chat(&chat_address, &name, message.timestamp)
        {
            warn!(chat = %chat_address, error = %e, "failed to store chat");
        }

        let content = message.content.body().to_string();
        let media = message.content.media.as_ref();
        if content.is_empty() && media.is_none() {
            return;
        }

        let sender_name = if message.push_name.is_empty() {
            message.sender.user.clone()
        } else {
            message.push_name.clone()
        };

        let stored = StoredMessage {
            id: message.id.clone(),
            chat_address: chat_address.clone(),
            sender: MessageSender::known(message.sender.to_string()),
            sender_name,
            content,
            timestamp: message.timestamp,
            is_from_me: message.is_from_me,
            media_type: media.map(|m| m.kind),
            filename: media.map(|m| m.resolved_filename(message.timestamp)),
            url: media.map(|m| m.url.clone()),
            media_key: media.map(|m| m.media_key.clone()),
            file_sha256: media.map(|m| m.file_sha256.clone()),
            file_enc_sha256: media.map(|m| m.file_enc_sha256.clone()),
            file_length: media.map(|m| m.file_length),
        };

        if let Err(e) = self.store.store_message(&stored) {
            warn!(message = %message.id, error = %e, "failed to store message");
        }

        if let Some(sink) = &self.sink {
            sink.on_message(&message, &name);
        }
    }

    async fn handle_history_sync(&self, sync: HistorySync) {
        info!(
            conversations = sync.conversations.len(),
            "history sync received"
        );

        let mut stored_count = 0usize;
        for conversation in &sync.conversations {
            let chat = match ChatAddress::parse(&conversation.id) {
                Ok(chat) => chat,
                Err(e) => {
                    warn!(raw = %conversation.id, error = %e, "skipping conversation with bad address");
                    continue;
                }
            };

            if conversation.messages.is_empty() {
                continue;
            }

            let name = self
                .resolve_chat_name(&chat, Some(conversation), "")
                .await;

            // The first entry is the most recent message; its timestamp
            // becomes the chat's activity time.
            let Some(latest_ts) = conversation.messages[0].timestamp else {
                continue;
            };
            if let Err(e) = self.store.store_chat(&conversation.id, &name, latest_ts) {
                warn!(chat = %conversation.id, error = %e, "failed to store chat");
                continue;
            }

            for message in &conversation.messages {
                let Some(timestamp) = message.timestamp else {
                    continue;
                };

                let content = message.content.body().to_string();
                let media = message.content.media.as_ref();
                if content.is_empty() && media.is_none() {
                    continue;
                }

                let sender =
                    self.history_sender(&chat, message.is_from_me, message.participant.as_deref());

                let stored = StoredMessage {
                    id: message.id.clone(),
                    chat_address: conversation.id.clone(),
                    // The store falls back to the sender address; an
                    // unpreserved sender keeps an empty name.
                    sender_name: String::new(),
                    sender,
                    content,
                    timestamp,
                    is_from_me: message.is_from_me,
                    media_type: media.map(|m| m.kind),
                    filename: media.map(|m| m.resolved_filename(timestamp)),
                    url: media.map(|m| m.url.clone()),
                    media_key: media.map(|m| m.media_key.clone()),
                    file_sha256: media.map(|m| m.file_sha256.clone()),
                    file_enc_sha256: media.map(|m| m.file_enc_sha256.clone()),
                    file_length: media.map(|m| m.file_length),
                };

                match self.store.store_message(&stored) {
                    Ok(()) => stored_count += 1,
                    Err(e) => {
                        warn!(message = %stored.id, error = %e, "failed to store history message")
                    }
                }
            }
        }

        info!(stored = stored_count, "history sync complete");
    }

    /// Sender attribution for a backfilled message. A group message whose
    /// original sender the platform did not preserve stays
    /// [`MessageSender::Unknown`] rather than being attributed to the
    /// group; only in a direct chat is the peer itself the sender.
    fn history_sender(
        &self,
        chat: &ChatAddress,
        is_from_me: bool,
        participant: Option<&str>,
    ) -> MessageSender {
        if is_from_me {
            return match self.client.device_id() {
                Some(device) => MessageSender::known(device.to_string()),
                None => MessageSender::Unknown,
            };
        }
        if let Some(participant) = participant {
            if !participant.is_empty() {
                return MessageSender::known(participant);
            }
        }
        if chat.is_group() {
            MessageSender::Unknown
        } else {
            MessageSender::known(chat.to_string())
        }
    }

    /// Resolution order: the already-stored name, the backfill
    /// conversation's own name fields, then a platform lookup with static
    /// fallbacks.
    async fn resolve_chat_name(
        &self,
        chat: &ChatAddress,
        conversation: Option<&HistoryConversation>,
        push_name: &str,
    ) -> String {
        let address = chat.to_string();

        match self.store.get_chat_name(&address) {
            Ok(Some(existing)) => return existing,
            Ok(None) => {}
            Err(e) => warn!(chat = %address, error = %e, "chat name lookup failed"),
        }

        if let Some(conversation) = conversation {
            if let Some(name) = conversation.display_name().or_else(|| conversation.name()) {
                return name.to_string();
            }
        }

        if chat.is_group() {
            match self.client.platform().group_info(chat).await {
                Ok(info) if !info.name.is_empty() => info.name,
                _ => format!("Group {}", chat.user),
            }
        } else {
            if let Some(full_name) = self.client.platform().contact_display_name(chat).await {
                if !full_name.is_empty() {
                    return full_name;
                }
            }
            if !push_name.is_empty() {
                return push_name.to_string();
            }
            chat.user.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BridgeClient, ClientOptions};
    use crate::events::{HistoryMessage, MediaPayload, MessageContent};
    use crate::platform::{ChannelPlatform, Outbound, Platform, Presence};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use tether_shared::MediaKind;

    struct Recorder {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl MessageSink for Recorder {
        fn on_message(&self, message: &IncomingMessage, chat_name: &str) {
            self.seen
                .lock()
                .unwrap()
                .push((message.id.clone(), chat_name.to_string()));
        }
    }

    fn ts(sec: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, sec).unwrap()
    }

    fn live_message(id: &str, text: &str) -> IncomingMessage {
        IncomingMessage {
            id: id.into(),
            chat: ChatAddress::parse("111@individual").unwrap(),
            sender: ChatAddress::parse("222@individual").unwrap(),
            push_name: "Bob".into(),
            timestamp: ts(1),
            is_from_me: false,
            content: MessageContent::plain(text),
        }
    }

    async fn setup(sink: Option<Arc<dyn MessageSink>>) -> (Arc<ChannelPlatform>, Arc<Database>, Ingestor) {
        let platform = Arc::new(ChannelPlatform::with_device(ChatAddress::individual("me")));
        platform.connect().await.unwrap();
        let client = Arc::new(BridgeClient::new(platform.clone(), ClientOptions::default()));
        let store = Arc::new(Database::open_in_memory().unwrap());
        let ingestor = Ingestor::new(client, store.clone(), sink);
        (platform, store, ingestor)
    }

    #[tokio::test]
    async fn live_message_is_stored_and_forwarded() {
        let recorder = Recorder::new();
        let (_platform, store, ingestor) =
            setup(Some(recorder.clone() as Arc<dyn MessageSink>)).await;

        ingestor
            .handle_event(PlatformEvent::Message(live_message("m1", "hello")))
            .await;

        assert_eq!(store.count_messages().unwrap(), 1);
        assert_eq!(store.count_chats().unwrap(), 1);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "m1");
    }

    #[tokio::test]
    async fn duplicate_event_is_idempotent() {
        let (_platform, store, ingestor) = setup(None).await;

        let msg = live_message("m1", "hello");
        ingestor
            .handle_event(PlatformEvent::Message(msg.clone()))
            .await;
        ingestor.handle_event(PlatformEvent::Message(msg)).await;

        assert_eq!(store.count_messages().unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_message_is_not_stored_or_forwarded() {
        let recorder = Recorder::new();
        let (_platform, store, ingestor) =
            setup(Some(recorder.clone() as Arc<dyn MessageSink>)).await;

        ingestor
            .handle_event(PlatformEvent::Message(live_message("m1", "")))
            .await;

        assert_eq!(store.count_messages().unwrap(), 0);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stored_chat_name_is_stable() {
        let (platform, store, ingestor) = setup(None).await;
        platform.add_contact(
            &ChatAddress::parse("111@individual").unwrap(),
            "Alice Original",
        );

        ingestor
            .handle_event(PlatformEvent::Message(live_message("m1", "first")))
            .await;
        assert_eq!(
            store.get_chat_name("111@individual").unwrap().as_deref(),
            Some("Alice Original")
        );

        // The contact record changes, but the stored name sticks.
        platform.add_contact(
            &ChatAddress::parse("111@individual").unwrap(),
            "Alice Renamed",
        );
        ingestor
            .handle_event(PlatformEvent::Message(live_message("m2", "second")))
            .await;
        assert_eq!(
            store.get_chat_name("111@individual").unwrap().as_deref(),
            Some("Alice Original")
        );
    }

    #[tokio::test]
    async fn group_name_falls_back_to_user_part() {
        let (_platform, store, ingestor) = setup(None).await;

        let mut msg = live_message("m1", "hi all");
        msg.chat = ChatAddress::parse("team42@group").unwrap();
        ingestor.handle_event(PlatformEvent::Message(msg)).await;

        assert_eq!(
            store.get_chat_name("team42@group").unwrap().as_deref(),
            Some("Group team42")
        );
    }

    #[tokio::test]
    async fn media_fields_survive_ingestion() {
        let (_platform, store, ingestor) = setup(None).await;

        let mut msg = live_message("m1", "");
        msg.content.media = Some(MediaPayload {
            kind: MediaKind::Image,
            filename: None,
            url: "https://cdn.example/blob".into(),
            media_key: vec![9, 9, 9],
            file_sha256: vec![1; 32],
            file_enc_sha256: vec![2; 32],
            file_length: 1234,
        });
        ingestor.handle_event(PlatformEvent::Message(msg)).await;

        let stored = store.get_messages("111@individual", 1).unwrap();
        assert_eq!(stored[0].media_type, Some(MediaKind::Image));
        assert_eq!(stored[0].filename.as_deref(), Some("image_20240601_120001.jpg"));
        assert_eq!(stored[0].url.as_deref(), Some("https://cdn.example/blob"));
        assert_eq!(stored[0].file_length, Some(1234));
    }

    #[tokio::test]
    async fn history_sync_walks_conversations() {
        let (_platform, store, ingestor) = setup(None).await;

        let conversation = HistoryConversation::new(
            "room@group",
            Some("Project Room".into()),
            None,
            vec![
                HistoryMessage {
                    id: "h2".into(),
                    timestamp: Some(ts(9)),
                    is_from_me: false,
                    participant: Some("333@individual".into()),
                    content: MessageContent::plain("latest"),
                },
                HistoryMessage {
                    id: "h1".into(),
                    timestamp: Some(ts(3)),
                    is_from_me: true,
                    participant: None,
                    content: MessageContent::plain("older"),
                },
                // No timestamp: skipped.
                HistoryMessage {
                    id: "h0".into(),
                    timestamp: None,
                    is_from_me: false,
                    participant: None,
                    content: MessageContent::plain("timeless"),
                },
                // Nothing to store: skipped.
                HistoryMessage {
                    id: "hx".into(),
                    timestamp: Some(ts(1)),
                    is_from_me: false,
                    participant: None,
                    content: MessageContent::default(),
                },
            ],
        );

        ingestor
            .handle_event(PlatformEvent::HistorySync(HistorySync {
                conversations: vec![
                    conversation,
                    HistoryConversation::new("broken-address", None, None, vec![]),
                ],
            }))
            .await;

        assert_eq!(store.count_messages().unwrap(), 2);
        assert_eq!(
            store.get_chat_name("room@group").unwrap().as_deref(),
            Some("Project Room")
        );

        let chats = store.get_chats().unwrap();
        assert_eq!(chats[0].last_message_time, ts(9));

        let msgs = store.get_messages("room@group", 10).unwrap();
        assert_eq!(msgs[0].sender, MessageSender::known("333@individual"));
        // Own history message is attributed to the linked device.
        assert_eq!(msgs[1].sender, MessageSender::known("me@individual"));
    }

    #[tokio::test]
    async fn group_history_without_participant_stays_unknown() {
        let (_platform, store, ingestor) = setup(None).await;

        let conversation = HistoryConversation::new(
            "room@group",
            Some("Room".into()),
            None,
            vec![HistoryMessage {
                id: "h1".into(),
                timestamp: Some(ts(5)),
                is_from_me: false,
                participant: None,
                content: MessageContent::plain("who sent this"),
            }],
        );
        ingestor
            .handle_event(PlatformEvent::HistorySync(HistorySync {
                conversations: vec![conversation],
            }))
            .await;

        // The group address is never substituted for the lost sender.
        let msgs = store.get_messages("room@group", 10).unwrap();
        assert_eq!(msgs[0].sender, MessageSender::Unknown);
        assert_eq!(msgs[0].sender_name, "");
    }

    #[tokio::test]
    async fn direct_history_without_participant_is_the_peer() {
        let (_platform, store, ingestor) = setup(None).await;

        let conversation = HistoryConversation::new(
            "111@individual",
            None,
            None,
            vec![HistoryMessage {
                id: "h1".into(),
                timestamp: Some(ts(5)),
                is_from_me: false,
                participant: None,
                content: MessageContent::plain("hello"),
            }],
        );
        ingestor
            .handle_event(PlatformEvent::HistorySync(HistorySync {
                conversations: vec![conversation],
            }))
            .await;

        let msgs = store.get_messages("111@individual", 10).unwrap();
        assert_eq!(msgs[0].sender, MessageSender::known("111@individual"));
    }

    #[tokio::test]
    async fn connected_event_refreshes_presence() {
        let (platform, _store, ingestor) = setup(None).await;

        ingestor.handle_event(PlatformEvent::Connected).await;

        assert!(platform
            .outbound()
            .iter()
            .any(|op| matches!(op, Outbound::Presence(Presence::Available))));
    }
}
