pub mod audio;
pub mod client;
pub mod events;
pub mod ingest;
pub mod media_guard;
pub mod platform;
pub mod send;

mod error;

pub use client::{BridgeClient, ClientOptions, ConnectionSnapshot, PairingStatus};
pub use error::ClientError;
pub use events::{IncomingMessage, MessageContent, PlatformEvent};
pub use ingest::{Ingestor, MessageSink};
pub use platform::{ChannelPlatform, Platform, PlatformError};
