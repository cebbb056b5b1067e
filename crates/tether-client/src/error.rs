use thiserror::Error;

use crate::audio::AudioError;
use crate::media_guard::MediaPathError;
use crate::platform::PlatformError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not connected to the platform")]
    NotConnected,

    #[error("Invalid address: {0}")]
    Address(#[from] tether_shared::AddressError),

    #[error("Invalid media path: {0}")]
    MediaPath(#[from] MediaPathError),

    #[error("Voice note analysis failed: {0}")]
    Audio(#[from] AudioError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pairing already in progress")]
    PairingInProgress,

    #[error("Device already linked")]
    AlreadyLinked,

    #[error("Timed out waiting for QR pairing")]
    QrTimeout,

    #[error("Invalid request: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
