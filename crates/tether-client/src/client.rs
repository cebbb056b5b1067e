//! Client wrapper around the opaque platform library.
//!
//! Adds what the library does not track for us: connection-state
//! bookkeeping for the watchdog, the auto-reconnect circuit breaker and
//! the phone-number pairing state machine.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use tether_shared::ChatAddress;

use crate::error::{ClientError, Result};
use crate::platform::{Platform, QrEvent};

/// Consecutive reconnect failures before the wrapper gives up and leaves
/// recovery to the watchdog.
const MAX_RECONNECT_ERRORS: u32 = 30;

/// Lifetime of a phone pairing code.
const PAIR_CODE_TTL: Duration = Duration::from_secs(160);

/// Overall deadline for the QR pairing flow.
const QR_PAIR_DEADLINE: Duration = Duration::from_secs(3 * 60);

#[derive(Debug)]
struct ConnState {
    started_at: DateTime<Utc>,
    last_connected_at: Option<DateTime<Utc>>,
    disconnected_at: Option<DateTime<Utc>>,
    auto_reconnect_errors: u32,
}

/// A point-in-time copy of the connection bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub started_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub auto_reconnect_errors: u32,
}

#[derive(Debug, Default)]
struct PairingState {
    in_progress: bool,
    code: String,
    expires_at: Option<DateTime<Utc>>,
    complete: bool,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PairingStatus {
    pub in_progress: bool,
    pub code: Option<String>,
    pub expires_in_secs: u64,
    pub complete: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// `DISABLE_PATH_CHECK=true`: media paths outside the allow-listed
    /// roots are accepted (traversal is still rejected).
    pub path_check_disabled: bool,
}

pub struct BridgeClient {
    platform: std::sync::Arc<dyn Platform>,
    options: ClientOptions,
    conn: RwLock<ConnState>,
    pairing: Mutex<PairingState>,
}

impl BridgeClient {
    pub fn new(platform: std::sync::Arc<dyn Platform>, options: ClientOptions) -> Self {
        Self {
            platform,
            options,
            conn: RwLock::new(ConnState {
                started_at: Utc::now(),
                last_connected_at: None,
                disconnected_at: None,
                auto_reconnect_errors: 0,
            }),
            pairing: Mutex::new(PairingState::default()),
        }
    }

    pub fn platform(&self) -> &std::sync::Arc<dyn Platform> {
        &self.platform
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.platform.is_connected()
    }

    pub fn device_id(&self) -> Option<ChatAddress> {
        self.platform.device_id()
    }

    /// Establish the platform connection. A device without a stored
    /// identity goes through the QR pairing flow: codes from the pairing
    /// feed are printed for the operator, success is awaited with an
    /// overall deadline.
    pub async fn connect(&self) -> Result<()> {
        if self.platform.device_id().is_none() {
            let mut qr = self
                .platform
                .qr_events()
                .ok_or_else(|| ClientError::Invalid("QR pairing feed already taken".into()))?;
            self.platform.connect().await?;

            let deadline = tokio::time::sleep(QR_PAIR_DEADLINE);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    event = qr.recv() => match event {
                        Some(QrEvent::Code(code)) => {
                            info!(code = %code, "scan this pairing code with the primary device");
                        }
                        Some(QrEvent::Success) => break,
                        None => return Err(ClientError::QrTimeout),
                    },
                    _ = &mut deadline => return Err(ClientError::QrTimeout),
                }
            }
        } else {
            self.platform.connect().await?;
        }

        // Give the session a moment to settle before the first send.
        tokio::time::sleep(Duration::from_secs(2)).await;

        if !self.platform.is_connected() {
            return Err(ClientError::NotConnected);
        }

        info!("connected to platform");
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.platform.disconnect().await;
    }

    // --- connection bookkeeping -----------------------------------------

    pub fn mark_connected(&self) {
        if let Ok(mut conn) = self.conn.write() {
            conn.last_connected_at = Some(Utc::now());
            conn.disconnected_at = None;
            conn.auto_reconnect_errors = 0;
        }
    }

    /// Record a disconnect. Only the first transition is kept so the
    /// "down for" interval covers the whole outage.
    pub fn mark_disconnected(&self) {
        if let Ok(mut conn) = self.conn.write() {
            if conn.disconnected_at.is_none() {
                conn.disconnected_at = Some(Utc::now());
            }
        }
    }

    pub fn connection_snapshot(&self) -> ConnectionSnapshot {
        match self.conn.read() {
            Ok(conn) => ConnectionSnapshot {
                started_at: conn.started_at,
                last_connected_at: conn.last_connected_at,
                disconnected_at: conn.disconnected_at,
                auto_reconnect_errors: conn.auto_reconnect_errors,
            },
            Err(_) => ConnectionSnapshot {
                started_at: Utc::now(),
                last_connected_at: None,
                disconnected_at: None,
                auto_reconnect_errors: 0,
            },
        }
    }

    /// Auto-reconnect hook. Returns `true` to ask the platform library
    /// for another attempt, `false` once the failure budget is spent --
    /// at that point the watchdog terminates the process and the outer
    /// supervisor restarts it.
    pub fn on_reconnect_failure(&self, failure: &str) -> bool {
        let count = match self.conn.write() {
            Ok(mut conn) => {
                conn.auto_reconnect_errors += 1;
                conn.auto_reconnect_errors
            }
            Err(_) => return false,
        };
        if count >= MAX_RECONNECT_ERRORS {
            error!(
                failures = count,
                "auto-reconnect giving up, watchdog will restart the process"
            );
            return false;
        }
        warn!(attempt = count, failure = %failure, "auto-reconnect");
        true
    }

    // --- phone pairing ---------------------------------------------------

    /// Start the phone-number pairing flow. Returns the pairing code and
    /// its remaining lifetime in seconds.
    pub async fn pair_with_phone(&self, phone_number: &str) -> Result<(String, u64)> {
        let mut pairing = self.pairing.lock().await;

        if pairing.in_progress {
            return Err(ClientError::PairingInProgress);
        }
        if self.platform.device_id().is_some() {
            return Err(ClientError::AlreadyLinked);
        }

        pairing.in_progress = true;
        pairing.complete = false;
        pairing.error = None;

        if !self.platform.is_connected() {
            if let Err(e) = self.platform.connect().await {
                pairing.in_progress = false;
                return Err(e.into());
            }
        }

        let code = match self.platform.pair_phone(phone_number).await {
            Ok(code) => code,
            Err(e) => {
                pairing.in_progress = false;
                return Err(e.into());
            }
        };

        pairing.code = code.clone();
        pairing.expires_at = Some(Utc::now() + PAIR_CODE_TTL);

        info!(expires_in = PAIR_CODE_TTL.as_secs(), "pairing code generated");
        Ok((code, PAIR_CODE_TTL.as_secs()))
    }

    pub async fn pairing_status(&self) -> PairingStatus {
        let pairing = self.pairing.lock().await;

        let expires_in_secs = match (pairing.in_progress, pairing.expires_at) {
            (true, Some(expiry)) => (expiry - Utc::now()).num_seconds().max(0) as u64,
            _ => 0,
        };

        PairingStatus {
            in_progress: pairing.in_progress,
            code: if pairing.code.is_empty() {
                None
            } else {
                Some(pairing.code.clone())
            },
            expires_in_secs,
            complete: pairing.complete,
            error: pairing.error.clone(),
        }
    }

    pub async fn handle_pair_success(&self) {
        let mut pairing = self.pairing.lock().await;
        pairing.complete = true;
        pairing.in_progress = false;
        info!("pairing successful");
    }

    pub async fn handle_pair_error(&self, reason: &str) {
        let mut pairing = self.pairing.lock().await;
        pairing.error = Some(reason.to_string());
        pairing.in_progress = false;
        error!(reason = %reason, "pairing failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ChannelPlatform;
    use std::sync::Arc;

    fn client_with(platform: Arc<ChannelPlatform>) -> BridgeClient {
        BridgeClient::new(platform, ClientOptions::default())
    }

    #[tokio::test]
    async fn pairing_is_exclusive() {
        let platform = Arc::new(ChannelPlatform::new());
        let client = client_with(platform);

        let (code, expires_in) = client.pair_with_phone("15551234567").await.unwrap();
        assert_eq!(code.len(), 8);
        assert_eq!(expires_in, 160);

        // A second start while in progress fails without touching state.
        let err = client.pair_with_phone("15551234567").await.unwrap_err();
        assert!(matches!(err, ClientError::PairingInProgress));

        let status = client.pairing_status().await;
        assert!(status.in_progress);
        assert_eq!(status.code.as_deref(), Some(code.as_str()));
        assert!(status.expires_in_secs > 0 && status.expires_in_secs <= 160);
    }

    #[tokio::test]
    async fn pairing_rejected_when_already_linked() {
        let platform = Arc::new(ChannelPlatform::with_device(ChatAddress::individual("me")));
        let client = client_with(platform);

        let err = client.pair_with_phone("15551234567").await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyLinked));
        assert!(!client.pairing_status().await.in_progress);
    }

    #[tokio::test]
    async fn pairing_completes_on_success_event() {
        let platform = Arc::new(ChannelPlatform::new());
        let client = client_with(platform);

        client.pair_with_phone("15551234567").await.unwrap();
        client.handle_pair_success().await;

        let status = client.pairing_status().await;
        assert!(status.complete);
        assert!(!status.in_progress);

        // A failed attempt records the error instead.
        client.pair_with_phone("15551234567").await.unwrap();
        client.handle_pair_error("code rejected").await;
        let status = client.pairing_status().await;
        assert!(!status.in_progress);
        assert_eq!(status.error.as_deref(), Some("code rejected"));
    }

    #[tokio::test]
    async fn qr_connect_completes_on_success_event() {
        let platform = Arc::new(ChannelPlatform::new());
        platform.inject_qr(QrEvent::Code("pair-code-1".into()));
        platform.inject_qr(QrEvent::Success);

        let client = client_with(platform.clone());
        client.connect().await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn disconnect_interval_covers_whole_outage() {
        let platform = Arc::new(ChannelPlatform::new());
        let client = client_with(platform);

        client.mark_disconnected();
        let first = client.connection_snapshot().disconnected_at.unwrap();

        client.mark_disconnected();
        assert_eq!(client.connection_snapshot().disconnected_at, Some(first));

        client.mark_connected();
        let snapshot = client.connection_snapshot();
        assert_eq!(snapshot.disconnected_at, None);
        assert!(snapshot.last_connected_at.is_some());
    }

    #[tokio::test]
    async fn reconnect_circuit_breaker_gives_up_at_threshold() {
        let platform = Arc::new(ChannelPlatform::new());
        let client = client_with(platform);

        for _ in 0..MAX_RECONNECT_ERRORS - 1 {
            assert!(client.on_reconnect_failure("io timeout"));
        }
        assert!(!client.on_reconnect_failure("io timeout"));
        assert_eq!(
            client.connection_snapshot().auto_reconnect_errors,
            MAX_RECONNECT_ERRORS
        );

        // A successful connect resets the budget.
        client.mark_connected();
        assert!(client.on_reconnect_failure("io timeout"));
    }
}
