//! Signed HTTP delivery with retry.
//!
//! Each (config, payload) pair runs as an independent task: up to five
//! attempts with a fixed backoff schedule, one log row per attempt. The
//! body is re-serialized per attempt so the stamped attempt counter and
//! the HMAC signature always describe the exact bytes on the wire.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{error, info, warn};

use tether_store::{Database, WebhookConfig, WebhookLog, WebhookTrigger};

use crate::error::{Result, WebhookError};
use crate::payload::WebhookPayload;

pub const MAX_ATTEMPTS: u32 = 5;

/// Seconds slept between attempt k and k+1.
const BACKOFF_SCHEDULE: [u64; 5] = [1, 2, 4, 8, 16];

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const RESPONSE_BODY_LIMIT: usize = 1024;
const USER_AGENT: &str = "Tether-Webhook/1.0";
const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Result of a one-shot operator-initiated test delivery.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub status: u16,
    pub body: String,
}

#[derive(Clone)]
pub struct DeliveryService {
    store: Arc<Database>,
    client: reqwest::Client,
}

impl DeliveryService {
    pub fn new(store: Arc<Database>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()?;
        Ok(Self { store, client })
    }

    /// Backoff before the attempt following `attempt` (1-based).
    pub fn backoff(attempt: u32) -> Duration {
        let idx = (attempt.max(1) as usize - 1).min(BACKOFF_SCHEDULE.len() - 1);
        Duration::from_secs(BACKOFF_SCHEDULE[idx])
    }

    /// Run the full retry loop for one (config, payload) pair. Spawned as
    /// its own task; never propagates errors to the caller.
    pub async fn deliver(
        self,
        config: WebhookConfig,
        mut payload: WebhookPayload,
        trigger: WebhookTrigger,
        message_id: String,
        chat_address: String,
    ) {
        for attempt in 1..=MAX_ATTEMPTS {
            payload.metadata.delivery_attempt = attempt;

            let body = match serde_json::to_vec(&payload) {
                Ok(body) => body,
                Err(e) => {
                    error!(error = %e, "failed to serialize webhook payload");
                    return;
                }
            };

            let (success, status, response_body) = self.send_once(&config, &body).await;

            let log = WebhookLog {
                id: 0,
                webhook_config_id: config.id,
                message_id: message_id.clone(),
                chat_address: chat_address.clone(),
                trigger_type: trigger.trigger_type.as_str().to_string(),
                trigger_value: trigger.trigger_value.clone(),
                payload: String::from_utf8_lossy(&body).into_owned(),
                response_status: status,
                response_body,
                attempt_count: attempt,
                delivered_at: success.then(Utc::now),
                created_at: Utc::now(),
            };
            if let Err(e) = self.store.store_webhook_log(&log) {
                error!(error = %e, "failed to store webhook log");
            }

            if success {
                info!(
                    target_url = %config.target_url,
                    attempt,
                    "webhook delivered"
                );
                return;
            }

            warn!(
                target_url = %config.target_url,
                attempt,
                status,
                "webhook delivery failed"
            );

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Self::backoff(attempt)).await;
            }
        }

        error!(
            target_url = %config.target_url,
            attempts = MAX_ATTEMPTS,
            "webhook delivery failed permanently"
        );
    }

    /// One-shot connectivity test: the same HTTP send path, no retries
    /// and no log row.
    pub async fn test(&self, config: &WebhookConfig) -> Result<TestOutcome> {
        let payload = WebhookPayload::for_test(config);
        let body = serde_json::to_vec(&payload)
            .map_err(|e| WebhookError::Validation(format!("failed to serialize test payload: {e}")))?;

        let (success, status, response_body) = self.send_once(config, &body).await;
        if !success {
            return Err(WebhookError::TestFailed {
                status,
                body: response_body,
            });
        }
        Ok(TestOutcome {
            status,
            body: response_body,
        })
    }

    /// One HTTP POST. Returns (success, status, truncated body); network
    /// errors surface as status 0.
    async fn send_once(&self, config: &WebhookConfig, body: &[u8]) -> (bool, u16, String) {
        let mut request = self
            .client
            .post(&config.target_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .body(body.to_vec());

        if let Some(secret) = config.secret.as_deref() {
            if !secret.is_empty() {
                request = request.header(SIGNATURE_HEADER, sign(body, secret));
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(target_url = %config.target_url, error = %e, "webhook request failed");
                return (false, 0, e.to_string());
            }
        };

        let status = response.status().as_u16();
        let success = (200..300).contains(&status);

        let mut body = response.bytes().await.unwrap_or_default().to_vec();
        body.truncate(RESPONSE_BODY_LIMIT);
        let body = String::from_utf8_lossy(&body).into_owned();

        (success, status, body)
    }
}

/// `sha256=<hex>` HMAC over the exact serialized body of this attempt.
pub fn sign(body: &[u8], secret: &str) -> String {
    // A MAC key can be any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
