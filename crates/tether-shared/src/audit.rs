//! Process-local security audit log.
//!
//! Security-relevant outcomes (auth results, blocked SSRF/path-traversal
//! attempts, webhook lifecycle, outbound sends) are emitted as one JSON
//! object per line on stdout so an external collector can tail them. The
//! logger is constructed once in the composition root and injected; there
//! is no global instance.

use std::io::Write;

use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AuditEvent {
    fn new(event_type: &str, status: AuditStatus) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            ip: None,
            user_agent: None,
            resource: None,
            action: None,
            status,
            details: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn log(&self, event: AuditEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize audit event");
                return;
            }
        };
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let _ = writeln!(out, "[AUDIT] {} {}", event.timestamp, line);
    }

    pub fn auth_failure(&self, ip: &str, user_agent: &str, details: &str) {
        self.log(AuditEvent {
            ip: Some(ip.to_string()),
            user_agent: Some(user_agent.to_string()),
            details: Some(details.to_string()),
            ..AuditEvent::new("auth_failure", AuditStatus::Failure)
        });
    }

    pub fn auth_success(&self, ip: &str, resource: &str) {
        self.log(AuditEvent {
            ip: Some(ip.to_string()),
            resource: Some(resource.to_string()),
            ..AuditEvent::new("auth_success", AuditStatus::Success)
        });
    }

    pub fn rate_limit_exceeded(&self, ip: &str) {
        self.log(AuditEvent {
            ip: Some(ip.to_string()),
            ..AuditEvent::new("rate_limit_exceeded", AuditStatus::Blocked)
        });
    }

    pub fn webhook_created(&self, ip: &str, id: i64, target_url: &str) {
        self.log(AuditEvent {
            ip: Some(ip.to_string()),
            resource: Some(target_url.to_string()),
            action: Some("create".to_string()),
            details: Some(format!("id={id}")),
            ..AuditEvent::new("webhook_created", AuditStatus::Success)
        });
    }

    pub fn webhook_deleted(&self, ip: &str, id: i64) {
        self.log(AuditEvent {
            ip: Some(ip.to_string()),
            action: Some("delete".to_string()),
            details: Some(format!("id={id}")),
            ..AuditEvent::new("webhook_deleted", AuditStatus::Success)
        });
    }

    pub fn ssrf_blocked(&self, ip: &str, target_url: &str) {
        self.log(AuditEvent {
            ip: Some(ip.to_string()),
            resource: Some(target_url.to_string()),
            details: Some("private IP or blocked host target".to_string()),
            ..AuditEvent::new("ssrf_blocked", AuditStatus::Blocked)
        });
    }

    pub fn path_traversal_blocked(&self, ip: &str, path: &str) {
        self.log(AuditEvent {
            ip: Some(ip.to_string()),
            resource: Some(path.to_string()),
            details: Some("path outside allowed directories".to_string()),
            ..AuditEvent::new("path_traversal_blocked", AuditStatus::Blocked)
        });
    }

    pub fn message_sent(&self, recipient: &str, kind: &str) {
        self.log(AuditEvent {
            resource: Some(recipient.to_string()),
            action: Some(kind.to_string()),
            ..AuditEvent::new("message_sent", AuditStatus::Success)
        });
    }
}
