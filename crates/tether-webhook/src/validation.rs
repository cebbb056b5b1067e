//! Config validation and the SSRF filter.
//!
//! Target URLs are resolved before a config is accepted; a host that
//! resolves to any private, loopback, link-local or otherwise reserved
//! address is rejected, as are the well-known cloud metadata endpoints.
//! Resolution happens again implicitly at delivery time by the HTTP
//! client, so the filter is a write-time gate, not a per-request proxy.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tether_store::{MatchType, WebhookConfig};
use url::Url;

use crate::error::{Result, WebhookError};

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_URL_LEN: usize = 2048;

/// Cloud metadata endpoints blocked by hostname, before any resolution.
const BLOCKED_HOSTS: &[&str] = &[
    "metadata.google.internal",
    "169.254.169.254",
    "metadata.azure.com",
];

/// Validate a webhook configuration at create/update time.
///
/// `skip_ssrf` reflects the `DISABLE_SSRF_CHECK` deployment override and
/// bypasses only the target-address filter, never the shape rules.
pub async fn validate_config(config: &WebhookConfig, skip_ssrf: bool) -> Result<()> {
    if config.name.is_empty() {
        return Err(WebhookError::Validation("webhook name is required".into()));
    }
    if config.name.len() > MAX_NAME_LEN {
        return Err(WebhookError::Validation(format!(
            "webhook name must be at most {MAX_NAME_LEN} characters"
        )));
    }

    if config.target_url.is_empty() {
        return Err(WebhookError::Validation("target URL is required".into()));
    }
    if config.target_url.len() > MAX_URL_LEN {
        return Err(WebhookError::Validation(format!(
            "target URL must be at most {MAX_URL_LEN} characters"
        )));
    }
    if !config.target_url.starts_with("http://") && !config.target_url.starts_with("https://") {
        return Err(WebhookError::Validation(
            "target URL must start with http:// or https://".into(),
        ));
    }

    for trigger in &config.triggers {
        if trigger.match_type == MatchType::Regex && !trigger.trigger_value.is_empty() {
            if let Err(e) = regex::Regex::new(&trigger.trigger_value) {
                return Err(WebhookError::Validation(format!(
                    "invalid regex pattern '{}': {e}",
                    trigger.trigger_value
                )));
            }
        }
    }

    if !skip_ssrf {
        validate_target_url(&config.target_url).await?;
    }

    Ok(())
}

/// The SSRF gate: reject blocked hostnames and any target resolving to a
/// non-public address. DNS failure is itself a rejection.
pub async fn validate_target_url(target_url: &str) -> Result<()> {
    let url = Url::parse(target_url)
        .map_err(|e| WebhookError::Validation(format!("invalid target URL: {e}")))?;

    let host = url
        .host_str()
        .ok_or_else(|| WebhookError::Validation("target URL has no host".into()))?;

    for blocked in BLOCKED_HOSTS {
        if host.eq_ignore_ascii_case(blocked) {
            return Err(WebhookError::SsrfBlocked(format!(
                "hostname '{host}' is blocked"
            )));
        }
    }

    // Literal addresses skip DNS.
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(WebhookError::SsrfBlocked(format!(
                "'{host}' is a private or reserved address"
            )));
        }
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((trimmed, port))
        .await
        .map_err(|e| WebhookError::SsrfBlocked(format!("failed to resolve '{host}': {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(WebhookError::SsrfBlocked(format!(
            "'{host}' did not resolve to any address"
        )));
    }

    for addr in addrs {
        if is_private_ip(addr.ip()) {
            return Err(WebhookError::SsrfBlocked(format!(
                "'{host}' resolves to private or reserved address {}",
                addr.ip()
            )));
        }
    }

    Ok(())
}

pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    // Loopback 127.0.0.0/8
    if o[0] == 127 {
        return true;
    }
    // RFC 1918: 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
    if o[0] == 10 {
        return true;
    }
    if o[0] == 172 && (16..=31).contains(&o[1]) {
        return true;
    }
    if o[0] == 192 && o[1] == 168 {
        return true;
    }
    // Link-local 169.254.0.0/16
    if o[0] == 169 && o[1] == 254 {
        return true;
    }
    // This-network 0.0.0.0/8
    if o[0] == 0 {
        return true;
    }
    // Multicast 224.0.0.0/4 and reserved 240.0.0.0/4
    if o[0] >= 224 {
        return true;
    }
    false
}

fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();
    // ::1 loopback and :: unspecified
    if s == [0, 0, 0, 0, 0, 0, 0, 1] || s == [0; 8] {
        return true;
    }
    // fc00::/7 unique-local
    if (s[0] & 0xfe00) == 0xfc00 {
        return true;
    }
    // fe80::/10 link-local
    if (s[0] & 0xffc0) == 0xfe80 {
        return true;
    }
    // ff00::/8 multicast (includes link-local multicast)
    if (s[0] & 0xff00) == 0xff00 {
        return true;
    }
    // v4-mapped addresses inherit the v4 classification.
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    false
}
