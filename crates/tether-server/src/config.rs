use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub api_port: u16,
    /// `None` only when `DISABLE_AUTH_CHECK=true`.
    pub api_key: Option<String>,
    pub auth_disabled: bool,
    pub ssrf_check_disabled: bool,
    pub path_check_disabled: bool,
    /// Additional allowed CORS origins on top of the local UI defaults.
    pub cors_origins: Vec<String>,
    /// Base URL embedded in webhook payloads for media downloads.
    pub download_url: String,

    // Passed to the platform binding's history-sync configuration before
    // device creation.
    pub history_sync_days_limit: u32,
    pub history_sync_size_mb: u32,
    pub storage_quota_mb: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_port: 8080,
            api_key: None,
            auth_disabled: false,
            ssrf_check_disabled: false,
            path_check_disabled: false,
            cors_origins: Vec::new(),
            download_url: "http://localhost:8080/api/download".to_string(),
            history_sync_days_limit: 365,
            history_sync_size_mb: 5000,
            storage_quota_mb: 10240,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("API_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                config.api_port = parsed;
            } else {
                tracing::warn!(value = %port, "Invalid API_PORT, using default");
            }
        }

        if let Ok(key) = std::env::var("API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }

        config.auth_disabled = env_flag("DISABLE_AUTH_CHECK");
        config.ssrf_check_disabled = env_flag("DISABLE_SSRF_CHECK");
        config.path_check_disabled = env_flag("DISABLE_PATH_CHECK");

        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        if let Ok(url) = std::env::var("MEDIA_DOWNLOAD_URL") {
            if !url.is_empty() {
                config.download_url = url;
            }
        }

        if let Some(days) = env_u32("HISTORY_SYNC_DAYS_LIMIT") {
            config.history_sync_days_limit = days;
        }
        if let Some(size) = env_u32("HISTORY_SYNC_SIZE_MB") {
            config.history_sync_size_mb = size;
        }
        if let Some(quota) = env_u32("STORAGE_QUOTA_MB") {
            config.storage_quota_mb = quota;
        }

        config
    }

    pub fn listen_addr(&self) -> SocketAddr {
        ([0, 0, 0, 0], self.api_port).into()
    }

    /// Origins allowed to call the API from a browser: the local UIs plus
    /// whatever the deployment added.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = vec![
            "http://localhost:8089".to_string(),
            "http://localhost:8082".to_string(),
            "http://localhost:8090".to_string(),
        ];
        origins.extend(self.cors_origins.iter().cloned());
        origins
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "true").unwrap_or(false)
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.api_key, None);
        assert!(!config.auth_disabled);
        assert_eq!(config.history_sync_days_limit, 365);
        assert_eq!(config.listen_addr(), ([0, 0, 0, 0], 8080).into());
    }

    #[test]
    fn allowed_origins_include_extras() {
        let config = BridgeConfig {
            cors_origins: vec!["https://ops.example".into()],
            ..Default::default()
        };
        let origins = config.allowed_origins();
        assert!(origins.contains(&"http://localhost:8089".to_string()));
        assert!(origins.contains(&"https://ops.example".to_string()));
    }
}
