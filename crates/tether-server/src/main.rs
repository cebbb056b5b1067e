mod api;
mod config;
mod error;
mod lifecycle;
mod middleware;
mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tether_client::{BridgeClient, ChannelPlatform, ClientOptions, Ingestor, MessageSink, Platform};
use tether_shared::AuditLogger;
use tether_store::Database;
use tether_webhook::WebhookManager;

use crate::api::AppState;
use crate::config::BridgeConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tether=debug")),
        )
        .init();

    info!("Starting tether bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = BridgeConfig::from_env();

    if config.api_key.is_none() && !config.auth_disabled {
        error!("API_KEY environment variable is required");
        error!("Set API_KEY or DISABLE_AUTH_CHECK=true for development");
        std::process::exit(1);
    }
    if config.api_key.is_none() {
        warn!("running without API authentication (DISABLE_AUTH_CHECK=true)");
    } else {
        info!("API authentication enabled");
    }

    let audit = Arc::new(AuditLogger::new());

    let store = match Database::open_default() {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to initialize message store");
            std::process::exit(1);
        }
    };

    // The platform binding owns the wire protocol and its own session
    // store under store/. A vendor binding is injected here; without one
    // the channel-backed driver keeps the bridge runnable end to end.
    // History limits are applied to the binding before device creation.
    info!(
        days = config.history_sync_days_limit,
        size_mb = config.history_sync_size_mb,
        quota_mb = config.storage_quota_mb,
        "history sync configuration"
    );
    let platform: Arc<dyn Platform> = Arc::new(ChannelPlatform::new());

    let client = Arc::new(BridgeClient::new(
        platform.clone(),
        ClientOptions {
            path_check_disabled: config.path_check_disabled,
        },
    ));

    let webhooks = match WebhookManager::new(
        store.clone(),
        config.download_url.clone(),
        config.ssrf_check_disabled,
    ) {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            error!(error = %e, "failed to build webhook manager");
            std::process::exit(1);
        }
    };
    if let Err(e) = webhooks.load() {
        error!(error = %e, "failed to load webhook configs");
        std::process::exit(1);
    }

    // Event ingestion: platform events -> store -> webhook fan-out.
    let events = match platform.events() {
        Some(events) => events,
        None => {
            error!("platform event stream unavailable");
            std::process::exit(1);
        }
    };
    let ingestor = Ingestor::new(
        client.clone(),
        store.clone(),
        Some(webhooks.clone() as Arc<dyn MessageSink>),
    );
    tokio::spawn(ingestor.run(events));

    lifecycle::spawn_supervisors(client.clone());

    let rate_limiter = RateLimiter::default();
    // Evict rate-limit windows for IPs idle longer than 10 minutes.
    let limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.purge_stale(Duration::from_secs(600)).await;
        }
    });

    let state = AppState {
        client: client.clone(),
        store,
        webhooks,
        audit,
        config: Arc::new(config.clone()),
        rate_limiter,
    };

    // Connect in the background so the API is reachable during pairing
    // and the initial history sync.
    let connect_client = client.clone();
    tokio::spawn(async move {
        if let Err(e) = connect_client.connect().await {
            error!(error = %e, "failed to connect to platform");
        }
    });

    let addr = config.listen_addr();
    tokio::select! {
        result = api::serve(state, addr) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, disconnecting");
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
