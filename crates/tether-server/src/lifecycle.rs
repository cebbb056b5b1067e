//! Long-running supervision loops.
//!
//! Recovery from a stuck connection is deliberately blunt: when the
//! platform stays disconnected past the threshold, the process exits
//! non-zero and the container orchestrator restarts it from scratch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use tether_client::BridgeClient;

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);
const PRESENCE_INTERVAL: Duration = Duration::from_secs(3 * 60);
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// How long a continuous disconnection is tolerated before the process
/// is terminated for an external restart.
pub const DISCONNECT_EXIT_THRESHOLD: Duration = Duration::from_secs(3 * 60);

/// The watchdog decision, separated from the loop for testability.
pub fn watchdog_should_exit(disconnected_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match disconnected_at {
        Some(since) => {
            let down_for = now.signed_duration_since(since);
            down_for.to_std().map_or(false, |d| d > DISCONNECT_EXIT_THRESHOLD)
        }
        None => false,
    }
}

/// Spawn the watchdog, presence-ping and stats loops.
pub fn spawn_supervisors(client: Arc<BridgeClient>) {
    let watchdog_client = client.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
        loop {
            interval.tick().await;
            let snapshot = watchdog_client.connection_snapshot();
            if watchdog_should_exit(snapshot.disconnected_at, Utc::now()) {
                error!(
                    disconnected_at = ?snapshot.disconnected_at,
                    "watchdog: disconnected past threshold, exiting for external restart"
                );
                std::process::exit(1);
            }
        }
    });

    let presence_client = client.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRESENCE_INTERVAL);
        // The first tick fires immediately; presence was already set on
        // connect.
        interval.tick().await;
        loop {
            interval.tick().await;
            if presence_client.is_connected() {
                match presence_client.set_presence("available").await {
                    Ok(()) => debug!("presence ping sent"),
                    Err(e) => debug!(error = %e, "presence ping failed"),
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        loop {
            interval.tick().await;
            debug!(
                connected = client.is_connected(),
                device = ?client.device_id().map(|d| d.to_string()),
                "connection stats"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn no_exit_while_connected() {
        assert!(!watchdog_should_exit(None, Utc::now()));
    }

    #[test]
    fn no_exit_below_threshold() {
        let now = Utc::now();
        let since = now - ChronoDuration::seconds(170);
        assert!(!watchdog_should_exit(Some(since), now));
    }

    #[test]
    fn exit_past_threshold() {
        let now = Utc::now();
        let since = now - ChronoDuration::seconds(181);
        assert!(watchdog_should_exit(Some(since), now));

        let long_gone = now - ChronoDuration::hours(2);
        assert!(watchdog_should_exit(Some(long_gone), now));
    }
}
