//! Fixed-window request limiting per client IP.
//!
//! One counter and window start per IP; an expired window is reset lazily
//! on the next request from that IP, so there is no sweeper on the hot
//! path. A periodic purge drops entries for IPs that went quiet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

const DEFAULT_LIMIT: u32 = 100;
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    started: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, Window>>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            limit,
            window,
        }
    }

    /// Count a request for `ip`; `false` when the window budget is spent.
    pub async fn check(&self, ip: &str) -> bool {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();

        let window = windows.entry(ip.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        if now.duration_since(window.started) > self.window {
            window.count = 0;
            window.started = now;
        }

        window.count += 1;
        window.count <= self.limit
    }

    /// Drop windows idle longer than `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        windows.retain(|_, w| now.duration_since(w.started) < max_idle);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_WINDOW)
    }
}
