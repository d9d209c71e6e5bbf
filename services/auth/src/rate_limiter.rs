//! Rate limiter for login attempts

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum number of failed attempts allowed within the window
    pub max_attempts: u32,
    /// Time window
    pub window: Duration,
    /// Ban duration once the limit is hit
    pub ban_duration: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(300),
            ban_duration: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug)]
struct Attempts {
    failures: u32,
    window_started: Instant,
    banned_until: Option<Instant>,
}

/// Tracks failed attempts per key (a username for logins)
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    entries: Arc<Mutex<HashMap<String, Attempts>>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether another attempt for `key` may proceed right now
    pub async fn is_allowed(&self, key: &str) -> bool {
        self.is_allowed_at(key, Instant::now()).await
    }

    async fn is_allowed_at(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().await;
        let banned_until = match entries.get(key) {
            Some(entry) => entry.banned_until,
            None => return true,
        };

        match banned_until {
            Some(until) if now < until => false,
            Some(_) => {
                entries.remove(key);
                true
            }
            None => true,
        }
    }

    /// Count a failed attempt, banning the key once it crosses the limit
    pub async fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Instant::now()).await
    }

    async fn record_failure_at(&self, key: &str, now: Instant) {
        let mut entries = self.entries.lock().await;
        let window = self.config.window;
        entries.retain(|_, e| {
            e.banned_until.is_some_and(|until| now < until)
                || now.duration_since(e.window_started) < window
        });

        let entry = entries.entry(key.to_string()).or_insert(Attempts {
            failures: 0,
            window_started: now,
            banned_until: None,
        });

        if now.duration_since(entry.window_started) >= self.config.window {
            entry.failures = 0;
            entry.window_started = now;
        }

        entry.failures += 1;

        if entry.failures >= self.config.max_attempts && entry.banned_until.is_none() {
            entry.banned_until = Some(now + self.config.ban_duration);
            warn!(
                "Banned key {} for {} seconds after {} failed attempts",
                key,
                self.config.ban_duration.as_secs(),
                entry.failures
            );
        }
    }

    /// Forget the failures of a key after a successful attempt
    pub async fn record_success(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    /// Get the rate limiter configuration
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}
