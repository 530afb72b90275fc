use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Length of the request-counting window.
    pub window: Duration,
    /// Requests permitted per window before callers are made to wait.
    pub max_requests: u32,
    /// Fixed pacing delay applied to every acquire.
    pub min_delay: Duration,
}

struct Window {
    started_at: Instant,
    count: u32,
}

/// Bounds outbound request rate across the whole engine: a hard quota per
/// window composed with inter-request spacing. Only delays, never fails.
///
/// State lives under one tokio mutex held across the waits, so concurrent
/// callers are serialized through it and increments are never lost.
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(Window {
                started_at: Instant::now(),
                count: 0,
            }),
            config,
        }
    }

    /// Waits as needed, then permits one request.
    pub async fn acquire(&self) {
        let mut window = self.state.lock().await;

        let now = Instant::now();
        if now.duration_since(window.started_at) > self.config.window {
            window.started_at = now;
            window.count = 0;
        }

        window.count += 1;
        if window.count > self.config.max_requests {
            let wait = self
                .config
                .window
                .saturating_sub(now.duration_since(window.started_at));
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            sleep(wait).await;
            window.started_at = Instant::now();
            window.count = 1;
        }

        if !self.config.min_delay.is_zero() {
            sleep(self.config.min_delay).await;
        }
    }
}
