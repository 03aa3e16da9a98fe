use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::AdmissionConfig;

/// Verdict for one admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny,
}

struct WindowState {
    count: u32,
    window_start: Instant,
}

/// Fixed-window request counter, one window per client key. A window
/// that has fully elapsed resets on the next request. Two adjacent
/// windows admit up to 2N requests across their boundary; acceptable
/// for politeness throttling of our own outbound scraping.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clients: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(
            config.requests_per_minute,
            Duration::from_secs(config.rate_limit_window),
        )
    }

    /// Admit or deny one request for `client`. Denied requests do not
    /// count against the window.
    pub async fn check(&self, client: &str) -> Admission {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;

        let state = clients.entry(client.to_string()).or_insert(WindowState {
            count: 0,
            window_start: now,
        });

        if now > state.window_start + self.window {
            state.count = 0;
            state.window_start = now;
        }

        if state.count >= self.limit {
            debug!(client = client, limit = self.limit, "Request denied");
            return Admission::Deny;
        }

        state.count += 1;
        Admission::Allow
    }

    /// Drop window state that can no longer affect a decision.
    pub async fn prune(&self) {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;
        clients.retain(|_, state| now <= state.window_start + self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_limit_enforced_within_window() {
        let limiter = RateLimiter::new(60, Duration::from_secs(60));

        for _ in 0..60 {
            assert_eq!(limiter.check("scraper").await, Admission::Allow);
        }
        // 61st request in the same window
        assert_eq!(limiter.check("scraper").await, Admission::Deny);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_elapse() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));

        assert_eq!(limiter.check("scraper").await, Admission::Allow);
        assert_eq!(limiter.check("scraper").await, Admission::Allow);
        assert_eq!(limiter.check("scraper").await, Admission::Deny);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.check("scraper").await, Admission::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert_eq!(limiter.check("a").await, Admission::Allow);
        assert_eq!(limiter.check("a").await, Admission::Deny);
        assert_eq!(limiter.check("b").await, Admission::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_requests_do_not_extend_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert_eq!(limiter.check("a").await, Admission::Allow);
        for _ in 0..10 {
            assert_eq!(limiter.check("a").await, Admission::Deny);
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.check("a").await, Admission::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_burst_allows_double() {
        // Known fixed-window behavior: N at the end of one window plus N
        // at the start of the next.
        let limiter = RateLimiter::new(5, Duration::from_secs(60));

        for _ in 0..5 {
            assert_eq!(limiter.check("a").await, Admission::Allow);
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        for _ in 0..5 {
            assert_eq!(limiter.check("a").await, Admission::Allow);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_stale_windows() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.check("a").await;

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.prune().await;

        assert!(limiter.clients.lock().await.is_empty());
    }
}
