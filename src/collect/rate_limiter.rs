use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Rate limiter for controlling request frequency per host
pub struct RateLimiter {
    host_limits: Arc<RwLock<HashMap<String, HostLimiter>>>,
    default_delay: Duration,
}

/// Per-host rate limiting state
struct HostLimiter {
    last_request: Instant,
    delay: Duration,
}

impl RateLimiter {
    pub fn new(min_delay_ms: u64) -> Self {
        Self {
            host_limits: Arc::new(RwLock::new(HashMap::new())),
            default_delay: Duration::from_millis(min_delay_ms),
        }
    }

    /// Wait until the host's minimum inter-request delay has elapsed
    pub async fn wait_for_host(&self, host: &str) {
        let now = Instant::now();
        let required_delay = {
            let mut limits = self.host_limits.write().await;
            let limiter = limits.entry(host.to_string()).or_insert_with(|| HostLimiter {
                last_request: now - self.default_delay,
                delay: self.default_delay,
            });

            let elapsed = now.duration_since(limiter.last_request);
            let required_delay = limiter.delay.saturating_sub(elapsed);

            // The slot is reserved before the sleep, so concurrent callers queue up
            limiter.last_request = now + required_delay;

            required_delay
        };

        if !required_delay.is_zero() {
            debug!(
                "Rate limiting: waiting {}ms for host {}",
                required_delay.as_millis(),
                host
            );
            tokio::time::sleep(required_delay).await;
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(1000);
        let start = Instant::now();
        limiter.wait_for_host("example.com").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_second_request_waits() {
        let limiter = RateLimiter::new(100);
        limiter.wait_for_host("example.com").await;
        let start = Instant::now();
        limiter.wait_for_host("example.com").await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        let limiter = RateLimiter::new(500);
        limiter.wait_for_host("a.com").await;
        let start = Instant::now();
        limiter.wait_for_host("b.com").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
