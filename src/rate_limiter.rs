//! Per-origin request spacing with jitter. Workers targeting the same host
//! serialize at the limiter: each caller stamps its slot under the lock and
//! sleeps out the remaining deficit outside it.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct LimiterState {
    last_request: HashMap<String, Instant>,
    host_delays: HashMap<String, Duration>,
}

pub struct RateLimiter {
    state: Mutex<LimiterState>,
    default_delay: Duration,
}

impl RateLimiter {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                last_request: HashMap::new(),
                host_delays: HashMap::new(),
            }),
            default_delay,
        }
    }

    /// Override the spacing for one host (e.g. from a robots.txt
    /// `Crawl-delay`).
    pub fn set_host_delay(&self, host: &str, delay: Duration) {
        self.state.lock().host_delays.insert(host.to_string(), delay);
    }

    pub fn host_delay(&self, host: &str) -> Duration {
        self.state
            .lock()
            .host_delays
            .get(host)
            .copied()
            .unwrap_or(self.default_delay)
    }

    /// Forget the last-request time for a host; its next call is
    /// non-blocking.
    pub fn reset_host(&self, host: &str) {
        self.state.lock().last_request.remove(host);
    }

    /// Wait until this caller may dispatch a request to `host`. The first
    /// call per host returns immediately. Each caller reserves the slot one
    /// jittered delay after the previous reservation under the lock, then
    /// sleeps out its deficit outside it, so concurrent callers to the same
    /// host queue up pairwise spaced while other hosts are never held up.
    pub async fn wait_for_host(&self, host: &str) {
        let slot = {
            let mut state = self.state.lock();
            let delay = state
                .host_delays
                .get(host)
                .copied()
                .unwrap_or(self.default_delay);
            let now = Instant::now();
            let slot = match state.last_request.get(host) {
                Some(last) => now.max(*last + jitter(delay)),
                None => now,
            };
            state.last_request.insert(host.to_string(), slot);
            slot
        };

        if slot > Instant::now() {
            tokio::time::sleep_until(slot).await;
        }
    }
}

/// Perturb a delay by ±10% uniformly.
fn jitter(delay: Duration) -> Duration {
    let base = delay.as_millis() as i64;
    let spread = base / 10;
    if spread <= 0 {
        return delay;
    }
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_millis((base + offset) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_does_not_block() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();
        limiter.wait_for_host("example.com").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_second_request_waits() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        limiter.wait_for_host("example.com").await;
        let start = Instant::now();
        limiter.wait_for_host("example.com").await;
        // Allow for the -10% jitter bound.
        assert!(start.elapsed() >= Duration::from_millis(170));
    }

    #[tokio::test]
    async fn test_different_hosts_are_independent() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        limiter.wait_for_host("a.example.com").await;
        let start = Instant::now();
        limiter.wait_for_host("b.example.com").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_reset_host_clears_spacing() {
        let limiter = RateLimiter::new(Duration::from_millis(300));
        limiter.wait_for_host("example.com").await;
        limiter.reset_host("example.com");
        let start = Instant::now();
        limiter.wait_for_host("example.com").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_host_delay_override() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        limiter.set_host_delay("fast.com", Duration::from_millis(50));
        assert_eq!(limiter.host_delay("fast.com"), Duration::from_millis(50));
        assert_eq!(limiter.host_delay("other.com"), Duration::from_millis(500));

        limiter.wait_for_host("fast.com").await;
        let start = Instant::now();
        limiter.wait_for_host("fast.com").await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(40));
        assert!(waited < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_concurrent_callers_queue_pairwise_spaced() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(100)));
        limiter.wait_for_host("example.com").await;

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..2 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.wait_for_host("example.com").await;
                start.elapsed()
            }));
        }

        let mut waits = Vec::new();
        for handle in handles {
            waits.push(handle.await.unwrap());
        }
        waits.sort();

        // Two callers behind the initial stamp dispatch one and two
        // jittered delays later respectively.
        assert!(waits[0] >= Duration::from_millis(80));
        assert!(waits[1] >= Duration::from_millis(170));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        for _ in 0..50 {
            let jittered = jitter(Duration::from_millis(1000));
            assert!(jittered >= Duration::from_millis(900));
            assert!(jittered <= Duration::from_millis(1100));
        }
        // Sub-10ms delays have no jitter applied.
        assert_eq!(jitter(Duration::from_millis(5)), Duration::from_millis(5));
    }
}
