//! Fixed-window request counters keyed by peer address, or by the actor
//! once a bearer token has authenticated it.
//!
//! Counters are process-local: two server processes each enforce the limit
//! on their own, so the effective limit across a fleet is a multiple of the
//! configured one. The map starts empty and expired windows are swept
//! periodically.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    counters: DashMap<String, Window>,
}

impl RateLimiter {
    /// `limit` requests per `window`; a limit of 0 disables limiting.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            counters: DashMap::new(),
        }
    }

    /// Count one request for `key`. On refusal returns the seconds until the
    /// window resets.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), u64> {
        if self.limit == 0 {
            return Ok(());
        }
        let mut entry = self.counters.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        if entry.count >= self.limit {
            let remaining = self.window.saturating_sub(now.duration_since(entry.started));
            return Err(remaining.as_secs().max(1));
        }
        entry.count += 1;
        Ok(())
    }

    /// Drop every window that has expired.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let before = self.counters.len();
        self.counters
            .retain(|_, w| now.duration_since(w.started) < self.window);
        before.saturating_sub(self.counters.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }

    /// Sweep on a timer until the returned task is aborted.
    pub fn spawn_sweeper(limiter: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "swept rate limit windows");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit_then_refuses() {
        let rl = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(rl.check_at("alice", now).is_ok());
        }
        let retry = rl.check_at("alice", now).unwrap_err();
        assert!((1..=60).contains(&retry));
        assert!(rl.check_at("bob", now).is_ok());
    }

    #[test]
    fn test_window_resets() {
        let rl = RateLimiter::new(1, Duration::from_secs(10));
        let now = Instant::now();
        assert!(rl.check_at("a", now).is_ok());
        assert!(rl.check_at("a", now).is_err());
        assert!(rl.check_at("a", now + Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_zero_limit_disables() {
        let rl = RateLimiter::new(0, Duration::from_secs(1));
        for _ in 0..100 {
            assert!(rl.check("a").is_ok());
        }
        assert_eq!(rl.tracked_keys(), 0);
    }

    #[test]
    fn test_sweep_removes_expired_windows() {
        let rl = RateLimiter::new(5, Duration::from_secs(10));
        let now = Instant::now();
        rl.check_at("old", now).unwrap();
        rl.check_at("new", now + Duration::from_secs(8)).unwrap();
        assert_eq!(rl.sweep_at(now + Duration::from_secs(12)), 1);
        assert_eq!(rl.tracked_keys(), 1);
    }
}
