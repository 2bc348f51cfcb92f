//! Per-caller request rate limiting for the dashboard (`SPEC_FULL.md` §4.8:
//! 60/min normal, 10/min for expensive endpoints). Unlike
//! [`sa_clients::RateLimiter`], which blocks until a slot frees up, callers
//! here must be rejected with 429 rather than stalled.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct KeyedRateLimiter {
    calls: usize,
    period: Duration,
    history: Mutex<HashMap<String, Vec<Instant>>>,
}

impl KeyedRateLimiter {
    pub fn new(calls: usize, period: Duration) -> Self {
        Self {
            calls,
            period,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `key` still has a slot in the current window, and
    /// records the attempt either way it counts toward the window.
    pub async fn try_acquire(&self, key: &str) -> bool {
        let mut history = self.history.lock().await;
        let now = Instant::now();
        let entries = history.entry(key.to_string()).or_default();
        entries.retain(|t| now.duration_since(*t) < self.period);
        if entries.len() >= self.calls {
            return false;
        }
        entries.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rejects_once_the_window_is_exhausted() {
        let limiter = KeyedRateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire("caller").await);
        assert!(limiter.try_acquire("caller").await);
        assert!(!limiter.try_acquire("caller").await);
        assert!(limiter.try_acquire("other").await);
    }
}
