//! Token-bucket rate limiter (`SPEC_FULL.md` §4.1): `calls` requests per
//! `period`, parameterized per service (SafetyAmp 60/61s, Samsara 25/1s).

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    calls: usize,
    period: Duration,
    history: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(calls: usize, period: Duration) -> Self {
        Self {
            calls,
            period,
            history: Mutex::new(VecDeque::with_capacity(calls)),
        }
    }

    /// Blocks until a slot within the current window is available, then
    /// records the acquisition.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut history = self.history.lock().await;
                let now = Instant::now();
                while let Some(&front) = history.front() {
                    if now.duration_since(front) >= self.period {
                        history.pop_front();
                    } else {
                        break;
                    }
                }
                if history.len() < self.calls {
                    history.push_back(now);
                    None
                } else {
                    let oldest = *history.front().unwrap();
                    Some(self.period - now.duration_since(oldest))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_calls_up_to_the_bucket_then_waits() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now(), start);
        limiter.acquire().await;
        assert!(Instant::now() >= start + Duration::from_secs(1));
    }
}
