//! Token-bucket limiter shared by every REST call of one venue.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: Instant,
}

/// Refills at `rate_per_sec` up to `burst`; callers queue on an async mutex.
#[derive(Debug)]
pub struct TokenBucket {
    rate_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            rate_per_sec,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Wait until `cost` tokens are available and take them.
    pub async fn acquire(&self, cost: f64) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(state.last).as_secs_f64();
            state.last = now;
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);

            if state.tokens >= cost {
                state.tokens -= cost;
                return;
            }

            let deficit = cost - state.tokens;
            tokio::time::sleep(Duration::from_secs_f64(deficit / self.rate_per_sec.max(1e-9))).await;
        }
    }

    /// Tokens currently available, without refilling.
    pub async fn available(&self) -> f64 {
        self.state.lock().await.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_served_immediately() {
        let bucket = TokenBucket::new(1.0, 3.0);
        let start = std::time::Instant::now();
        for _ in 0..3 {
            bucket.acquire(1.0).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(bucket.available().await < 1.0);
    }

    #[tokio::test]
    async fn empty_bucket_waits_for_refill() {
        let bucket = TokenBucket::new(50.0, 1.0);
        bucket.acquire(1.0).await;
        let start = std::time::Instant::now();
        bucket.acquire(1.0).await;
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
