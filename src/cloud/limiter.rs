use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/* ============================= TOKEN BUCKET ============================= */

/// Token-bucket rate limiter shared by all calls through one cloud client.
///
/// Capacity (burst) equals the per-minute rate. `acquire` blocks until a
/// token is available or the caller's deadline would be exceeded.
pub struct RateLimiter {
    state: Mutex<Bucket>,
    capacity: f64,
    refill_per_second: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rate_per_minute: u32) -> Self {
        let capacity = rate_per_minute.max(1) as f64;
        Self {
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_second: capacity / 60.0,
        }
    }

    /// Take one token, waiting at most until `deadline` from now.
    ///
    /// Returns false when the bucket cannot supply a token in time.
    pub async fn acquire(&self, deadline: Duration) -> bool {
        let start = Instant::now();
        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                let elapsed = bucket.last_refill.elapsed().as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
                bucket.last_refill = Instant::now();

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return true;
                }

                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_second)
            };

            if start.elapsed() + wait > deadline {
                return false;
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available, after refill.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.state.lock().await;
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.last_refill = Instant::now();
        bucket.tokens
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.acquire(Duration::ZERO).await);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_bucket_fails_at_zero_deadline() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.acquire(Duration::ZERO).await);
        assert!(limiter.acquire(Duration::ZERO).await);
        assert!(!limiter.acquire(Duration::ZERO).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_restores_tokens() {
        let limiter = RateLimiter::new(60); // 1 token per second
        for _ in 0..60 {
            assert!(limiter.acquire(Duration::ZERO).await);
        }
        assert!(!limiter.acquire(Duration::ZERO).await);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.acquire(Duration::ZERO).await);
        assert!(limiter.acquire(Duration::ZERO).await);
        assert!(!limiter.acquire(Duration::ZERO).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_until_refill_within_deadline() {
        let limiter = RateLimiter::new(60); // 1 token per second
        for _ in 0..60 {
            assert!(limiter.acquire(Duration::ZERO).await);
        }
        // Paused clock: the sleep inside acquire auto-advances time.
        assert!(limiter.acquire(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let limiter = RateLimiter::new(10);
        tokio::time::advance(Duration::from_secs(3600)).await;
        let available = limiter.available().await;
        assert!(available <= 10.0);
    }
}
