//! Global token-bucket rate limiter.
//!
//! Capacity and refill rate are both `rate` tokens/second, shared by all
//! workers. `rate == 0` disables limiting entirely.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

struct Bucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
    available: Condvar,
}

impl Bucket {
    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
    }

    fn acquire(&self) {
        let mut state = self.state.lock();
        loop {
            self.refill(&mut state);
            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }
            let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.rate);
            self.available.wait_for(&mut state, wait);
        }
    }

    fn try_acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            self.refill(&mut state);
            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
                .min(deadline.duration_since(now));
            self.available.wait_for(&mut state, wait);
        }
    }
}

/// Token bucket dispensing one token per submission.
pub struct RateLimiter {
    bucket: Option<Bucket>,
}

impl RateLimiter {
    /// `rate` is ops/second; 0 means unlimited.
    pub fn new(rate: u64) -> Self {
        let bucket = (rate > 0).then(|| Bucket {
            rate: rate as f64,
            capacity: rate as f64,
            state: Mutex::new(BucketState {
                tokens: rate as f64,
                last_refill: Instant::now(),
            }),
            available: Condvar::new(),
        });
        Self { bucket }
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }

    /// Blocks until one token is available.
    pub fn acquire(&self) {
        if let Some(bucket) = &self.bucket {
            bucket.acquire();
        }
    }

    /// Acquires one token, giving up after `timeout`.
    pub fn try_acquire(&self, timeout: Duration) -> bool {
        match &self.bucket {
            Some(bucket) => bucket.try_acquire(timeout),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_blocks() {
        let limiter = RateLimiter::new(0);
        assert!(limiter.is_unlimited());
        let start = Instant::now();
        for _ in 0..100_000 {
            limiter.acquire();
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_burst_up_to_capacity() {
        let limiter = RateLimiter::new(1_000);
        let start = Instant::now();
        // The bucket starts full, so the first `rate` tokens are free.
        for _ in 0..1_000 {
            limiter.acquire();
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_acquire_paces_beyond_burst() {
        let limiter = RateLimiter::new(1_000);
        for _ in 0..1_000 {
            limiter.acquire();
        }
        // Bucket is now empty; 200 more tokens need ~200ms.
        let start = Instant::now();
        for _ in 0..200 {
            limiter.acquire();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "elapsed {:?}", elapsed);
    }

    #[test]
    fn test_try_acquire_times_out_when_drained() {
        let limiter = RateLimiter::new(10);
        for _ in 0..10 {
            limiter.acquire();
        }
        assert!(!limiter.try_acquire(Duration::from_millis(10)));
        assert!(limiter.try_acquire(Duration::from_millis(500)));
    }

    #[test]
    fn test_shared_across_threads() {
        let limiter = std::sync::Arc::new(RateLimiter::new(2_000));
        // Drain the initial burst.
        for _ in 0..2_000 {
            limiter.acquire();
        }
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = std::sync::Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    limiter.acquire();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        // 400 tokens at 2000/s is at least ~200ms.
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
