//! Token-bucket rate limiting
//!
//! Keyed buckets over a concurrent map. Used per source IP at the ingest
//! surface and per provider client inside the pipeline. Budget is consumed
//! before validation, so rejected-but-accepted requests still count.

use std::time::Instant;

use dashmap::DashMap;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Keyed token bucket. `capacity` tokens per key, refilled continuously at
/// `refill_per_sec`.
pub struct TokenBucketLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: f64::from(capacity),
            refill_per_sec,
        }
    }

    /// Bucket sized for `per_minute` requests a minute
    pub fn per_minute(per_minute: u32) -> Self {
        Self::new(per_minute, f64::from(per_minute) / 60.0)
    }

    /// Take one token for `key`; false when the budget is exhausted
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop idle buckets; callers run this periodically
    pub fn evict_full(&self) {
        self.buckets
            .retain(|_, bucket| bucket.tokens < self.capacity - f64::EPSILON);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_and_isolates_keys() {
        let limiter = TokenBucketLimiter::new(3, 0.0);
        assert!(limiter.try_acquire("10.0.0.1"));
        assert!(limiter.try_acquire("10.0.0.1"));
        assert!(limiter.try_acquire("10.0.0.1"));
        assert!(!limiter.try_acquire("10.0.0.1"));
        // Other clients keep their own budget
        assert!(limiter.try_acquire("10.0.0.2"));
    }

    #[test]
    fn refills_over_time() {
        let limiter = TokenBucketLimiter::new(1, 1000.0);
        assert!(limiter.try_acquire("k"));
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(limiter.try_acquire("k"));
    }
}
