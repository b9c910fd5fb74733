//! Retry delay policies.
//!
//! A [`RateLimiter`] answers "how long should this key wait before its next
//! attempt?" and owns the per-key failure counters that answer come from.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(5);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(1000);
pub const DEFAULT_BUCKET_QPS: f64 = 10.0;
pub const DEFAULT_BUCKET_BURST: u32 = 100;
/// Longest wait the bucket hands out, however small `qps` is.
pub const MAX_BUCKET_WAIT: Duration = DEFAULT_BACKOFF_MAX;

pub trait RateLimiter<K>: Send + Sync {
    /// Delay before `key` may be retried. Counts as one more failure.
    fn when(&self, key: &K) -> Duration;

    /// Clear everything tracked for `key`.
    fn forget(&self, key: &K);

    /// Consecutive failures recorded for `key`.
    fn num_requeues(&self, key: &K) -> u32;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Per-item exponential backoff
// ---------------------------------------------------------------------------

/// `base * 2^failures`, capped at `max`.
pub struct ItemExponentialBackoff<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> ItemExponentialBackoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Delay for the `failures`-th consecutive failure.
    pub fn delay_for(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl<K: Eq + Hash + Clone + Send> RateLimiter<K> for ItemExponentialBackoff<K> {
    fn when(&self, key: &K) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.clone()).or_insert(0);
        let delay = self.delay_for(*count);
        *count = count.saturating_add(1);
        delay
    }

    fn forget(&self, key: &K) {
        lock(&self.failures).remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Global token bucket
// ---------------------------------------------------------------------------

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Key-independent limit on overall retry throughput: `burst` retries go
/// through at once, after that one every `1/qps` seconds.
pub struct TokenBucket {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: if qps > 0.0 { qps } else { DEFAULT_BUCKET_QPS },
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Take one token, returning how long the caller must wait for it.
    fn reserve(&self) -> Duration {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps)
                .map_or(MAX_BUCKET_WAIT, |wait| wait.min(MAX_BUCKET_WAIT))
        }
    }
}

impl<K> RateLimiter<K> for TokenBucket {
    fn when(&self, _key: &K) -> Duration {
        self.reserve()
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

// ---------------------------------------------------------------------------
// Combinator
// ---------------------------------------------------------------------------

/// The strictest of several limiters.
pub struct MaxOf<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOf<K> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOf<K> {
    fn when(&self, key: &K) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &K) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_then_caps() {
        let limiter = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_millis(60));
        let delays: Vec<_> = (0..6).map(|_| limiter.when(&"k")).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(5),
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(60),
                Duration::from_millis(60),
            ]
        );
        assert_eq!(limiter.num_requeues(&"k"), 6);
    }

    #[test]
    fn exponential_overflow_saturates_at_max() {
        let limiter = ItemExponentialBackoff::<&str>::new(Duration::from_secs(1), Duration::from_secs(1000));
        assert_eq!(limiter.delay_for(40), Duration::from_secs(1000));
        assert_eq!(limiter.delay_for(u32::MAX), Duration::from_secs(1000));
    }

    #[test]
    fn exponential_tracks_keys_independently() {
        let limiter = ItemExponentialBackoff::new(Duration::from_millis(1), Duration::from_secs(1));
        limiter.when(&"a");
        limiter.when(&"a");
        limiter.when(&"b");
        assert_eq!(limiter.num_requeues(&"a"), 2);
        assert_eq!(limiter.num_requeues(&"b"), 1);
        limiter.forget(&"a");
        assert_eq!(limiter.num_requeues(&"a"), 0);
        assert_eq!(limiter.when(&"a"), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_allows_burst_then_spaces_out() {
        let bucket = TokenBucket::new(10.0, 3);
        let delays: Vec<Duration> = (0..5).map(|_| RateLimiter::<&str>::when(&bucket, &"k")).collect();
        assert_eq!(&delays[..3], &[Duration::ZERO; 3]);
        assert_eq!(delays[3], Duration::from_millis(100));
        assert_eq!(delays[4], Duration::from_millis(200));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(RateLimiter::<&str>::when(&bucket, &"k"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_qps_waits_are_capped() {
        let bucket = TokenBucket::new(1e-300, 1);
        assert_eq!(RateLimiter::<&str>::when(&bucket, &"k"), Duration::ZERO);
        assert_eq!(RateLimiter::<&str>::when(&bucket, &"k"), MAX_BUCKET_WAIT);
        assert_eq!(RateLimiter::<&str>::when(&bucket, &"k"), MAX_BUCKET_WAIT);
    }

    #[test]
    fn max_of_takes_strictest() {
        let limiters: Vec<Box<dyn RateLimiter<&str>>> = vec![
            Box::new(ItemExponentialBackoff::<&str>::new(
                Duration::from_millis(1),
                Duration::from_secs(1),
            )),
            Box::new(ItemExponentialBackoff::<&str>::new(
                Duration::from_millis(7),
                Duration::from_secs(1),
            )),
        ];
        let limiter = MaxOf::new(limiters);
        assert_eq!(limiter.when(&"k"), Duration::from_millis(7));
        assert_eq!(limiter.num_requeues(&"k"), 1);
        limiter.forget(&"k");
        assert_eq!(limiter.num_requeues(&"k"), 0);
    }
}
