//! [`WorkQueue`] plus a [`RateLimiter`]: the retry-aware queue the controller
//! works from.

use std::hash::Hash;
use std::time::Duration;

use crate::queue::WorkQueue;
use crate::rate_limit::RateLimiter;

pub struct RateLimitingQueue<K> {
    queue: WorkQueue<K>,
    limiter: Box<dyn RateLimiter<K>>,
}

impl<K> RateLimitingQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(limiter: Box<dyn RateLimiter<K>>) -> Self {
        Self {
            queue: WorkQueue::new(),
            limiter,
        }
    }

    pub fn add(&self, key: K) {
        self.queue.add(key);
    }

    pub fn add_after(&self, key: K, delay: Duration) {
        self.queue.add_after(key, delay);
    }

    /// Re-queue `key` after the limiter's delay and count one more failure.
    /// Returns the delay applied.
    pub fn add_rate_limited(&self, key: K) -> Duration {
        let delay = self.limiter.when(&key);
        self.queue.add_after(key, delay);
        delay
    }

    pub async fn get(&self) -> Option<K> {
        self.queue.get().await
    }

    pub fn done(&self, key: &K) {
        self.queue.done(key);
    }

    /// Reset the retry counter for `key`.
    pub fn forget(&self, key: &K) {
        self.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.limiter.num_requeues(key)
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    pub fn parked(&self) -> usize {
        self.queue.parked()
    }
}
