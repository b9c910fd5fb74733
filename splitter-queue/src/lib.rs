//! # splitter-queue
//!
//! Work queue for level-triggered controllers.
//!
//! [`WorkQueue`] guarantees that a key is never pending twice and never
//! handed to two workers at once, and that a key added while in flight is
//! delivered again once the worker calls `done`. [`RateLimitingQueue`] adds
//! per-key retry counting and backoff through a [`RateLimiter`].

pub mod queue;
pub mod rate_limit;
pub mod rate_limited;

pub use queue::WorkQueue;
pub use rate_limit::{
    ItemExponentialBackoff, MaxOf, RateLimiter, TokenBucket, DEFAULT_BACKOFF_BASE,
    DEFAULT_BACKOFF_MAX, DEFAULT_BUCKET_BURST, DEFAULT_BUCKET_QPS, MAX_BUCKET_WAIT,
};
pub use rate_limited::RateLimitingQueue;
