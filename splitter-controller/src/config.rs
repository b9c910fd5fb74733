//! Controller tuning knobs.
//!
//! Loaded from YAML; every field is optional and falls back to the default
//! shown below. Unknown keys are rejected so typos do not silently fall
//! back to defaults.
//!
//! ```yaml
//! workers: 2
//! max_retries: 5
//! resync_period_secs: 36000
//! backoff_base_ms: 5
//! backoff_max_secs: 1000
//! bucket_qps: 10.0
//! bucket_burst: 100
//! relist_backoff_ms: 1000
//! relist_backoff_max_secs: 30
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use splitter_core::ObjectKey;
use splitter_queue::{
    ItemExponentialBackoff, MaxOf, RateLimiter, TokenBucket, DEFAULT_BACKOFF_BASE,
    DEFAULT_BACKOFF_MAX, DEFAULT_BUCKET_BURST, DEFAULT_BUCKET_QPS,
};

use crate::error::{io_err, ControllerError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub workers: usize,
    /// Failed attempts re-queued before a key is dropped and reported.
    pub max_retries: u32,
    pub resync_period_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    pub bucket_qps: f64,
    pub bucket_burst: u32,
    pub relist_backoff_ms: u64,
    pub relist_backoff_max_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_retries: 5,
            resync_period_secs: 10 * 60 * 60,
            backoff_base_ms: u64::try_from(DEFAULT_BACKOFF_BASE.as_millis()).unwrap_or(u64::MAX),
            backoff_max_secs: DEFAULT_BACKOFF_MAX.as_secs(),
            bucket_qps: DEFAULT_BUCKET_QPS,
            bucket_burst: DEFAULT_BUCKET_BURST,
            relist_backoff_ms: 1000,
            relist_backoff_max_secs: 30,
        }
    }
}

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self, ControllerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ControllerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "workers must be at least 1".into(),
            ));
        }
        let qps_ok = self.bucket_qps.is_finite() && self.bucket_qps > 0.0;
        if !qps_ok {
            return Err(ControllerError::InvalidConfig(format!(
                "bucket_qps must be a positive number, got {}",
                self.bucket_qps
            )));
        }
        if self.bucket_burst == 0 {
            return Err(ControllerError::InvalidConfig(
                "bucket_burst must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    pub fn relist_backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.relist_backoff_ms),
            Duration::from_secs(self.relist_backoff_max_secs),
        )
    }

    /// Per-key exponential backoff combined with the global token bucket.
    pub fn rate_limiter(&self) -> MaxOf<ObjectKey> {
        let limiters: Vec<Box<dyn RateLimiter<ObjectKey>>> = vec![
            Box::new(ItemExponentialBackoff::<ObjectKey>::new(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_secs(self.backoff_max_secs),
            )),
            Box::new(TokenBucket::new(self.bucket_qps, self.bucket_burst)),
        ];
        MaxOf::new(limiters)
    }
}
