//! Engine configuration.
//!
//! Provides `EngineConfig`, the tunables for scheduling, batching and retry
//! backoff. Values are plain milliseconds so the JSON form stays readable.

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Exponential backoff with jitter for failed outbox entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Failures after which an entry is surfaced as permanent
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_delay_ms: 5 * 60 * 1_000,
            max_retries: 8,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the delay after the `retry_count`-th failure (1-based).
    pub fn ceiling(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1_u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let ceiling = u64::try_from(self.ceiling(retry_count).as_millis()).unwrap_or(u64::MAX);
        let half = ceiling / 2;
        let jitter = rand::rng().random_range(0..=ceiling - half);
        Duration::from_millis(half + jitter)
    }

    /// Whether `retry_count` failures exhaust the policy.
    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

/// Tunables for the sync engine and its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Periodic sync interval; `0` disables the timer trigger
    pub sync_interval_ms: u64,
    /// How long connectivity must stay up before "online" is published
    pub network_quiet_period_ms: u64,
    /// Timeout applied to every pull/push call
    pub request_timeout_ms: u64,
    /// Maximum entries per push batch
    pub push_batch_max_items: usize,
    /// Maximum serialized payload bytes per push batch
    pub push_batch_max_bytes: usize,
    /// Pull pages processed per cycle before yielding to the next trigger
    pub max_pull_pages: usize,
    /// Push batches sent per cycle
    pub max_push_batches: usize,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 60_000,
            network_quiet_period_ms: 3_000,
            request_timeout_ms: 15_000,
            push_batch_max_items: 50,
            push_batch_max_bytes: 256 * 1024,
            max_pull_pages: 20,
            max_push_batches: 20,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_ms > 0).then(|| Duration::from_millis(self.sync_interval_ms))
    }

    pub const fn network_quiet_period(&self) -> Duration {
        Duration::from_millis(self.network_quiet_period_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid engine config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|error| match error {
            Error::Config(message) => Error::Config(format!("{}: {message}", path.display())),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".to_string()));
        }
        if self.push_batch_max_items == 0 || self.push_batch_max_bytes == 0 {
            return Err(Error::Config("push batch limits must be positive".to_string()));
        }
        if self.max_pull_pages == 0 || self.max_push_batches == 0 {
            return Err(Error::Config(
                "max_pull_pages and max_push_batches must be positive".to_string(),
            ));
        }
        if self.retry.base_delay_ms == 0 || self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(
                "retry.base_delay_ms must be positive and not exceed retry.max_delay_ms"
                    .to_string(),
            ));
        }
        if self.retry.max_retries == 0 {
            return Err(Error::Config("retry.max_retries must be positive".to_string()));
        }
        Ok(())
    }
}
