//! Cache configuration.
//!
//! Controls collection, notification batching and default variation via the
//! `[cache]` section of `pubcache.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_COLLECT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_NOTIFICATION_BATCH_LIMIT: usize = 100;
const DEFAULT_COLLECT_BATCH_SIZE: usize = 256;

/// Runtime configuration of the published cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Interval (ms) between background collections.
    pub collect_interval_ms: u64,
    /// Maximum queued notifications applied per `process_notifications` call.
    pub notification_batch_limit: usize,
    /// Elements cache entries removed per batch during collection.
    pub collect_batch_size: usize,
    /// Culture used by reads that do not name one.
    pub default_culture: String,
    /// When false, preview tokens are ignored and every snapshot is published-only.
    pub preview_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            collect_interval_ms: DEFAULT_COLLECT_INTERVAL_MS,
            notification_batch_limit: DEFAULT_NOTIFICATION_BATCH_LIMIT,
            collect_batch_size: DEFAULT_COLLECT_BATCH_SIZE,
            default_culture: String::new(),
            preview_enabled: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            collect_interval_ms: settings.collect_interval_ms,
            notification_batch_limit: settings.notification_batch_limit,
            collect_batch_size: settings.collect_batch_size,
            default_culture: settings.default_culture.clone(),
            preview_enabled: settings.preview_enabled,
        }
    }
}

impl CacheConfig {
    pub fn collect_interval(&self) -> Duration {
        Duration::from_millis(self.collect_interval_ms.max(1))
    }

    /// Returns the notification batch limit, clamping to 1 if zero.
    pub fn notification_batch_limit(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.notification_batch_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the collection batch size, clamping to 1 if zero.
    pub fn collect_batch_size(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.collect_batch_size).unwrap_or(NonZeroUsize::MIN)
    }
}
