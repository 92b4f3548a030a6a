//! Tunables for the response cache.

use serde::Deserialize;

use super::policy::{CachePolicy, DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_BYTES, MIN_DURATION_MS};

/// Response cache configuration.
///
/// Every field has a default, so a host application can embed this in its
/// own configuration file and set only what it needs:
///
/// ```
/// use qcache::cache::CacheConfig;
///
/// let config: CacheConfig = serde_json::from_str(r#"{"max_bytes": 1048576}"#).unwrap();
/// assert_eq!(config.max_bytes, 1_048_576);
/// assert_eq!(config.default_max_age_secs, 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Approximate capacity of the in-memory store (key + value bytes).
    pub max_bytes: usize,
    /// Age for cacheable responses that carry an empty hint list.
    pub default_max_age_secs: u64,
    /// Optional cap on any hint.
    pub max_age_ceiling_secs: Option<u64>,
    /// Duration used instead of zero.
    pub min_duration_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            default_max_age_secs: DEFAULT_MAX_AGE_SECS,
            max_age_ceiling_secs: None,
            min_duration_ms: MIN_DURATION_MS,
        }
    }
}

impl CacheConfig {
    /// Returns the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the in-memory store capacity.
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Sets the age used when the hint list is empty.
    #[must_use]
    pub fn with_default_max_age_secs(mut self, secs: u64) -> Self {
        self.default_max_age_secs = secs;
        self
    }

    /// Caps every computed age at `secs`.
    #[must_use]
    pub fn with_max_age_ceiling_secs(mut self, secs: u64) -> Self {
        self.max_age_ceiling_secs = Some(secs);
        self
    }

    /// Sets the duration stored in place of zero.
    #[must_use]
    pub fn with_min_duration_ms(mut self, millis: u64) -> Self {
        self.min_duration_ms = millis;
        self
    }

    /// Returns the freshness policy derived from this configuration.
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            default_max_age_secs: self.default_max_age_secs,
            max_age_ceiling_secs: self.max_age_ceiling_secs,
            min_duration_ms: self.min_duration_ms,
        }
    }
}
