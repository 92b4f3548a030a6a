//! Freshness policy: how long a response may be served from cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::query::FreshnessHint;

/// Age used when the engine marks a response cacheable but reports no hints.
pub const DEFAULT_MAX_AGE_SECS: u64 = 60;

/// Floor applied when the smallest hint is zero. A zero-second entry would
/// make every concurrent request for the same key miss and re-execute.
pub const MIN_DURATION_MS: u64 = 1_000;

/// Default capacity of the in-memory store, in approximate bytes.
pub const DEFAULT_MAX_BYTES: usize = 50_000_000;

/// Turns engine freshness hints into a storage duration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use qcache::cache::CachePolicy;
/// use qcache::query::FreshnessHint;
///
/// let policy = CachePolicy::default();
/// let hints = [FreshnessHint::new(65), FreshnessHint::new(120)];
/// assert_eq!(policy.duration_for(Some(&hints)), Some(Duration::from_secs(65)));
/// assert_eq!(policy.duration_for(Some(&[])), Some(Duration::from_secs(60)));
/// assert_eq!(policy.duration_for(Some(&[FreshnessHint::new(0)])), Some(Duration::from_secs(1)));
/// assert_eq!(policy.duration_for(None), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub default_max_age_secs: u64,
    /// Upper bound folded into the minimum when set.
    pub max_age_ceiling_secs: Option<u64>,
    pub min_duration_ms: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            default_max_age_secs: DEFAULT_MAX_AGE_SECS,
            max_age_ceiling_secs: None,
            min_duration_ms: MIN_DURATION_MS,
        }
    }
}

impl CachePolicy {
    /// Storage duration for a response carrying `hints`.
    ///
    /// `None` hints means the engine opted out and nothing is stored. Otherwise
    /// the result is the smallest `maxAge` (the default when the list is
    /// empty, capped by the ceiling when one is configured), with zero raised
    /// to the floor.
    pub fn duration_for(&self, hints: Option<&[FreshnessHint]>) -> Option<Duration> {
        let hints = hints?;
        let smallest = hints.iter().map(|hint| hint.max_age).min();
        let mut min_age = smallest.unwrap_or(self.default_max_age_secs);
        if let Some(ceiling) = self.max_age_ceiling_secs {
            min_age = min_age.min(ceiling);
        }

        let millis = min_age.saturating_mul(1_000);
        Some(Duration::from_millis(if millis == 0 {
            self.min_duration_ms
        } else {
            millis
        }))
    }
}
