//! The value stored per fingerprint.

use serde::{Deserialize, Serialize};

/// A stored response. Written once by the populator, only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Response body as delivered to the client, extensions stripped.
    pub payload: String,
    /// Write time, milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Freshness lifetime from `created_at`.
    pub duration_ms: u64,
}

impl CacheEntry {
    /// Creates an entry written at `created_at` that stays fresh for `duration_ms`.
    pub fn new(payload: impl Into<String>, created_at: u64, duration_ms: u64) -> Self {
        Self {
            payload: payload.into(),
            created_at,
            duration_ms,
        }
    }

    /// Whole seconds of freshness left at `now`, rounded to nearest and never
    /// negative.
    pub fn remaining_secs(&self, now: u64) -> u64 {
        let elapsed = now.saturating_sub(self.created_at) as f64;
        let remaining = ((self.duration_ms as f64 - elapsed) / 1_000.0).round();
        if remaining > 0.0 { remaining as u64 } else { 0 }
    }

    /// Serializes the entry for the store.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses an entry previously produced by [`encode`](Self::encode).
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_rounds_to_nearest_second() {
        let entry = CacheEntry::new("{}", 10_000, 60_000);
        assert_eq!(entry.remaining_secs(10_000), 60);
        assert_eq!(entry.remaining_secs(20_400), 50);
        assert_eq!(entry.remaining_secs(20_500), 50);
        assert_eq!(entry.remaining_secs(20_600), 49);
    }

    #[test]
    fn remaining_never_negative() {
        let entry = CacheEntry::new("{}", 0, 1_000);
        assert_eq!(entry.remaining_secs(5_000), 0);
    }

    #[test]
    fn encoded_with_camel_case_fields() {
        let entry = CacheEntry::new(r#"{"data":1}"#, 5, 1_000);
        let raw = entry.encode().unwrap();
        assert!(raw.contains(r#""createdAt":5"#));
        assert!(raw.contains(r#""durationMs":1000"#));
        assert_eq!(CacheEntry::decode(&raw).unwrap(), entry);
    }
}
