//! Post-execution storage of cacheable responses.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::clock::Clock;
use super::entry::CacheEntry;
use super::fingerprint::Fingerprint;
use super::policy::CachePolicy;
use super::store::KeyValueStore;
use crate::http::{Response, StatusCode};
use crate::query::FreshnessHint;

/// Stores engine responses that carry freshness hints.
#[derive(Clone)]
pub struct CachePopulator {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
}

/// A response body ready for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// Body with top-level `extensions` removed.
    pub payload: String,
    pub duration: Duration,
}

impl CachePopulator {
    /// Creates a populator writing to `store` under `policy`.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, policy: CachePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Marks `response` as a miss and, when the engine attached freshness
    /// hints to a `200` JSON body, stores it under `fingerprint`.
    ///
    /// A stored response is delivered with its extensions stripped, exactly as
    /// later hits will serve it. Anything else is delivered unmodified. Store
    /// failures are logged and never affect the response.
    pub async fn populate(&self, fingerprint: &Fingerprint, mut response: Response) -> Response {
        response.set_header("X-Cache", "MISS");

        if response.status() != StatusCode::Ok {
            return response;
        }
        let Some(prepared) = self.prepare(response.body_ref()) else {
            debug!(%fingerprint, "response not cacheable");
            return response;
        };

        response.set_body(prepared.payload.clone());
        self.store(fingerprint, prepared).await;
        response
    }

    /// Extracts hints from an engine body and computes what would be stored.
    ///
    /// `None` when the body is not a JSON object or carries no
    /// `extensions.cacheControl.hints` list.
    pub fn prepare(&self, body: &[u8]) -> Option<Prepared> {
        let mut doc: Map<String, Value> = serde_json::from_slice(body).ok()?;
        let hints = freshness_hints(&doc)?;
        let duration = self.policy.duration_for(Some(&hints))?;

        doc.remove("extensions");
        let payload = serde_json::to_string(&doc).ok()?;
        Some(Prepared { payload, duration })
    }

    async fn store(&self, fingerprint: &Fingerprint, prepared: Prepared) {
        let duration_ms = u64::try_from(prepared.duration.as_millis()).unwrap_or(u64::MAX);
        let entry = CacheEntry::new(prepared.payload, self.clock.now_millis(), duration_ms);

        let encoded = match entry.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(%fingerprint, error = %e, "failed to encode cache entry");
                return;
            }
        };

        match self
            .store
            .set(fingerprint.as_str(), encoded, Some(prepared.duration))
            .await
        {
            Ok(()) => debug!(%fingerprint, ttl_ms = duration_ms, "response cached"),
            Err(e) => {
                warn!(%fingerprint, store = self.store.name(), error = %e, "cache write failed")
            }
        }
    }
}

fn freshness_hints(doc: &Map<String, Value>) -> Option<Vec<FreshnessHint>> {
    let hints = doc.get("extensions")?.get("cacheControl")?.get("hints")?;
    match serde_json::from_value(hints.clone()) {
        Ok(hints) => Some(hints),
        Err(e) => {
            debug!(error = %e, "ignoring malformed freshness hints");
            None
        }
    }
}
