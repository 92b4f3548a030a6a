//! Pre-execution lookup: serve from cache or let the engine run.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use super::clock::Clock;
use super::entry::CacheEntry;
use super::fingerprint::{Fingerprint, PersistedQuery};
use super::store::KeyValueStore;
use crate::http::{Method, Response, StatusCode};
use crate::query::QueryRequest;

/// How a request relates to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// `POST` carrying query text.
    Payload(Fingerprint),
    /// `GET` carrying a persisted-query descriptor.
    Persisted {
        fingerprint: Fingerprint,
        has_payload: bool,
    },
    /// Not cacheable.
    Bypass,
}

impl Lookup {
    /// Classifies a request by method, query text and descriptor.
    pub fn classify(request: &QueryRequest) -> Self {
        match request.method() {
            Method::Post => match request.query() {
                Some(query) => Self::Payload(Fingerprint::from_payload(query)),
                None => Self::Bypass,
            },
            Method::Get => match PersistedQuery::from_extensions(request.extensions()) {
                Ok(Some(descriptor)) => Self::Persisted {
                    fingerprint: Fingerprint::from_descriptor(&descriptor),
                    has_payload: request.query().is_some(),
                },
                Ok(None) => Self::Bypass,
                Err(e) => {
                    debug!(error = %e, "ignoring persisted query descriptor");
                    Self::Bypass
                }
            },
            _ => Self::Bypass,
        }
    }

    /// Returns the key to look up, or `None` for [`Lookup::Bypass`].
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            Self::Payload(fingerprint) | Self::Persisted { fingerprint, .. } => Some(fingerprint),
            Self::Bypass => None,
        }
    }
}

/// Outcome of the gate for one request.
#[derive(Debug)]
pub enum GateDecision {
    /// Terminal response; the engine must not run.
    Respond(Response),
    /// Run the engine. With a fingerprint, the result is a candidate for
    /// storage under it.
    Continue(Option<Fingerprint>),
}

/// Body returned when a descriptor-only `GET` misses.
pub const PERSISTED_QUERY_NOT_FOUND: &str = "PersistedQueryNotFound";

/// Looks requests up before execution.
#[derive(Clone)]
pub struct CacheGate {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl CacheGate {
    /// Creates a gate reading from `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Decides whether `request` is served from cache.
    ///
    /// 1. `POST` with query text: hit → stored payload with `X-Cache: HIT`.
    /// 2. `GET` with a descriptor: hit → stored payload with `X-Cache: HIT`
    ///    and a `Cache-Control` advertising the remaining freshness.
    /// 3. `GET` with a descriptor, miss, no query text → `PersistedQueryNotFound`.
    /// 4. Anything else continues to the engine.
    ///
    /// Store failures count as misses.
    pub async fn check(&self, request: &QueryRequest) -> GateDecision {
        match Lookup::classify(request) {
            Lookup::Bypass => GateDecision::Continue(None),
            Lookup::Payload(fingerprint) => match self.lookup(&fingerprint).await {
                Some(entry) => GateDecision::Respond(hit(entry)),
                None => GateDecision::Continue(Some(fingerprint)),
            },
            Lookup::Persisted {
                fingerprint,
                has_payload,
            } => match self.lookup(&fingerprint).await {
                Some(entry) => {
                    let remaining = entry.remaining_secs(self.clock.now_millis());
                    let mut response = hit(entry);
                    response.set_header(
                        "Cache-Control",
                        format!("public, max-age={remaining}, s-maxage={remaining}"),
                    );
                    GateDecision::Respond(response)
                }
                None if has_payload => GateDecision::Continue(Some(fingerprint)),
                None => {
                    debug!(%fingerprint, "persisted query not found");
                    GateDecision::Respond(persisted_query_not_found())
                }
            },
        }
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let raw = match self.store.get(fingerprint.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(%fingerprint, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(%fingerprint, store = self.store.name(), error = %e, "cache read failed; treating as miss");
                return None;
            }
        };

        match CacheEntry::decode(&raw) {
            Ok(entry) => {
                debug!(%fingerprint, "cache hit");
                Some(entry)
            }
            Err(e) => {
                warn!(%fingerprint, error = %e, "undecodable cache entry; treating as miss");
                None
            }
        }
    }
}

fn hit(entry: CacheEntry) -> Response {
    Response::json(StatusCode::Ok, entry.payload).header("X-Cache", "HIT")
}

fn persisted_query_not_found() -> Response {
    let body = json!({ "errors": [{ "message": PERSISTED_QUERY_NOT_FOUND }] });
    Response::json(StatusCode::Ok, body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Down;

    #[async_trait]
    impl KeyValueStore for Down {
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _: &str, _: String, _: Option<Duration>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn name(&self) -> &'static str {
            "down"
        }
    }

    fn descriptor_ext() -> serde_json::Value {
        json!({"persistedQuery": {"version": "1", "sha256Hash": "abc"}})
    }

    fn gate() -> (CacheGate, Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let store = Arc::new(MemoryStore::with_clock(10_000, Arc::new(clock.clone())));
        (CacheGate::new(store.clone(), Arc::new(clock.clone())), store, clock)
    }

    async fn seed(store: &MemoryStore, key: &str, entry: CacheEntry) {
        let ttl = Duration::from_millis(entry.duration_ms);
        store.set(key, entry.encode().unwrap(), Some(ttl)).await.unwrap();
    }

    fn body(response: &Response) -> &str {
        std::str::from_utf8(response.body_ref()).unwrap()
    }

    #[test]
    fn classification() {
        let post = QueryRequest::new(Method::Post).with_query("{ a }");
        assert_eq!(Lookup::classify(&post), Lookup::Payload(Fingerprint::from_payload("{a}")));

        let get = QueryRequest::new(Method::Get).with_extensions(descriptor_ext());
        assert_eq!(
            Lookup::classify(&get),
            Lookup::Persisted {
                fingerprint: Fingerprint::from_descriptor(&PersistedQuery::new("1", "abc")),
                has_payload: false,
            }
        );

        let get_plain = QueryRequest::new(Method::Get).with_query("{ a }");
        assert_eq!(Lookup::classify(&get_plain), Lookup::Bypass);

        let post_descriptor_only = QueryRequest::new(Method::Post).with_extensions(descriptor_ext());
        assert_eq!(Lookup::classify(&post_descriptor_only), Lookup::Bypass);

        let malformed = QueryRequest::new(Method::Get)
            .with_extensions(json!({"persistedQuery": {"version": "1"}}));
        assert_eq!(Lookup::classify(&malformed), Lookup::Bypass);
    }

    #[tokio::test]
    async fn post_hit_short_circuits_without_cache_control() {
        let (gate, store, clock) = gate();
        let fp = Fingerprint::from_payload("{ a }");
        seed(&store, fp.as_str(), CacheEntry::new(r#"{"data":1}"#, clock.now_millis(), 60_000)).await;

        let decision = gate.check(&QueryRequest::new(Method::Post).with_query("{a}")).await;
        let GateDecision::Respond(response) = decision else {
            panic!("expected a hit");
        };
        assert_eq!(response.headers().get("x-cache"), Some("HIT"));
        assert_eq!(response.headers().get("cache-control"), None);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert_eq!(body(&response), r#"{"data":1}"#);
    }

    #[tokio::test]
    async fn post_miss_continues_with_fingerprint() {
        let (gate, _, _) = gate();
        let decision = gate.check(&QueryRequest::new(Method::Post).with_query("{ a }")).await;
        assert!(matches!(
            decision,
            GateDecision::Continue(Some(fp)) if fp == Fingerprint::from_payload("{a}")
        ));
    }

    #[tokio::test]
    async fn get_hit_advertises_remaining_freshness() {
        let (gate, store, clock) = gate();
        seed(&store, "1.abc", CacheEntry::new(r#"{"data":2}"#, clock.now_millis(), 60_000)).await;
        clock.advance(Duration::from_millis(15_400));

        let request = QueryRequest::new(Method::Get).with_extensions(descriptor_ext());
        let GateDecision::Respond(response) = gate.check(&request).await else {
            panic!("expected a hit");
        };
        assert_eq!(response.headers().get("x-cache"), Some("HIT"));
        assert_eq!(
            response.headers().get("cache-control"),
            Some("public, max-age=45, s-maxage=45")
        );
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert_eq!(body(&response), r#"{"data":2}"#);
    }

    #[tokio::test]
    async fn get_descriptor_only_miss_is_not_found() {
        let (gate, _, _) = gate();
        let request = QueryRequest::new(Method::Get).with_extensions(descriptor_ext());
        let GateDecision::Respond(response) = gate.check(&request).await else {
            panic!("expected not found");
        };
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert_eq!(response.headers().get("x-cache"), None);
        assert_eq!(body(&response), r#"{"errors":[{"message":"PersistedQueryNotFound"}]}"#);
    }

    #[tokio::test]
    async fn get_descriptor_with_query_miss_continues() {
        let (gate, _, _) = gate();
        let request = QueryRequest::new(Method::Get)
            .with_query("{ a }")
            .with_extensions(descriptor_ext());
        assert!(matches!(
            gate.check(&request).await,
            GateDecision::Continue(Some(fp)) if fp.as_str() == "1.abc"
        ));
    }

    #[tokio::test]
    async fn store_failure_is_a_miss() {
        let gate = CacheGate::new(Arc::new(Down), Arc::new(ManualClock::default()));
        let decision = gate.check(&QueryRequest::new(Method::Post).with_query("{ a }")).await;
        assert!(matches!(decision, GateDecision::Continue(Some(_))));
    }

    #[tokio::test]
    async fn garbage_entry_is_a_miss() {
        let (gate, store, _) = gate();
        store.set("1.abc", "not json".into(), None).await.unwrap();
        let request = QueryRequest::new(Method::Get)
            .with_query("{ a }")
            .with_extensions(descriptor_ext());
        assert!(matches!(gate.check(&request).await, GateDecision::Continue(Some(_))));
    }
}
