//! Response caching in front of the query engine.
//!
//! The cache is two explicit stages around the engine:
//!
//! - [`CacheGate`] runs first and either answers from the store or lets the
//!   request continue, handing over the [`Fingerprint`] it looked up.
//! - [`CachePopulator`] runs on the engine's response and stores it under
//!   that fingerprint when the engine attached freshness hints.
//!
//! [`ResponseCache`] builds both over one injected [`KeyValueStore`] and
//! composes them as a pipeline [`Middleware`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use qcache::cache::{CacheConfig, ResponseCache};
//! use qcache::middleware::{LoggerMiddleware, Pipeline};
//! use qcache::query::{engine_handler, ExecutionResult, QueryEngine, QueryRequest};
//!
//! struct Books;
//!
//! #[async_trait::async_trait]
//! impl QueryEngine for Books {
//!     async fn execute(&self, _: &QueryRequest) -> ExecutionResult {
//!         ExecutionResult::data(serde_json::json!({"books": []}))
//!     }
//! }
//!
//! let pipeline = Pipeline::new()
//!     .with(LoggerMiddleware)
//!     .with(ResponseCache::in_memory(&CacheConfig::default()))
//!     .with_handler(engine_handler(Arc::new(Books)));
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::middleware::{BoxResponseFuture, Middleware, Next};
use crate::query::QueryRequest;

pub mod clock;
pub mod config;
pub mod entry;
pub mod fingerprint;
pub mod gate;
pub mod policy;
pub mod populator;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use fingerprint::{Fingerprint, FingerprintError, PersistedQuery};
pub use gate::{CacheGate, GateDecision, Lookup, PERSISTED_QUERY_NOT_FOUND};
pub use policy::{CachePolicy, DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_BYTES, MIN_DURATION_MS};
pub use populator::CachePopulator;
pub use store::{KeyValueStore, MemoryStore, StoreError};

/// Gate and populator sharing one store, usable as pipeline middleware.
#[derive(Clone)]
pub struct ResponseCache {
    gate: CacheGate,
    populator: CachePopulator,
}

impl ResponseCache {
    /// Creates a cache over `store` using the system clock.
    pub fn new(store: Arc<dyn KeyValueStore>, config: &CacheConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Creates a cache over `store` with an explicit clock.
    pub fn with_clock(store: Arc<dyn KeyValueStore>, config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            gate: CacheGate::new(Arc::clone(&store), Arc::clone(&clock)),
            populator: CachePopulator::new(store, clock, config.policy()),
        }
    }

    /// A cache over a fresh [`MemoryStore`] sized by `config.max_bytes`.
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new(config.max_bytes)), config)
    }
}

impl Middleware for ResponseCache {
    /// Gate → next stage → populator.
    ///
    /// Requests that cannot be read as a query operation pass through
    /// untouched; the engine stage reports the problem. The parsed operation
    /// is attached to the context so the engine stage does not parse again.
    fn handle(&self, mut ctx: Context, next: Next) -> BoxResponseFuture {
        let cache = self.clone();

        Box::pin(async move {
            let operation = match QueryRequest::from_http(ctx.request()) {
                Ok(operation) => operation,
                Err(e) => {
                    debug!(error = %e, "not a query operation; bypassing cache");
                    return next.run(ctx).await;
                }
            };

            let fingerprint = match cache.gate.check(&operation).await {
                GateDecision::Respond(response) => return response,
                GateDecision::Continue(fingerprint) => fingerprint,
            };

            ctx.extensions_mut().insert(operation);
            let response = next.run(ctx).await;

            match fingerprint {
                Some(fingerprint) => cache.populator.populate(&fingerprint, response).await,
                None => response,
            }
        })
    }
}
