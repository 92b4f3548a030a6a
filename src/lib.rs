//! # qcache
//!
//! A response cache for query endpoints. Clients send either full query text
//! or a persisted-query descriptor; previously computed results are served
//! without re-running the query engine, for as long as the engine's own
//! freshness hints allow.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use qcache::cache::{CacheConfig, ResponseCache};
//! use qcache::middleware::{LoggerMiddleware, Pipeline};
//! use qcache::query::{engine_handler, ExecutionResult, FreshnessHint, QueryEngine, QueryRequest};
//! use qcache::server::Server;
//!
//! struct Hello;
//!
//! #[async_trait::async_trait]
//! impl QueryEngine for Hello {
//!     async fn execute(&self, _: &QueryRequest) -> ExecutionResult {
//!         ExecutionResult::data(serde_json::json!({"hello": "world"}))
//!             .with_hints(vec![FreshnessHint::new(30)])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new()
//!         .with(LoggerMiddleware)
//!         .with(ResponseCache::in_memory(&CacheConfig::default()))
//!         .with_handler(engine_handler(Arc::new(Hello)));
//!     Server::bind("127.0.0.1:4000").await?.serve(pipeline).await?;
//!     Ok(())
//! }
//! ```

// ── Transport ─────────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod server;

// ── Query caching ─────────────────────────────────────────────────────────────
pub mod cache;
pub mod query;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheConfig, KeyValueStore, MemoryStore, ResponseCache};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::Pipeline;
pub use query::{ExecutionResult, QueryEngine, QueryRequest};
pub use server::{Server, ServerError};
