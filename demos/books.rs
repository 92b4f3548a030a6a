//! A books endpoint behind the response cache.
//!
//! ```text
//! cargo run --example books
//! curl -s -XPOST localhost:4000/graphql -d '{"query":"{ books { title } }"}' -i
//! curl -s 'localhost:4000/graphql?extensions=%7B%22persistedQuery%22%3A%7B%22version%22%3A%221%22%2C%22sha256Hash%22%3A%22abc%22%7D%7D' -i
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use qcache::cache::{CacheConfig, ResponseCache};
use qcache::middleware::{LoggerMiddleware, Pipeline};
use qcache::query::{ExecutionResult, FreshnessHint, QueryEngine, QueryRequest, engine_handler};
use qcache::server::Server;
use serde_json::json;
use tracing_subscriber::EnvFilter;

struct Library;

#[async_trait]
impl QueryEngine for Library {
    async fn execute(&self, request: &QueryRequest) -> ExecutionResult {
        let Some(query) = request.query() else {
            return ExecutionResult::error(qcache::StatusCode::Ok, "query text required");
        };
        tracing::info!(query, "executing");

        ExecutionResult::data(json!({
            "books": [
                {"title": "The Left Hand of Darkness", "author": "Ursula K. Le Guin"},
                {"title": "Dune", "author": "Frank Herbert"},
            ]
        }))
        .with_hints(vec![FreshnessHint::new(65).at(["books"])])
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,qcache=debug")),
        )
        .init();

    let config = CacheConfig::default();
    let pipeline = Pipeline::new()
        .with(LoggerMiddleware)
        .with(ResponseCache::in_memory(&config))
        .with_handler(engine_handler(Arc::new(Library)));

    let server = Server::bind("127.0.0.1:4000").await?;
    server
        .serve_with_shutdown(pipeline, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
