//! The seam to the external query-execution engine.
//!
//! The cache layer never interprets query results. It only needs the engine
//! to report how long a result may be reused, as a list of
//! [`FreshnessHint`]s. [`engine_handler`] adapts any [`QueryEngine`] into the
//! terminal pipeline stage and publishes those hints in the response body
//! under `extensions.cacheControl.hints`, where the cache populator reads
//! them back.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

use super::{QueryRequest, QueryRequestError};
use crate::http::{Response, StatusCode};
use crate::middleware::{MiddlewareHandler, terminal};

/// Engine-supplied advisory maximum age for a response, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessHint {
    /// Response path the hint was attached to; informational only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    pub max_age: u64,
}

impl FreshnessHint {
    /// A hint covering the whole response.
    pub fn new(max_age: u64) -> Self {
        Self {
            path: Vec::new(),
            max_age,
        }
    }

    /// Narrows the hint to the field at `path`.
    #[must_use]
    pub fn at(mut self, path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }
}

/// What an engine produced for one operation.
///
/// `hints: None` means the engine opted the response out of caching;
/// `Some(vec![])` means it is cacheable with the default age.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub status: StatusCode,
    pub body: Value,
    pub hints: Option<Vec<FreshnessHint>>,
}

impl ExecutionResult {
    /// A successful result: `{"data": data}`.
    pub fn data(data: Value) -> Self {
        Self {
            status: StatusCode::Ok,
            body: json!({ "data": data }),
            hints: None,
        }
    }

    /// An error result: `{"errors": [{"message": ...}]}`.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "errors": [{ "message": message.into() }] }),
            hints: None,
        }
    }

    /// Attaches freshness hints, making the result cacheable.
    #[must_use]
    pub fn with_hints(mut self, hints: Vec<FreshnessHint>) -> Self {
        self.hints = Some(hints);
        self
    }

    /// Serializes the result, merging any hints into
    /// `extensions.cacheControl`.
    pub fn into_response(self) -> Response {
        let Self {
            status,
            mut body,
            hints,
        } = self;

        if let (Some(hints), Value::Object(doc)) = (hints, &mut body) {
            let extensions = doc
                .entry("extensions")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(extensions) = extensions {
                extensions.insert(
                    "cacheControl".to_owned(),
                    json!({ "version": 1, "hints": hints }),
                );
            }
        }

        match serde_json::to_string(&body) {
            Ok(text) => Response::json(status, text),
            Err(e) => {
                warn!(error = %e, "failed to serialize execution result");
                Response::json(
                    StatusCode::InternalServerError,
                    r#"{"errors":[{"message":"failed to serialize execution result"}]}"#,
                )
            }
        }
    }
}

/// The external query-execution engine.
///
/// Implementations run the operation and report its result. Errors are part
/// of the result body and reach the client unmodified.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn execute(&self, request: &QueryRequest) -> ExecutionResult;
}

/// Adapts `engine` into the terminal stage of a pipeline.
///
/// Reuses the [`QueryRequest`] an earlier stage attached to the context, and
/// parses one itself otherwise. Requests that cannot be read as an operation
/// are answered with `400` (or `405` for unsupported methods) without calling
/// the engine.
pub fn engine_handler<E>(engine: Arc<E>) -> MiddlewareHandler
where
    E: QueryEngine + 'static,
{
    terminal(move |mut ctx| {
        let engine = Arc::clone(&engine);
        async move {
            let operation = match ctx.extensions_mut().remove::<QueryRequest>() {
                Some(operation) => operation,
                None => match QueryRequest::from_http(ctx.request()) {
                    Ok(operation) => operation,
                    Err(e) => return rejection(&e),
                },
            };
            engine.execute(&operation).await.into_response()
        }
    })
}

fn rejection(error: &QueryRequestError) -> Response {
    let status = match error {
        QueryRequestError::UnsupportedMethod(_) => StatusCode::MethodNotAllowed,
        _ => StatusCode::BadRequest,
    };
    ExecutionResult::error(status, error.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use crate::middleware::Pipeline;

    struct Echo;

    #[async_trait]
    impl QueryEngine for Echo {
        async fn execute(&self, request: &QueryRequest) -> ExecutionResult {
            ExecutionResult::data(json!({ "echo": request.query() }))
                .with_hints(vec![FreshnessHint::new(30).at(["echo"])])
        }
    }

    fn body_json(response: &Response) -> Value {
        serde_json::from_slice(response.body_ref()).unwrap()
    }

    #[test]
    fn hints_are_merged_into_extensions() {
        let response = ExecutionResult::data(json!({"books": []}))
            .with_hints(vec![FreshnessHint::new(65)])
            .into_response();
        assert_eq!(
            body_json(&response),
            json!({
                "data": {"books": []},
                "extensions": {"cacheControl": {"version": 1, "hints": [{"maxAge": 65}]}}
            })
        );
    }

    #[test]
    fn merged_hints_keep_field_order() {
        let response = ExecutionResult::data(json!({"title": "Dune", "author": "Herbert"}))
            .with_hints(vec![FreshnessHint::new(60)])
            .into_response();
        assert_eq!(
            std::str::from_utf8(response.body_ref()).unwrap(),
            r#"{"data":{"title":"Dune","author":"Herbert"},"extensions":{"cacheControl":{"version":1,"hints":[{"maxAge":60}]}}}"#
        );
    }

    #[test]
    fn no_hints_leave_body_untouched() {
        let response = ExecutionResult::data(json!(1)).into_response();
        assert_eq!(body_json(&response), json!({"data": 1}));
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn handler_parses_request_when_no_view_is_attached() {
        let pipeline = Pipeline::new().with_handler(engine_handler(Arc::new(Echo)));
        let (req, _) =
            Request::parse(b"GET /graphql?query=%7Bping%7D HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let response = pipeline.handle(req).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(body_json(&response)["data"]["echo"], json!("{ping}"));
        assert_eq!(
            body_json(&response)["extensions"]["cacheControl"]["hints"][0],
            json!({"path": ["echo"], "maxAge": 30})
        );
    }

    #[tokio::test]
    async fn unsupported_method_is_rejected_with_405() {
        let pipeline = Pipeline::new().with_handler(engine_handler(Arc::new(Echo)));
        let (req, _) = Request::parse(b"PUT /graphql HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let response = pipeline.handle(req).await;
        assert_eq!(response.status(), StatusCode::MethodNotAllowed);
        assert!(body_json(&response)["errors"][0]["message"].is_string());
    }
}
