//! Query operations as seen by the cache layer.
//!
//! [`QueryRequest`] is the transport-neutral view of one operation: the method
//! it arrived with, the optional query text, variables, operation name and
//! the free-form `extensions` object that may carry a persisted-query
//! descriptor. The [`engine`] submodule defines the seam to the external
//! execution engine.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::http::{Method, Request};

pub mod engine;

pub use engine::{ExecutionResult, FreshnessHint, QueryEngine, engine_handler};

/// Errors raised while reading a [`QueryRequest`] out of an HTTP request.
#[derive(Debug, Error)]
pub enum QueryRequestError {
    #[error("method {0} is not supported; use GET or POST")]
    UnsupportedMethod(Method),

    #[error("request body is not a valid query document: {0}")]
    InvalidBody(#[source] serde_json::Error),

    #[error("variables parameter is not valid JSON: {0}")]
    InvalidVariables(#[source] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostBody {
    query: Option<String>,
    variables: Option<Value>,
    operation_name: Option<String>,
    extensions: Option<Value>,
}

/// One query operation, independent of how it was transported.
///
/// # Examples
///
/// ```
/// use qcache::http::{Method, Request};
/// use qcache::query::QueryRequest;
///
/// let body = r#"{"query":"{ books { title } }"}"#;
/// let raw = format!(
///     "POST /graphql HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}",
///     body.len()
/// );
/// let (request, _) = Request::parse(raw.as_bytes()).unwrap();
/// let view = QueryRequest::from_http(&request).unwrap();
///
/// assert_eq!(view.method(), &Method::Post);
/// assert_eq!(view.query(), Some("{ books { title } }"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    method: Method,
    query: Option<String>,
    variables: Option<Value>,
    operation_name: Option<String>,
    extensions: Option<Value>,
}

impl QueryRequest {
    /// Creates an empty operation for `method`.
    pub fn new(method: Method) -> Self {
        Self {
            method,
            query: None,
            variables: None,
            operation_name: None,
            extensions: None,
        }
    }

    /// Sets the query text.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Sets the operation variables.
    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Sets the request extensions.
    #[must_use]
    pub fn with_extensions(mut self, extensions: Value) -> Self {
        self.extensions = Some(extensions);
        self
    }

    /// Reads the operation from an HTTP request.
    ///
    /// `GET` operations come from the decoded query string (`query`,
    /// `variables`, `operationName`, `extensions`); `POST` operations from a
    /// JSON body with the same field names. An `extensions` parameter that is
    /// not valid JSON is dropped rather than rejected.
    ///
    /// # Errors
    ///
    /// - [`QueryRequestError::UnsupportedMethod`] for anything but `GET`/`POST`.
    /// - [`QueryRequestError::InvalidBody`] when a `POST` body is not a JSON object.
    /// - [`QueryRequestError::InvalidVariables`] when a `GET` carries unparseable variables.
    pub fn from_http(request: &Request) -> Result<Self, QueryRequestError> {
        match request.method() {
            Method::Get => {
                let variables = request
                    .query_param("variables")
                    .filter(|raw| !raw.is_empty())
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(QueryRequestError::InvalidVariables)?;
                let extensions = request
                    .query_param("extensions")
                    .and_then(|raw| serde_json::from_str(raw).ok());

                Ok(Self {
                    method: Method::Get,
                    query: request.query_param("query").map(str::to_owned),
                    variables,
                    operation_name: request.query_param("operationName").map(str::to_owned),
                    extensions,
                })
            }
            Method::Post => {
                let body: PostBody =
                    serde_json::from_slice(request.body()).map_err(QueryRequestError::InvalidBody)?;

                Ok(Self {
                    method: Method::Post,
                    query: body.query,
                    variables: body.variables,
                    operation_name: body.operation_name,
                    extensions: body.extensions,
                })
            }
            other => Err(QueryRequestError::UnsupportedMethod(other.clone())),
        }
    }

    /// Returns the HTTP method the operation arrived with.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the query text, treating a blank string as absent.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref().filter(|q| !q.trim().is_empty())
    }

    /// Returns the operation variables, if any.
    pub fn variables(&self) -> Option<&Value> {
        self.variables.as_ref()
    }

    /// Returns the selected operation name, if any.
    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    /// Returns the request extensions, if any.
    pub fn extensions(&self) -> Option<&Value> {
        self.extensions.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: &str) -> Request {
        let (mut req, _) = Request::parse(raw.as_bytes()).unwrap();
        if let Some(len) = req.content_length() {
            req.truncate_body(len);
        }
        req
    }

    fn post(body: &str) -> Request {
        parse(&format!(
            "POST /graphql HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ))
    }

    #[test]
    fn get_reads_decoded_params() {
        let req = parse(
            "GET /graphql?query=%7B+books+%7D&variables=%7B%22n%22%3A1%7D&operationName=Books HTTP/1.1\r\nHost: x\r\n\r\n",
        );
        let view = QueryRequest::from_http(&req).unwrap();
        assert_eq!(view.query(), Some("{ books }"));
        assert_eq!(view.variables(), Some(&json!({"n": 1})));
        assert_eq!(view.operation_name(), Some("Books"));
        assert!(view.extensions().is_none());
    }

    #[test]
    fn get_with_malformed_extensions_drops_them() {
        let req = parse("GET /graphql?extensions=%7Bnope HTTP/1.1\r\nHost: x\r\n\r\n");
        let view = QueryRequest::from_http(&req).unwrap();
        assert!(view.extensions().is_none());
    }

    #[test]
    fn get_with_malformed_variables_is_rejected() {
        let req = parse("GET /graphql?query=x&variables=%7Bnope HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(matches!(
            QueryRequest::from_http(&req),
            Err(QueryRequestError::InvalidVariables(_))
        ));
    }

    #[test]
    fn post_reads_json_body() {
        let req = post(r#"{"query":"{ books { title } }","extensions":{"persistedQuery":{"version":1,"sha256Hash":"abc"}}}"#);
        let view = QueryRequest::from_http(&req).unwrap();
        assert_eq!(view.method(), &Method::Post);
        assert_eq!(view.query(), Some("{ books { title } }"));
        assert_eq!(
            view.extensions(),
            Some(&json!({"persistedQuery": {"version": 1, "sha256Hash": "abc"}}))
        );
    }

    #[test]
    fn post_with_invalid_json_is_rejected() {
        let req = post("query=books");
        assert!(matches!(
            QueryRequest::from_http(&req),
            Err(QueryRequestError::InvalidBody(_))
        ));
    }

    #[test]
    fn blank_query_counts_as_absent() {
        let view = QueryRequest::new(Method::Post).with_query("  \n ");
        assert_eq!(view.query(), None);
    }

    #[test]
    fn other_methods_are_unsupported() {
        let req = parse("OPTIONS /graphql HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(matches!(
            QueryRequest::from_http(&req),
            Err(QueryRequestError::UnsupportedMethod(Method::Options))
        ));
    }
}
