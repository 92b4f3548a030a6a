//! Middleware pipeline — composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses, and response decoration without coupling the
//! query engine to caching or logging concerns.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`] — converts a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`terminal`] — wraps an async function as the last stage.
//! - [`Pipeline`] — the ordered stack a server dispatches every request through.
//! - [`LoggerMiddleware`] — built-in access logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Request, Response, StatusCode, context::Context};

/// Boxed, sendable future returned by every pipeline stage.
pub type BoxResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A type-erased, reference-counted middleware function.
///
/// The terminal stage of a pipeline (the query engine adapter) is also a
/// `MiddlewareHandler`; it simply never calls [`Next::run`].
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> BoxResponseFuture + Send + Sync + 'static>;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be
/// called more than once per middleware invocation.
///
/// # Examples
///
/// ```rust,no_run
/// use qcache::{context::Context, middleware::{BoxResponseFuture, Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, ctx: Context, next: Next) -> BoxResponseFuture {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps an async function as the terminal stage of a pipeline.
///
/// The returned handler ignores [`Next`]; anything registered after it is
/// unreachable.
pub fn terminal<F, Fut>(handler: F) -> MiddlewareHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |ctx: Context, _next: Next| -> BoxResponseFuture { Box::pin(handler(ctx)) })
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// If the chain is exhausted without any stage producing a response, a
    /// `500 Internal Server Error` is returned.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all pipeline stages.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through** — call `next.run(ctx).await` without modification.
/// - **Short-circuit** — return a [`Response`] directly without calling `next`.
/// - **Decorate** — call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// Implementations must not hold locks across an `.await` point; the pipeline
/// is shared by every connection task.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> BoxResponseFuture;
}

/// An ordered stack of stages that every request flows through.
///
/// # Examples
///
/// ```rust,no_run
/// use qcache::{Response, StatusCode, middleware::{LoggerMiddleware, Pipeline, terminal}};
///
/// let pipeline = Pipeline::new()
///     .with(LoggerMiddleware)
///     .with_handler(terminal(|_ctx| async { Response::new(StatusCode::Ok) }));
/// assert_eq!(pipeline.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<MiddlewareHandler>,
}

impl Pipeline {
    /// Creates an empty pipeline. Dispatching through it yields `500`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a [`Middleware`] stage.
    #[must_use]
    pub fn with<M>(self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.with_handler(from_middleware(Arc::new(middleware)))
    }

    /// Appends an already type-erased stage.
    #[must_use]
    pub fn with_handler(mut self, handler: MiddlewareHandler) -> Self {
        self.stages.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs `request` through every stage and returns the final response.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(self.stages.clone())
            .run(Context::new(request))
            .await
    }
}

/// Built-in middleware that logs each request's method, path, status, cache
/// outcome, and duration.
///
/// `LoggerMiddleware` never short-circuits. Place it first so the `X-Cache`
/// header written by the cache stage is visible in the access line.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponseFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            let cache = response.headers().get("x-cache").unwrap_or("-");
            tracing::info!(
                %method,
                %path,
                status = response.status().as_u16(),
                cache,
                elapsed = ?start.elapsed(),
                "request completed"
            );

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> Request {
        let (req, _) = Request::parse(b"GET /graphql HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        req
    }

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle(&self, ctx: Context, next: Next) -> BoxResponseFuture {
            let tag = self.0;
            Box::pin(async move {
                let mut response = next.run(ctx).await;
                response.set_header("X-Tag", tag);
                response
            })
        }
    }

    #[tokio::test]
    async fn empty_pipeline_returns_500() {
        let res = Pipeline::new().handle(request()).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn stages_run_in_order_and_decorate() {
        let pipeline = Pipeline::new()
            .with(LoggerMiddleware)
            .with(Tag("outer"))
            .with_handler(terminal(|_ctx| async { Response::new(StatusCode::NoContent) }));
        let res = pipeline.handle(request()).await;
        assert_eq!(res.status(), StatusCode::NoContent);
        assert_eq!(res.headers().get("x-tag"), Some("outer"));
    }

    #[tokio::test]
    async fn short_circuit_skips_later_stages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pipeline = Pipeline::new()
            .with_handler(terminal(|_ctx| async { Response::new(StatusCode::Ok) }))
            .with_handler(terminal(move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Response::new(StatusCode::NoContent) }
            }));
        let res = pipeline.handle(request()).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
