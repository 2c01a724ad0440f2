//! Middleware pipeline — composable before/after request handler logic.
//!
//! This module defines the core types for building an ordered middleware
//! stack. Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses, and response decoration without coupling handlers
//! to infrastructure concerns.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining middleware chain; call
//!   [`Next::run`] to advance to the next layer.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware
//!   function.
//! - [`from_middleware`] — converts a [`Middleware`] trait object into a
//!   [`MiddlewareHandler`].
//! - [`from_handler`] — wraps a terminal request handler as the last link of
//!   a chain.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::http::{Request, Response, StatusCode};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is passed to each middleware's [`Middleware::handle`]
/// implementation. Calling [`Next::run`] advances the cursor by one position
/// and invokes the next middleware (or returns a fallback `500` response when
/// the chain is exhausted without any layer generating a response).
///
/// `Next` is consumed by [`run`](Self::run), so the continuation cannot be
/// invoked more than once per middleware invocation.
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
///
/// Every entry in the middleware stack is stored as a `MiddlewareHandler`.
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can
/// advance through the chain without copying closures.
pub type MiddlewareHandler = Arc<
    dyn Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rescache::cache::CacheMiddleware;
/// use rescache::middleware::from_middleware;
///
/// let cache = Arc::new(CacheMiddleware::new(
///     "redis://127.0.0.1:6379",
///     60,
///     |req: &rescache::Request| req.path().to_owned(),
/// ));
/// let handler = from_middleware(cache);
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |request: Request, next: Next| middleware.handle(request, next))
}

/// Wraps a terminal request handler as a [`MiddlewareHandler`].
///
/// The handler receives the [`Request`] and produces the [`Response`]
/// directly; the remaining chain (normally empty at this point) is ignored.
/// Install it as the last entry of the stack.
///
/// # Examples
///
/// ```
/// use rescache::http::{Response, StatusCode};
/// use rescache::middleware::from_handler;
///
/// let handler = from_handler(|_req| async {
///     Response::new(StatusCode::Ok).body("Hello!")
/// });
/// ```
pub fn from_handler<H, F>(handler: H) -> MiddlewareHandler
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |request: Request, _next: Next| Box::pin(handler(request)))
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
    /// Advances the internal cursor by one, clones the handler at the current
    /// position, and awaits it. If no handler remains, a
    /// `500 Internal Server Error` response is returned as a safe fallback.
    pub async fn run(mut self, request: Request) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(request, self).await
        } else {
            Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Request`] and a [`Next`] cursor. They may:
///
/// - **Pass through** — call `next.run(request).await` without modification.
/// - **Short-circuit** — return a [`Response`] directly without calling `next`.
/// - **Decorate** — call `next.run(request).await`, inspect the response, and
///   return a modified copy.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because middleware is shared
///   across Tokio tasks.
/// - `handle` **must** return a pinned, `Send` future so it can be awaited
///   across `.await` points in multi-threaded runtimes.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(
        &self,
        request: Request,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}
