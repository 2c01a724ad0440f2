//! # rescache
//!
//! Redis-backed response caching middleware for async HTTP pipelines.
//!
//! On each request the middleware derives a cache key with an
//! integrator-supplied key function, serves the stored JSON body on a hit,
//! and on a miss lets the request fall through before persisting the produced
//! body under that key with a fixed TTL. Store trouble never breaks request
//! handling: the cache fails open and every operation degrades to a miss.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rescache::{
//!     CacheMiddleware, Method, Next, Request, Response, StatusCode,
//!     middleware::{from_handler, from_middleware},
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = Arc::new(CacheMiddleware::new(
//!         "redis://127.0.0.1:6379",
//!         60,
//!         |req: &Request| req.path().to_owned(),
//!     ));
//!
//!     let chain = vec![
//!         from_middleware(Arc::clone(&cache)),
//!         from_handler(|_req| async {
//!             Response::new(StatusCode::Ok)
//!                 .header("Content-Type", "application/json")
//!                 .body(r#"{"id":1}"#)
//!         }),
//!     ];
//!
//!     let response = Next::new(chain)
//!         .run(Request::new(Method::Get, "/items"))
//!         .await;
//!     println!("{}", response.status());
//!
//!     // Invalidate explicitly when the underlying data changes.
//!     cache.remove(["/items"]).await.unwrap();
//! }
//! ```

pub mod cache;
pub mod http;
pub mod middleware;
pub mod store;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheMiddleware, KeyFn};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::{Middleware, MiddlewareHandler, Next};
pub use store::{MemoryStore, RedisStore, Store, StoreError};
