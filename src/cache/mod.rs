//! Response caching middleware backed by a key-value store.
//!
//! [`CacheMiddleware`] derives a cache key from each request with an
//! integrator-supplied key function, serves the stored JSON body on a hit,
//! and on a miss lets the request fall through to downstream handling before
//! persisting the produced body under the key with a fixed TTL.
//!
//! The cache layer is strictly fail-open: when the store is unreachable or a
//! command fails, the request proceeds uncached and the response is
//! unaffected. Only [`CacheMiddleware::remove`] surfaces store failures to
//! its caller.
//!
//! ## Consistency
//!
//! The store is the single source of truth — there is no local layer in
//! front of it, so a hit always returns exactly the bytes last written for
//! the key. There is no cross-request coordination: two concurrent misses on
//! the same key both run downstream handling and both write, last write wins.

use std::{future::Future, pin::Pin, sync::Arc};

use tracing::{debug, error, info, warn};

use crate::http::{Request, Response, StatusCode};
use crate::middleware::{Middleware, Next};
use crate::store::{RedisStore, Store, StoreError};

/// An integrator-supplied pure function deriving a cache key from a request.
///
/// Must be deterministic and total over the request domain: the same logical
/// request always maps to the same key. The middleware treats the output as
/// an opaque non-empty string.
pub type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Response caching middleware.
///
/// Construct with [`new`](Self::new) for the Redis backend or
/// [`with_store`](Self::with_store) for any [`Store`] implementation, then
/// install it into a pipeline via
/// [`from_middleware`](crate::middleware::from_middleware).
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rescache::{
///     CacheMiddleware, Method, Next, Request, Response, StatusCode,
///     middleware::{from_handler, from_middleware},
/// };
///
/// # async fn run() {
/// let cache = Arc::new(CacheMiddleware::new(
///     "redis://127.0.0.1:6379",
///     60,
///     |req: &Request| req.path().to_owned(),
/// ));
///
/// let chain = vec![
///     from_middleware(Arc::clone(&cache)),
///     from_handler(|_req| async {
///         Response::new(StatusCode::Ok)
///             .header("Content-Type", "application/json")
///             .body(r#"{"id":1}"#)
///     }),
/// ];
///
/// let response = Next::new(chain)
///     .run(Request::new(Method::Get, "/items"))
///     .await;
/// # }
/// ```
pub struct CacheMiddleware {
    store: Arc<dyn Store>,
    ttl_seconds: u64,
    key_fn: KeyFn,
}

impl CacheMiddleware {
    /// Creates a caching middleware backed by Redis at `store_url`.
    ///
    /// The connection is established eagerly on a background task and this
    /// constructor never fails; while the store is unreachable every request
    /// is treated as a miss. `ttl_seconds` applies to every entry this
    /// instance writes and must be positive (checked by a debug assertion —
    /// a zero TTL would make every write expire immediately or be rejected
    /// by the store). Must be called from within a Tokio runtime.
    pub fn new<F>(store_url: impl Into<String>, ttl_seconds: u64, key_fn: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        Self::with_store(Arc::new(RedisStore::connect(store_url)), ttl_seconds, key_fn)
    }

    /// Creates a caching middleware over an arbitrary [`Store`] backend.
    ///
    /// `ttl_seconds` must be positive (checked by a debug assertion).
    pub fn with_store<F>(store: Arc<dyn Store>, ttl_seconds: u64, key_fn: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        debug_assert!(ttl_seconds > 0, "ttl_seconds must be positive");
        Self {
            store,
            ttl_seconds,
            key_fn: Arc::new(key_fn),
        }
    }

    /// Deletes one or more keys from the store.
    ///
    /// Returns the number of keys actually removed; keys that were never
    /// stored do not count and do not error. An empty key set returns `0`
    /// without touching the store.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] when the underlying deletion fails. This is
    /// the only cache operation that propagates store failure to its caller
    /// instead of degrading silently.
    pub async fn remove<I>(&self, keys: I) -> Result<u64, StoreError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return Ok(0);
        }

        match self.store.del(keys).await {
            Ok(count) => {
                info!(count, "deleted cache keys");
                Ok(count)
            }
            Err(err) => {
                error!(error = %err, "cache key deletion failed");
                Err(err)
            }
        }
    }
}

impl Middleware for CacheMiddleware {
    /// Serve from the cache or fall through and persist.
    ///
    /// - **Hit** — the stored text is validated as JSON and replayed verbatim
    ///   as a `200` response with `Content-Type: application/json`; the
    ///   continuation never runs.
    /// - **Miss** — the continuation runs, the produced body is written under
    ///   the key with the configured TTL, and the response is returned
    ///   unchanged. The write and the response carry the same bytes.
    /// - **Store error** (lookup or write) — logged; the request proceeds
    ///   uncached.
    ///
    /// Bodies that are not valid UTF-8 are never cached (stored values are
    /// strings), and a stored value that no longer parses as JSON is treated
    /// like a lookup error rather than replayed.
    fn handle(
        &self,
        request: Request,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let store = Arc::clone(&self.store);
        let ttl_seconds = self.ttl_seconds;
        let key = (self.key_fn)(&request);

        Box::pin(async move {
            let cached = match store.get(&key).await {
                Ok(cached) => cached,
                Err(err) => {
                    error!(%key, error = %err, "cache lookup failed, bypassing cache");
                    return next.run(request).await;
                }
            };

            match cached {
                Some(body) => {
                    if serde_json::from_str::<serde_json::Value>(&body).is_err() {
                        warn!(%key, "cached entry is not valid JSON, bypassing cache");
                        return next.run(request).await;
                    }
                    debug!(%key, "cache hit");
                    Response::new(StatusCode::Ok)
                        .header("Content-Type", "application/json")
                        .body(body)
                }
                None => {
                    debug!(%key, "cache miss");
                    let response = next.run(request).await;
                    match std::str::from_utf8(response.body_bytes()) {
                        Ok(text) => {
                            if let Err(err) = store.set_ex(&key, text, ttl_seconds).await {
                                error!(%key, error = %err, "failed to store response body");
                            }
                        }
                        Err(_) => {
                            debug!(%key, "response body is not valid UTF-8, not cached");
                        }
                    }
                    response
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Barrier;

    use super::*;
    use crate::http::Method;
    use crate::middleware::{MiddlewareHandler, from_handler, from_middleware};
    use crate::store::{MemoryStore, StoreFuture};

    /// All commands behave as if the connection was never established.
    struct DownStore;

    impl Store for DownStore {
        fn get(&self, _key: &str) -> StoreFuture<'_, Option<String>> {
            Box::pin(async { Err(StoreError::Unavailable) })
        }

        fn set_ex(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> StoreFuture<'_, ()> {
            Box::pin(async { Err(StoreError::Unavailable) })
        }

        fn del(&self, _keys: Vec<String>) -> StoreFuture<'_, u64> {
            Box::pin(async { Err(StoreError::Unavailable) })
        }
    }

    /// All commands fail after the connection was established.
    struct FailingStore;

    fn command_error() -> StoreError {
        StoreError::Command(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "wire failure",
        )))
    }

    impl Store for FailingStore {
        fn get(&self, _key: &str) -> StoreFuture<'_, Option<String>> {
            Box::pin(async { Err(command_error()) })
        }

        fn set_ex(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> StoreFuture<'_, ()> {
            Box::pin(async { Err(command_error()) })
        }

        fn del(&self, _keys: Vec<String>) -> StoreFuture<'_, u64> {
            Box::pin(async { Err(command_error()) })
        }
    }

    /// Routes middleware log output through the test harness. Safe to call
    /// from every test; only the first registration wins.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn by_path(req: &Request) -> String {
        req.path().to_owned()
    }

    fn counting_handler(counter: Arc<AtomicUsize>, body: &'static str) -> MiddlewareHandler {
        from_handler(move |_req| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Response::new(StatusCode::Ok)
                    .header("Content-Type", "application/json")
                    .body(body)
            }
        })
    }

    async fn dispatch(
        cache: &Arc<CacheMiddleware>,
        handler: MiddlewareHandler,
        path: &str,
    ) -> Response {
        let chain = vec![from_middleware(Arc::clone(cache)), handler];
        Next::new(chain).run(Request::new(Method::Get, path)).await
    }

    #[tokio::test]
    async fn replays_cached_json_without_downstream() {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheMiddleware::with_store(store, 60, by_path));
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&counter), r#"{"id":1}"#);

        let first = dispatch(&cache, handler.clone(), "/items").await;
        let second = dispatch(&cache, handler, "/items").await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(second.status(), StatusCode::Ok);
        assert_eq!(
            second.headers().get("content-type"),
            Some("application/json")
        );
        assert_eq!(second.body_bytes(), first.body_bytes());
    }

    #[tokio::test]
    async fn cold_key_runs_downstream_once_and_writes() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheMiddleware::with_store(store.clone(), 60, by_path));
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&counter), r#"{"id":1}"#);

        let response = dispatch(&cache, handler, "/items").await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(response.body_bytes(), br#"{"id":1}"#);
        assert_eq!(
            store.get("/items").await.unwrap(),
            Some(r#"{"id":1}"#.to_owned())
        );
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collide() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheMiddleware::with_store(store, 60, by_path));
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&counter), r#"{"id":1}"#);

        dispatch(&cache, handler.clone(), "/items").await;
        dispatch(&cache, handler, "/users").await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn removed_key_becomes_a_miss() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheMiddleware::with_store(store, 60, by_path));
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&counter), r#"{"id":1}"#);

        dispatch(&cache, handler.clone(), "/items").await;
        assert_eq!(cache.remove(["/items"]).await.unwrap(), 1);
        dispatch(&cache, handler, "/items").await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[should_panic(expected = "ttl_seconds must be positive")]
    async fn zero_ttl_is_rejected_in_debug_builds() {
        let store = Arc::new(MemoryStore::new());
        let _ = CacheMiddleware::with_store(store, 0, by_path);
    }

    #[tokio::test]
    async fn remove_of_absent_key_returns_zero() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheMiddleware::with_store(store, 60, by_path));
        assert_eq!(cache.remove(["/never-stored"]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_of_empty_key_set_skips_the_store() {
        let cache = Arc::new(CacheMiddleware::with_store(Arc::new(DownStore), 60, by_path));
        assert_eq!(cache.remove(Vec::<String>::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_surfaces_store_failure() {
        init_tracing();
        let cache = Arc::new(CacheMiddleware::with_store(
            Arc::new(FailingStore),
            60,
            by_path,
        ));
        let err = cache.remove(["/items"]).await.unwrap_err();
        assert!(matches!(err, StoreError::Command(_)));
    }

    #[tokio::test]
    async fn unavailable_store_behaves_as_permanent_miss() {
        let cache = Arc::new(CacheMiddleware::with_store(Arc::new(DownStore), 60, by_path));
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&counter), r#"{"id":1}"#);

        let first = dispatch(&cache, handler.clone(), "/items").await;
        let second = dispatch(&cache, handler, "/items").await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(first.body_bytes(), br#"{"id":1}"#);
        assert_eq!(second.body_bytes(), br#"{"id":1}"#);
    }

    #[tokio::test]
    async fn write_failure_is_silent_and_response_unaffected() {
        struct MissThenFailWrite;

        impl Store for MissThenFailWrite {
            fn get(&self, _key: &str) -> StoreFuture<'_, Option<String>> {
                Box::pin(async { Ok(None) })
            }

            fn set_ex(&self, _key: &str, _value: &str, _ttl: u64) -> StoreFuture<'_, ()> {
                Box::pin(async { Err(command_error()) })
            }

            fn del(&self, _keys: Vec<String>) -> StoreFuture<'_, u64> {
                Box::pin(async { Ok(0) })
            }
        }

        let cache = Arc::new(CacheMiddleware::with_store(
            Arc::new(MissThenFailWrite),
            60,
            by_path,
        ));
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&counter), r#"{"id":1}"#);

        let response = dispatch(&cache, handler, "/items").await;
        assert_eq!(response.body_bytes(), br#"{"id":1}"#);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheMiddleware::with_store(store, 60, by_path));
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&counter), r#"{"id":1}"#);

        dispatch(&cache, handler.clone(), "/items").await;
        tokio::time::advance(Duration::from_secs(61)).await;
        dispatch(&cache, handler, "/items").await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn corrupted_entry_falls_through_without_overwriting() {
        let store = Arc::new(MemoryStore::new());
        store.set_ex("/items", "not json", 60).await.unwrap();

        let cache = Arc::new(CacheMiddleware::with_store(store.clone(), 60, by_path));
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&counter), r#"{"id":1}"#);

        let response = dispatch(&cache, handler, "/items").await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(response.body_bytes(), br#"{"id":1}"#);
        // The corrupted entry is bypassed, not repaired.
        assert_eq!(
            store.get("/items").await.unwrap(),
            Some("not json".to_owned())
        );
    }

    #[tokio::test]
    async fn non_utf8_body_is_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheMiddleware::with_store(store.clone(), 60, by_path));
        let handler = from_handler(|_req| async {
            Response::new(StatusCode::Ok).body(vec![0xff, 0xfe, 0xfd])
        });

        let response = dispatch(&cache, handler, "/blob").await;

        assert_eq!(response.body_bytes(), &[0xff, 0xfe, 0xfd]);
        assert_eq!(store.get("/blob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn key_function_can_use_query_parameters() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheMiddleware::with_store(store, 60, |req: &Request| {
            format!("{}?{}", req.path(), req.query_string().unwrap_or(""))
        }));
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&counter), r#"{"id":1}"#);

        let chain = |handler: MiddlewareHandler| vec![from_middleware(Arc::clone(&cache)), handler];
        Next::new(chain(handler.clone()))
            .run(Request::new(Method::Get, "/items").query("page=1"))
            .await;
        Next::new(chain(handler.clone()))
            .run(Request::new(Method::Get, "/items").query("page=2"))
            .await;
        Next::new(chain(handler))
            .run(Request::new(Method::Get, "/items").query("page=1"))
            .await;

        // Two distinct keys, third request hits the first key.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    // Two concurrent misses on one key both run downstream handling and both
    // write; last write wins. Accepted limitation: there is no single-flight
    // deduplication.
    #[tokio::test]
    async fn concurrent_misses_both_run_downstream_last_write_wins() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheMiddleware::with_store(
            store.clone(),
            60,
            |_req: &Request| "shared".to_owned(),
        ));
        let counter = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));

        let handler = {
            let counter = Arc::clone(&counter);
            let barrier = Arc::clone(&barrier);
            from_handler(move |req: Request| {
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                async move {
                    // Hold both requests in the miss path until each has
                    // passed the lookup.
                    barrier.wait().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Response::new(StatusCode::Ok)
                        .header("Content-Type", "application/json")
                        .body(format!(r#"{{"path":"{}"}}"#, req.path()))
                }
            })
        };

        let (first, second) = tokio::join!(
            dispatch(&cache, handler.clone(), "/a"),
            dispatch(&cache, handler.clone(), "/b"),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let stored = store.get("shared").await.unwrap().unwrap();
        let stored = stored.as_bytes();
        assert!(stored == first.body_bytes() || stored == second.body_bytes());
    }
}
