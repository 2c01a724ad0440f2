//! Key-value store backends for cached response bodies.
//!
//! The middleware talks to its store through the [`Store`] trait, which
//! mirrors the three commands the cache needs: `GET`, `SETEX`, and `DEL`.
//! Two backends are provided:
//!
//! - [`RedisStore`] — the production backend, a shared multiplexed Redis
//!   connection.
//! - [`MemoryStore`] — an in-process TTL map for tests and local development.

use std::{future::Future, pin::Pin};

use thiserror::Error;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Errors produced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store connection has not been established (or was never reachable).
    #[error("store connection is not established")]
    Unavailable,

    /// A store command failed after the connection was established.
    #[error("store command failed: {0}")]
    Command(#[from] ::redis::RedisError),
}

/// A boxed future returned by [`Store`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// The store commands the cache middleware relies on.
///
/// Implementations must be safe for concurrent use: one store handle is
/// shared across every in-flight request. Each command is its own atomicity
/// unit — the middleware never batches or transacts.
pub trait Store: Send + Sync {
    /// Looks up the value stored under `key`. `None` is a miss.
    fn get(&self, key: &str) -> StoreFuture<'_, Option<String>>;

    /// Stores `value` under `key` with an expiry of `ttl_seconds`.
    fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreFuture<'_, ()>;

    /// Deletes the given keys, returning how many were actually removed.
    /// Absent keys are not counted and are not an error. An empty key set
    /// resolves to `0` without issuing a command.
    fn del(&self, keys: Vec<String>) -> StoreFuture<'_, u64>;
}
