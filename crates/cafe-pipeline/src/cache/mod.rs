//! # Status Cache
//!
//! Time-bounded copy of each order's latest snapshot, keyed by id. The store is
//! authoritative; the cache may be stale or empty and readers fall back to the
//! store. A put never lowers the cached status and always resets the expiry.

pub mod memory;
pub mod redis;

pub use self::memory::{CachedOrder, MemoryStatusCache};
pub use self::redis::RedisStatusCache;

use crate::model::{Order, OrderId};
use async_trait::async_trait;
use std::time::Duration;

/// How long a cached snapshot lives without being rewritten.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Status cache unavailable: {0}")]
    Unavailable(String),
    #[error("Cached entry for {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
}

#[async_trait]
pub trait StatusCache: Send + Sync {
    async fn get(&self, id: &OrderId) -> Result<Option<Order>, CacheError>;

    /// Writes `order` unless the cached copy is already further along.
    async fn put(&self, order: &Order) -> Result<(), CacheError>;
}
