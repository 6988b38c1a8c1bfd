//! Key-value cache used for sessions, rate-limit counters and verification tokens.
//!
//! Every component receives the cache as an injected `Arc<dyn Cache>`; nothing
//! in the crate reaches for a global connection. Two backends exist:
//! [`RedisCache`] for deployments and [`MemoryCache`] for development
//! (`memory://`) and tests.
//!
//! Besides plain get/set/delete the trait exposes two atomic primitives:
//! [`Cache::take`] (read-and-delete, used to consume single-use tokens) and
//! [`Cache::compare_and_swap`] (used by the rate limiter so concurrent pings
//! cannot lose updates).

mod memory;
mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache payload could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Atomically read and remove a key.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Write `value` only if the key currently holds `expected` (`None` meaning
    /// absent). Returns `false` when another writer got there first.
    ///
    /// `ttl` is applied when the key is created; an existing key keeps its
    /// expiry so a window started by the first write is never extended.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Fetch and decode a JSON value.
///
/// # Errors
/// Returns an error if the backend fails or the stored bytes are not valid JSON for `T`.
pub async fn get_json<T>(cache: &dyn Cache, key: &str) -> Result<Option<T>, CacheError>
where
    T: DeserializeOwned,
{
    match cache.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode a value as JSON and store it with a TTL.
///
/// # Errors
/// Returns an error if encoding or the backend write fails.
pub async fn set_json<T>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError>
where
    T: Serialize + Sync + ?Sized,
{
    let bytes = serde_json::to_vec(value)?;
    cache.set(key, &bytes, ttl).await
}

/// Cache key layout shared by every writer.
pub mod keys {
    #[must_use]
    pub fn session(id: &str) -> String {
        format!("session/{id}")
    }

    #[must_use]
    pub fn rate_limit(namespace: &str, subject: &str) -> String {
        format!("rate-limit/{namespace}/{subject}")
    }

    #[must_use]
    pub fn token(prefix: &str, token: &str) -> String {
        format!("{prefix}/{token}")
    }
}
