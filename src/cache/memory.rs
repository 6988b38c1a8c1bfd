use super::{Cache, CacheError};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::debug;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    // Simulated clock offset, see `advance`.
    skew: Duration,
}

impl Inner {
    fn now(&self) -> Instant {
        Instant::now() + self.skew
    }

    fn live(&mut self, key: &str) -> Option<&Entry> {
        let now = self.now();
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= now)
        {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }
}

/// Process-local cache with the same semantics as the Redis backend.
///
/// Used for `memory://` development mode and tests. Expiry is evaluated
/// lazily against a clock that tests can move forward with [`MemoryCache::advance`].
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the cache clock forward, expiring anything whose TTL has elapsed.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.skew += by;
        }
    }

    /// Make reads (`get`, `exists`, `ping`) fail with a backend error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make writes (`set`, `delete`, `take`, `compare_and_swap`) fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Live keys starting with `prefix`, sorted.
    #[must_use]
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        let Ok(mut inner) = self.inner.lock() else {
            return Vec::new();
        };
        let now = inner.now();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        let mut keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, CacheError> {
        self.inner
            .lock()
            .map_err(|_| CacheError::Backend("memory cache lock poisoned".to_string()))
    }

    fn read_guard(&self) -> Result<MutexGuard<'_, Inner>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("memory cache read failure".to_string()));
        }
        self.lock()
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, Inner>, CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("memory cache write failure".to_string()));
        }
        self.lock()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut inner = self.read_guard()?;
        Ok(inner.live(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut inner = self.write_guard()?;
        let expires_at = inner.now() + ttl;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        debug!(key, ttl_seconds = ttl.as_secs(), "memory cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.write_guard()?;
        let found = inner.live(key).is_some();
        inner.entries.remove(key);
        Ok(found)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.read_guard()?;
        Ok(inner.live(key).is_some())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut inner = self.write_guard()?;
        if inner.live(key).is_none() {
            return Ok(None);
        }
        Ok(inner.entries.remove(key).map(|entry| entry.value))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut inner = self.write_guard()?;
        let now = inner.now();
        let current = inner
            .live(key)
            .map(|entry| (entry.value.as_slice() == expected.unwrap_or_default(), entry.expires_at));

        let expires_at = match (current, expected) {
            (None, None) => now + ttl,
            (Some((true, expires_at)), Some(_)) => expires_at,
            _ => return Ok(false),
        };

        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.read_guard().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let cache = MemoryCache::new();
        cache.set("k", b"v", MINUTE).await.expect("set");
        assert!(cache.exists("k").await.expect("exists"));

        cache.advance(Duration::from_secs(59));
        assert_eq!(cache.get("k").await.expect("get"), Some(b"v".to_vec()));

        cache.advance(Duration::from_secs(1));
        assert_eq!(cache.get("k").await.expect("get"), None);
        assert!(!cache.exists("k").await.expect("exists"));
    }

    #[tokio::test]
    async fn take_removes_the_value() {
        let cache = MemoryCache::new();
        cache.set("k", b"v", MINUTE).await.expect("set");
        assert_eq!(cache.take("k").await.expect("take"), Some(b"v".to_vec()));
        assert_eq!(cache.take("k").await.expect("take"), None);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let cache = MemoryCache::new();
        cache.set("k", b"v", MINUTE).await.expect("set");
        assert!(cache.delete("k").await.expect("delete"));
        assert!(!cache.delete("k").await.expect("delete"));
    }

    #[tokio::test]
    async fn compare_and_swap_creates_only_when_absent() {
        let cache = MemoryCache::new();
        assert!(
            cache
                .compare_and_swap("k", None, b"1", MINUTE)
                .await
                .expect("cas")
        );
        assert!(
            !cache
                .compare_and_swap("k", None, b"2", MINUTE)
                .await
                .expect("cas")
        );
        assert_eq!(cache.get("k").await.expect("get"), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_swap_requires_matching_value() {
        let cache = MemoryCache::new();
        cache.set("k", b"1", MINUTE).await.expect("set");
        assert!(
            !cache
                .compare_and_swap("k", Some(b"0"), b"2", MINUTE)
                .await
                .expect("cas")
        );
        assert!(
            cache
                .compare_and_swap("k", Some(b"1"), b"2", MINUTE)
                .await
                .expect("cas")
        );
        assert_eq!(cache.get("k").await.expect("get"), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_swap_keeps_the_original_expiry() {
        let cache = MemoryCache::new();
        assert!(
            cache
                .compare_and_swap("k", None, b"1", MINUTE)
                .await
                .expect("cas")
        );
        cache.advance(Duration::from_secs(50));
        assert!(
            cache
                .compare_and_swap("k", Some(b"1"), b"2", MINUTE)
                .await
                .expect("cas")
        );
        cache.advance(Duration::from_secs(10));
        assert_eq!(cache.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn failure_switches() {
        let cache = MemoryCache::new();
        cache.set_fail_reads(true);
        assert!(cache.get("k").await.is_err());
        assert!(cache.ping().await.is_err());
        assert!(cache.set("k", b"v", MINUTE).await.is_ok());

        cache.set_fail_reads(false);
        cache.set_fail_writes(true);
        assert!(cache.set("k", b"v", MINUTE).await.is_err());
        assert_eq!(cache.get("k").await.expect("get"), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn keys_lists_live_entries_by_prefix() {
        let cache = MemoryCache::new();
        cache.set("a/1", b"", MINUTE).await.expect("set");
        cache.set("a/2", b"", Duration::from_secs(1)).await.expect("set");
        cache.set("b/1", b"", MINUTE).await.expect("set");
        cache.advance(Duration::from_secs(2));
        assert_eq!(cache.keys("a/"), vec!["a/1".to_string()]);
    }
}
