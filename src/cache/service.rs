//! Cache service contract and in-memory backend.
//!
//! The engine consumes an external key-value cache with TTL and
//! glob-pattern invalidation. [`CacheService`] is the seam; [`MemoryCache`]
//! is a process-local implementation used by tests and available as a
//! default backend.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// CacheService
// ============================================================================

/// External cache contract consumed by the engine.
///
/// Keys are `:`-separated strings; patterns use `*` as a wildcard matching
/// any run of characters (`user:*:feed` matches `user:42:feed`).
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Returns the value for an exact key, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores a value under a key. A zero TTL means no expiry.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Removes an exact key.
    async fn invalidate(&self, key: &str) -> Result<()>;

    /// Removes every key matching a glob pattern. Returns the number of
    /// entries removed.
    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64>;

    /// Removes every entry.
    async fn clear(&self) -> Result<()>;

    /// Returns `true` if an unexpired entry exists for the exact key.
    async fn has(&self, key: &str) -> Result<bool>;
}

// ============================================================================
// MemoryCache
// ============================================================================

/// One stored value with its optional expiry.
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local [`CacheService`] implementation with lazy TTL expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<FxHashMap<String, Entry>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` when no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CacheService for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let matcher = compile_pattern(pattern)?;
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .keys()
            .filter(|key| matcher.is_match(key))
            .cloned()
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        trace!(pattern, removed = doomed.len(), "Pattern invalidated");
        Ok(doomed.len() as u64)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }
}

// ============================================================================
// Pattern Compilation
// ============================================================================

/// Compiles a `*`-wildcard glob into an anchored regex.
fn compile_pattern(pattern: &str) -> Result<Regex> {
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    Regex::new(&format!("^{escaped}$"))
        .map_err(|e| Error::config(format!("invalid cache pattern {pattern:?}: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let cache = MemoryCache::new();
        cache
            .set("chat:1", json!({"text": "hi"}), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(
            cache.get("chat:1").await.unwrap(),
            Some(json!({"text": "hi"}))
        );
        assert!(cache.has("chat:1").await.unwrap());
        assert_eq!(cache.get("chat:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache
            .set("chat:1", json!(1), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("chat:1").await.unwrap(), None);
        assert!(!cache.has("chat:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_exact() {
        let cache = MemoryCache::new();
        cache.set("chat:1", json!(1), Duration::ZERO).await.unwrap();
        cache.invalidate("chat:1").await.unwrap();
        assert_eq!(cache.get("chat:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_prefix() {
        let cache = MemoryCache::new();
        cache.set("feed:1", json!(1), Duration::ZERO).await.unwrap();
        cache
            .set("feed:2:detail", json!(2), Duration::ZERO)
            .await
            .unwrap();
        cache.set("post:1", json!(3), Duration::ZERO).await.unwrap();

        let removed = cache.invalidate_pattern("feed:*").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.get("post:1").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_invalidate_pattern_infix() {
        let cache = MemoryCache::new();
        cache
            .set("user:42:feed", json!(1), Duration::ZERO)
            .await
            .unwrap();
        cache
            .set("user:42:profile", json!(2), Duration::ZERO)
            .await
            .unwrap();

        let removed = cache.invalidate_pattern("user:*:feed").await.unwrap();
        assert_eq!(removed, 1);
        assert!(cache.has("user:42:profile").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_pattern_is_anchored() {
        let cache = MemoryCache::new();
        cache
            .set("notification:1", json!(1), Duration::ZERO)
            .await
            .unwrap();

        // `feed:*` must not match keys that merely contain "feed".
        cache
            .set("myfeed:extra", json!(2), Duration::ZERO)
            .await
            .unwrap();
        let removed = cache.invalidate_pattern("feed:*").await.unwrap();
        assert_eq!(removed, 0);
        assert!(cache.has("myfeed:extra").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MemoryCache::new();
        cache.set("a", json!(1), Duration::ZERO).await.unwrap();
        cache.set("b", json!(2), Duration::ZERO).await.unwrap();

        cache.clear().await.unwrap();
        assert!(cache.is_empty());
    }
}
