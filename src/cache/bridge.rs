//! Cache invalidation bridge.
//!
//! Translates routed messages into cache-invalidation patterns and
//! bounded message-persistence writes against an external
//! [`CacheService`]. Cache consistency is best-effort: every failure is
//! logged and degrades to `0`/`None`/empty rather than propagating.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::WsConfig;
use crate::protocol::{Feature, Message, MessageId};
use crate::routing::{HandlerFailure, MessageHandler};

use super::CacheService;

// ============================================================================
// InvalidationStrategy
// ============================================================================

/// Condition predicate deciding whether a strategy applies to a message.
pub type StrategyCondition = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// A rule mapping a feature's messages to cache key patterns to evict.
///
/// All matching strategies fire; priority orders iteration only and never
/// suppresses lower-priority strategies. Duplicate patterns are harmless
/// since invalidation is idempotent.
#[derive(Clone)]
pub struct InvalidationStrategy {
    /// Feature whose messages this strategy watches.
    pub feature: Feature,

    /// Glob-style cache key patterns to invalidate, in order.
    pub patterns: Vec<String>,

    /// Optional predicate; a `false` result skips the strategy.
    pub condition: Option<StrategyCondition>,

    /// Iteration order among a feature's strategies (descending).
    pub priority: i32,

    /// Disabled strategies never fire.
    pub enabled: bool,
}

impl InvalidationStrategy {
    /// Creates an enabled, unconditional strategy.
    #[must_use]
    pub fn new(
        feature: Feature,
        patterns: impl IntoIterator<Item = impl Into<String>>,
        priority: i32,
    ) -> Self {
        Self {
            feature,
            patterns: patterns.into_iter().map(Into::into).collect(),
            condition: None,
            priority,
            enabled: true,
        }
    }

    /// Attaches a condition predicate.
    #[inline]
    #[must_use]
    pub fn with_condition(mut self, condition: StrategyCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the enabled flag.
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns `true` when the strategy applies to a message.
    #[must_use]
    pub fn applies_to(&self, message: &Message) -> bool {
        self.enabled
            && self.feature == message.feature
            && self.condition.as_ref().is_none_or(|cond| cond(message))
    }
}

impl fmt::Debug for InvalidationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationStrategy")
            .field("feature", &self.feature)
            .field("patterns", &self.patterns)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("has_condition", &self.condition.is_some())
            .finish()
    }
}

// ============================================================================
// BridgeMetrics
// ============================================================================

/// Bridge counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeMetrics {
    /// Pattern invalidations performed.
    pub invalidations: u64,
    /// Messages persisted.
    pub persisted: u64,
    /// Running average invalidation pass time, weighted by invalidation
    /// count, milliseconds.
    pub average_processing_ms: f64,
}

// ============================================================================
// CacheBridge
// ============================================================================

/// Keeps an external read cache consistent with server-pushed events and
/// persists a bounded per-feature message history for replay.
pub struct CacheBridge {
    cache: Arc<dyn CacheService>,
    /// Strategies per feature, kept sorted by descending priority.
    strategies: Mutex<FxHashMap<Feature, Vec<InvalidationStrategy>>>,
    metrics: Mutex<BridgeMetrics>,
    auto_invalidation: bool,
    persistence: bool,
    default_ttl: Duration,
    max_cache_size: usize,
}

// ============================================================================
// CacheBridge - Constructors
// ============================================================================

impl CacheBridge {
    /// Creates a bridge with the default per-feature strategies installed.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheService>, config: &WsConfig) -> Self {
        let bridge = Self::empty(cache, config);
        for strategy in default_strategies() {
            bridge.add_strategy(strategy);
        }
        bridge
    }

    /// Creates a bridge with no strategies installed.
    #[must_use]
    pub fn empty(cache: Arc<dyn CacheService>, config: &WsConfig) -> Self {
        Self {
            cache,
            strategies: Mutex::new(FxHashMap::default()),
            metrics: Mutex::new(BridgeMetrics::default()),
            auto_invalidation: config.enable_auto_invalidation,
            persistence: config.enable_message_persistence,
            default_ttl: config.default_ttl,
            max_cache_size: config.max_cache_size,
        }
    }
}

// ============================================================================
// CacheBridge - Strategies
// ============================================================================

impl CacheBridge {
    /// Installs a strategy, keeping the feature's list priority-sorted.
    pub fn add_strategy(&self, strategy: InvalidationStrategy) {
        debug!(
            feature = %strategy.feature,
            priority = strategy.priority,
            patterns = strategy.patterns.len(),
            "Invalidation strategy added"
        );
        let mut strategies = self.strategies.lock();
        let list = strategies.entry(strategy.feature.clone()).or_default();
        list.push(strategy);
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Removes every strategy for a feature. Returns the number removed.
    pub fn remove_strategies(&self, feature: &Feature) -> usize {
        self.strategies
            .lock()
            .remove(feature)
            .map_or(0, |list| list.len())
    }

    /// Returns the number of strategies installed for a feature.
    #[must_use]
    pub fn strategy_count(&self, feature: &Feature) -> usize {
        self.strategies.lock().get(feature).map_or(0, Vec::len)
    }
}

// ============================================================================
// CacheBridge - Invalidation
// ============================================================================

impl CacheBridge {
    /// Applies every matching strategy's patterns for a message.
    ///
    /// Returns the number of pattern invalidations performed; failures are
    /// logged and skipped, never propagated.
    pub async fn invalidate_cache(&self, message: &Message) -> u64 {
        if !self.auto_invalidation {
            return 0;
        }
        let started = Instant::now();

        let matching: Vec<Vec<String>> = {
            let strategies = self.strategies.lock();
            strategies
                .get(&message.feature)
                .map(|list| {
                    list.iter()
                        .filter(|s| s.applies_to(message))
                        .map(|s| s.patterns.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut invalidated = 0u64;
        for patterns in matching {
            for pattern in patterns {
                match self.cache.invalidate_pattern(&pattern).await {
                    Ok(removed) => {
                        trace!(pattern = %pattern, removed, "Cache pattern invalidated");
                        invalidated += 1;
                    }
                    Err(e) => warn!(pattern = %pattern, error = %e, "Invalidation failed"),
                }
            }
        }

        if invalidated > 0 {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            let mut metrics = self.metrics.lock();
            let prev_weight = metrics.invalidations;
            let new_weight = prev_weight + invalidated;
            metrics.average_processing_ms = (metrics.average_processing_ms * prev_weight as f64
                + elapsed_ms * invalidated as f64)
                / new_weight as f64;
            metrics.invalidations = new_weight;
        }
        invalidated
    }
}

// ============================================================================
// CacheBridge - Persistence
// ============================================================================

impl CacheBridge {
    /// Persists a message under its `(feature, id)` key and prepends the id
    /// to the feature's most-recent-first index, capped at
    /// `max_cache_size`.
    ///
    /// Returns `true` when the message was stored.
    pub async fn persist_message(&self, message: &Message) -> bool {
        if !self.persistence {
            return false;
        }

        let key = message_key(&message.feature, &message.id);
        let value = match serde_json::to_value(message) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Message not serializable for persistence");
                return false;
            }
        };
        if let Err(e) = self.cache.set(&key, value, self.default_ttl).await {
            warn!(key = %key, error = %e, "Message persistence failed");
            return false;
        }

        let index_key = index_key(&message.feature);
        let mut ids: Vec<String> = match self.cache.get(&index_key).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(key = %index_key, error = %e, "Index read failed");
                Vec::new()
            }
        };
        ids.insert(0, message.id.to_string());
        ids.truncate(self.max_cache_size);
        if let Err(e) = self
            .cache
            .set(&index_key, Value::from(ids), self.default_ttl)
            .await
        {
            warn!(key = %index_key, error = %e, "Index write failed");
        }

        self.metrics.lock().persisted += 1;
        true
    }

    /// Fetches one persisted message by its directly-addressable
    /// `(feature, id)` key.
    pub async fn get_message(&self, feature: &Feature, id: &MessageId) -> Option<Message> {
        let key = message_key(feature, id);
        match self.cache.get(&key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(key = %key, error = %e, "Persisted message not parseable");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Message lookup failed");
                None
            }
        }
    }

    /// Returns up to `limit` most-recent persisted messages for a feature.
    ///
    /// Index misses and unparseable entries are skipped; cache failures
    /// degrade to an empty list.
    pub async fn get_feature_messages(&self, feature: &Feature, limit: usize) -> Vec<Message> {
        let index_key = index_key(feature);
        let ids: Vec<String> = match self.cache.get(&index_key).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key = %index_key, error = %e, "Index read failed");
                return Vec::new();
            }
        };

        let mut messages = Vec::with_capacity(limit.min(ids.len()));
        for id in ids.into_iter().take(limit) {
            if let Some(message) = self.get_message(feature, &MessageId::new(id)).await {
                messages.push(message);
            }
        }
        messages
    }

    /// Returns a metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> BridgeMetrics {
        self.metrics.lock().clone()
    }
}

// ============================================================================
// CacheBridge - Route Handler
// ============================================================================

/// Registering the bridge as a route handler subscribes it to routed
/// messages: each one is invalidated against and persisted.
#[async_trait]
impl MessageHandler for CacheBridge {
    async fn handle(&self, message: &Message) -> Result<(), HandlerFailure> {
        self.invalidate_cache(message).await;
        self.persist_message(message).await;
        Ok(())
    }
}

// ============================================================================
// Keys & Defaults
// ============================================================================

/// Directly-addressable persistence key for one message.
fn message_key(feature: &Feature, id: &MessageId) -> String {
    format!("ws:message:{feature}:{id}")
}

/// Per-feature most-recent-first id index key.
fn index_key(feature: &Feature) -> String {
    format!("ws:messages:{feature}")
}

/// Returns `true` for message types that mutate server state.
fn is_mutation(message: &Message) -> bool {
    matches!(
        message.message_type.as_str(),
        "create" | "update" | "delete"
    )
}

/// Default strategies, descending priority by rough impact:
/// chat > notification > feed > search.
fn default_strategies() -> Vec<InvalidationStrategy> {
    vec![
        InvalidationStrategy::new(
            Feature::Chat,
            ["chat:*", "conversation:*", "user:*:conversations"],
            40,
        ),
        InvalidationStrategy::new(
            Feature::Notification,
            ["notification:*", "user:*:notifications", "badge:*"],
            30,
        ),
        InvalidationStrategy::new(
            Feature::Feed,
            ["feed:*", "post:*", "comment:*", "user:*:feed"],
            20,
        )
        .with_condition(Arc::new(is_mutation)),
        InvalidationStrategy::new(Feature::Search, ["search:*", "index:*"], 10),
    ]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::cache::MemoryCache;
    use crate::error::Error;

    fn test_config() -> WsConfig {
        WsConfig::new("ws://127.0.0.1:9/ws")
    }

    fn bridge_with_cache() -> (CacheBridge, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let bridge = CacheBridge::new(cache.clone(), &test_config());
        (bridge, cache)
    }

    async fn seed(cache: &MemoryCache, keys: &[&str]) {
        for key in keys {
            cache.set(key, json!(1), Duration::ZERO).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_feed_create_invalidates_all_patterns() {
        let (bridge, cache) = bridge_with_cache();
        seed(
            &cache,
            &["feed:1", "post:9", "comment:3", "user:42:feed", "search:q"],
        )
        .await;

        let message = Message::new(Feature::Feed, "create", json!({"postId": 9}));
        let invalidated = bridge.invalidate_cache(&message).await;

        assert_eq!(invalidated, 4);
        assert!(!cache.has("feed:1").await.unwrap());
        assert!(!cache.has("post:9").await.unwrap());
        assert!(!cache.has("comment:3").await.unwrap());
        assert!(!cache.has("user:42:feed").await.unwrap());
        assert!(cache.has("search:q").await.unwrap());
    }

    #[tokio::test]
    async fn test_feed_view_invalidates_nothing() {
        let (bridge, cache) = bridge_with_cache();
        seed(&cache, &["feed:1", "post:9"]).await;

        let message = Message::new(Feature::Feed, "view", json!({"postId": 9}));
        let invalidated = bridge.invalidate_cache(&message).await;

        assert_eq!(invalidated, 0);
        assert!(cache.has("feed:1").await.unwrap());
        assert!(cache.has("post:9").await.unwrap());
    }

    #[tokio::test]
    async fn test_multiple_strategies_all_fire() {
        let cache = Arc::new(MemoryCache::new());
        let bridge = CacheBridge::empty(cache.clone(), &test_config());
        bridge.add_strategy(InvalidationStrategy::new(Feature::Chat, ["chat:*"], 10));
        bridge.add_strategy(InvalidationStrategy::new(Feature::Chat, ["typing:*"], 5));
        seed(&cache, &["chat:1", "typing:42"]).await;

        let message = Message::new(Feature::Chat, "message", json!({}));
        let invalidated = bridge.invalidate_cache(&message).await;

        // Apply-all semantics: higher priority does not suppress lower.
        assert_eq!(invalidated, 2);
        assert!(!cache.has("chat:1").await.unwrap());
        assert!(!cache.has("typing:42").await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_strategy_skipped() {
        let cache = Arc::new(MemoryCache::new());
        let bridge = CacheBridge::empty(cache.clone(), &test_config());
        bridge.add_strategy(
            InvalidationStrategy::new(Feature::Chat, ["chat:*"], 10).with_enabled(false),
        );
        seed(&cache, &["chat:1"]).await;

        let message = Message::new(Feature::Chat, "message", json!({}));
        assert_eq!(bridge.invalidate_cache(&message).await, 0);
        assert!(cache.has("chat:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_auto_invalidation_disabled() {
        let cache = Arc::new(MemoryCache::new());
        let config = test_config().with_auto_invalidation(false);
        let bridge = CacheBridge::new(cache.clone(), &config);
        seed(&cache, &["chat:1"]).await;

        let message = Message::new(Feature::Chat, "message", json!({}));
        assert_eq!(bridge.invalidate_cache(&message).await, 0);
        assert!(cache.has("chat:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_persist_and_get_message() {
        let (bridge, _cache) = bridge_with_cache();
        let message = Message::new(Feature::Chat, "message", json!({"text": "hi"}));

        assert!(bridge.persist_message(&message).await);

        let fetched = bridge
            .get_message(&Feature::Chat, &message.id)
            .await
            .expect("persisted message");
        assert_eq!(fetched.id, message.id);
        assert_eq!(fetched.payload, message.payload);
    }

    #[tokio::test]
    async fn test_get_feature_messages_most_recent_first() {
        let (bridge, _cache) = bridge_with_cache();
        let first = Message::new(Feature::Chat, "message", json!({"n": 1}));
        let second = Message::new(Feature::Chat, "message", json!({"n": 2}));
        bridge.persist_message(&first).await;
        bridge.persist_message(&second).await;

        let messages = bridge.get_feature_messages(&Feature::Chat, 10).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, second.id);
        assert_eq!(messages[1].id, first.id);

        let limited = bridge.get_feature_messages(&Feature::Chat, 1).await;
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, second.id);
    }

    #[tokio::test]
    async fn test_index_capped_at_max_cache_size() {
        let cache = Arc::new(MemoryCache::new());
        let config = test_config().with_max_cache_size(3);
        let bridge = CacheBridge::new(cache, &config);

        for n in 0..5 {
            let message = Message::new(Feature::Feed, "create", json!({"n": n}));
            bridge.persist_message(&message).await;
        }

        let messages = bridge.get_feature_messages(&Feature::Feed, 10).await;
        assert_eq!(messages.len(), 3);
    }

    #[tokio::test]
    async fn test_persistence_disabled() {
        let cache = Arc::new(MemoryCache::new());
        let config = test_config().with_message_persistence(false);
        let bridge = CacheBridge::new(cache, &config);

        let message = Message::new(Feature::Chat, "message", json!({}));
        assert!(!bridge.persist_message(&message).await);
        assert!(bridge.get_message(&Feature::Chat, &message.id).await.is_none());
    }

    #[tokio::test]
    async fn test_bridge_as_route_handler() {
        let (bridge, cache) = bridge_with_cache();
        seed(&cache, &["feed:1"]).await;
        let message = Message::new(Feature::Feed, "create", json!({"postId": 1}));

        bridge.handle(&message).await.expect("bridge handler");

        assert!(!cache.has("feed:1").await.unwrap());
        assert!(bridge.get_message(&Feature::Feed, &message.id).await.is_some());
    }

    #[tokio::test]
    async fn test_cache_failure_degrades_gracefully() {
        /// Cache stub failing every operation.
        struct BrokenCache;

        #[async_trait]
        impl CacheService for BrokenCache {
            async fn get(&self, _key: &str) -> crate::error::Result<Option<Value>> {
                Err(Error::connection("cache down"))
            }
            async fn set(
                &self,
                _key: &str,
                _value: Value,
                _ttl: Duration,
            ) -> crate::error::Result<()> {
                Err(Error::connection("cache down"))
            }
            async fn invalidate(&self, _key: &str) -> crate::error::Result<()> {
                Err(Error::connection("cache down"))
            }
            async fn invalidate_pattern(&self, _pattern: &str) -> crate::error::Result<u64> {
                Err(Error::connection("cache down"))
            }
            async fn clear(&self) -> crate::error::Result<()> {
                Err(Error::connection("cache down"))
            }
            async fn has(&self, _key: &str) -> crate::error::Result<bool> {
                Err(Error::connection("cache down"))
            }
        }

        let bridge = CacheBridge::new(Arc::new(BrokenCache), &test_config());
        let message = Message::new(Feature::Chat, "message", json!({}));

        assert_eq!(bridge.invalidate_cache(&message).await, 0);
        assert!(!bridge.persist_message(&message).await);
        assert!(bridge.get_message(&Feature::Chat, &message.id).await.is_none());
        assert!(bridge.get_feature_messages(&Feature::Chat, 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_weighted_average() {
        let (bridge, cache) = bridge_with_cache();
        seed(&cache, &["chat:1"]).await;

        let message = Message::new(Feature::Chat, "message", json!({}));
        let invalidated = bridge.invalidate_cache(&message).await;
        assert_eq!(invalidated, 3);

        let metrics = bridge.metrics();
        assert_eq!(metrics.invalidations, 3);
        assert!(metrics.average_processing_ms >= 0.0);
    }
}
