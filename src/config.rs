//! Engine configuration.
//!
//! Provides an explicit, validated configuration surface: every recognized
//! option is a typed field with a default, checked once at construction.
//!
//! # Example
//!
//! ```ignore
//! use wavelink::WsConfig;
//!
//! let config = WsConfig::new("wss://realtime.example.com/ws")
//!     .with_max_connections(4)
//!     .with_heartbeat_interval(Duration::from_secs(15))
//!     .with_failover(false);
//!
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// LoadBalancingStrategy
// ============================================================================

/// Connection selection strategy used by the pool manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    /// Cycle through candidates in registration order.
    #[default]
    RoundRobin,
    /// Prefer the candidate with the fewest recorded health-check errors.
    LeastConnections,
    /// Prefer the candidate with the highest priority value.
    Priority,
}

// ============================================================================
// WsConfig
// ============================================================================

/// Engine-wide configuration.
///
/// Covers the connection layer, the pool manager, and the cache bridge.
/// Router-local toggles live in [`RouterConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct WsConfig {
    /// WebSocket endpoint (`ws://` or `wss://`). The auth token is appended
    /// as a `token` query parameter at connect time.
    pub url: String,

    /// Maximum automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,

    /// Base reconnect delay; attempt `n` waits `delay * 2^(n-1)`.
    pub reconnect_delay: Duration,

    /// Interval between heartbeat frames while connected.
    pub heartbeat_interval: Duration,

    /// Inbound silence longer than this force-closes a stalled connection.
    pub heartbeat_timeout: Duration,

    /// Maximum time for the open handshake to complete.
    pub connection_timeout: Duration,

    /// Collect per-connection metrics.
    pub enable_metrics: bool,

    /// Process-wide maximum number of pooled connections.
    pub max_connections: usize,

    /// Interval between pool health checks.
    pub health_check_interval: Duration,

    /// How the pool selects among a feature's active connections.
    pub load_balancing_strategy: LoadBalancingStrategy,

    /// Remove connections scoring below the low-health threshold after a
    /// health check.
    pub enable_failover: bool,

    /// Translate routed messages into cache invalidations.
    pub enable_auto_invalidation: bool,

    /// Persist a bounded per-feature message history into the cache.
    pub enable_message_persistence: bool,

    /// TTL for persisted messages and index entries.
    pub default_ttl: Duration,

    /// Maximum persisted message ids retained per feature.
    pub max_cache_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(10),
            enable_metrics: true,
            max_connections: 10,
            health_check_interval: Duration::from_secs(30),
            load_balancing_strategy: LoadBalancingStrategy::RoundRobin,
            enable_failover: true,
            enable_auto_invalidation: true,
            enable_message_persistence: true,
            default_ttl: Duration::from_secs(300),
            max_cache_size: 1000,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl WsConfig {
    /// Creates a config for the given endpoint with default settings.
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl WsConfig {
    /// Sets the maximum reconnect attempts.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the base reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the heartbeat interval.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the heartbeat stall timeout.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the open-handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Enables or disables metrics collection.
    #[inline]
    #[must_use]
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    /// Sets the pool capacity.
    #[inline]
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the health-check interval.
    #[inline]
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Sets the load-balancing strategy.
    #[inline]
    #[must_use]
    pub fn with_load_balancing(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.load_balancing_strategy = strategy;
        self
    }

    /// Enables or disables failover eviction.
    #[inline]
    #[must_use]
    pub fn with_failover(mut self, enabled: bool) -> Self {
        self.enable_failover = enabled;
        self
    }

    /// Enables or disables automatic cache invalidation.
    #[inline]
    #[must_use]
    pub fn with_auto_invalidation(mut self, enabled: bool) -> Self {
        self.enable_auto_invalidation = enabled;
        self
    }

    /// Enables or disables message persistence.
    #[inline]
    #[must_use]
    pub fn with_message_persistence(mut self, enabled: bool) -> Self {
        self.enable_message_persistence = enabled;
        self
    }

    /// Sets the persistence TTL.
    #[inline]
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the per-feature persisted history cap.
    #[inline]
    #[must_use]
    pub fn with_max_cache_size(mut self, max: usize) -> Self {
        self.max_cache_size = max;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl WsConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the URL is empty or not a WebSocket
    /// scheme, or when a capacity/interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::config("url must not be empty"));
        }
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(Error::config(format!(
                "url must use ws:// or wss://, got: {}",
                self.url
            )));
        }
        if self.max_connections == 0 {
            return Err(Error::config("max_connections must be greater than zero"));
        }
        if self.max_cache_size == 0 {
            return Err(Error::config("max_cache_size must be greater than zero"));
        }
        if self.reconnect_delay.is_zero() {
            return Err(Error::config("reconnect_delay must be greater than zero"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::config(
                "heartbeat_interval must be greater than zero",
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(Error::config(
                "connection_timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// RouterConfig
// ============================================================================

/// Router-local toggles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Run route validators before dispatch.
    pub enable_validation: bool,

    /// Run route transformers before dispatch.
    pub enable_transformation: bool,

    /// Accept messages into the bounded routing queue.
    pub enable_queueing: bool,

    /// Queue capacity; the oldest entry is evicted when full.
    pub max_queue_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enable_validation: true,
            enable_transformation: true,
            enable_queueing: false,
            max_queue_size: 1000,
        }
    }
}

impl RouterConfig {
    /// Creates a router config with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables validation.
    #[inline]
    #[must_use]
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    /// Enables or disables transformation.
    #[inline]
    #[must_use]
    pub fn with_transformation(mut self, enabled: bool) -> Self {
        self.enable_transformation = enabled;
        self
    }

    /// Enables queueing with the given capacity.
    #[inline]
    #[must_use]
    pub fn with_queueing(mut self, max_queue_size: usize) -> Self {
        self.enable_queueing = true;
        self.max_queue_size = max_queue_size;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WsConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
        assert_eq!(
            config.load_balancing_strategy,
            LoadBalancingStrategy::RoundRobin
        );
        assert!(config.enable_failover);
        assert!(config.enable_auto_invalidation);
        assert!(config.enable_message_persistence);
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.max_cache_size, 1000);
    }

    #[test]
    fn test_builder_chain() {
        let config = WsConfig::new("wss://realtime.example.com/ws")
            .with_max_connections(4)
            .with_load_balancing(LoadBalancingStrategy::Priority)
            .with_failover(false)
            .with_default_ttl(Duration::from_secs(60));

        assert_eq!(config.url, "wss://realtime.example.com/ws");
        assert_eq!(config.max_connections, 4);
        assert_eq!(
            config.load_balancing_strategy,
            LoadBalancingStrategy::Priority
        );
        assert!(!config.enable_failover);
        assert_eq!(config.default_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_validate_ok() {
        let config = WsConfig::new("ws://localhost:8080/ws");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_url() {
        let config = WsConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_wrong_scheme() {
        let config = WsConfig::new("https://example.com");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let config = WsConfig::new("ws://localhost:8080").with_max_connections(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_reconnect_delay() {
        let config = WsConfig::new("ws://localhost:8080").with_reconnect_delay(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_router_config_defaults() {
        let config = RouterConfig::default();
        assert!(config.enable_validation);
        assert!(config.enable_transformation);
        assert!(!config.enable_queueing);
        assert_eq!(config.max_queue_size, 1000);
    }

    #[test]
    fn test_router_config_queueing() {
        let config = RouterConfig::new().with_queueing(50);
        assert!(config.enable_queueing);
        assert_eq!(config.max_queue_size, 50);
    }
}
