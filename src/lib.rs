//! Wavelink - enterprise WebSocket client engine.
//!
//! This library provides the realtime layer of a chat/social client:
//! pooled, health-checked WebSocket connections partitioned by feature,
//! a feature/type message router, and a cache-invalidation bridge.
//!
//! # Architecture
//!
//! Data flows leaf-first through three layers:
//!
//! - **Transport**: each [`WsConnection`] owns one socket (connect,
//!   heartbeat, exponential-backoff reconnection, metrics); the
//!   [`ConnectionManager`] pools them per feature with health scoring,
//!   load-balanced selection, and failover eviction.
//! - **Routing**: the [`MessageRouter`] dispatches messages to handlers by
//!   `(feature, type)` with optional validation/transformation; failures
//!   are structured [`RouteOutcome`] values, never panics.
//! - **Cache**: the [`CacheBridge`] translates routed messages into
//!   invalidation patterns and a bounded per-feature message history
//!   against an external [`CacheService`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use wavelink::{
//!     CacheBridge, Feature, MemoryCache, Message, MessageRouter, Result, WsConfig, WsConnection,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = WsConfig::new("wss://realtime.example.com/ws");
//!
//!     // Wire the router and cache bridge.
//!     let router = Arc::new(MessageRouter::new());
//!     let cache = Arc::new(MemoryCache::new());
//!     let bridge = Arc::new(CacheBridge::new(cache, &config));
//!     router.register(Feature::Feed, "create", bridge);
//!
//!     // Dial a connection and send.
//!     let connection = WsConnection::new(config)?;
//!     connection.connect("bearer-token").await?;
//!     connection
//!         .send_message(Message::new(Feature::Chat, "message", json!({"text": "hi"})))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Cache service contract, in-memory backend, invalidation bridge |
//! | [`config`] | Validated engine and router configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`protocol`] | Wire message types and identifiers |
//! | [`routing`] | Feature/type message router |
//! | [`transport`] | Connection lifecycle and pooling |
//!
//! # Guarantees
//!
//! - Messages reach handlers in socket emission order on one connection;
//!   no ordering across pooled connections
//! - Routing failures are values; one bad message cannot halt dispatch
//! - Timers are owned by connection tasks and cancelled deterministically
//!   on disconnect

// ============================================================================
// Modules
// ============================================================================

/// Cache service contract, in-memory backend, and invalidation bridge.
pub mod cache;

/// Validated engine and router configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Wire message types and type-safe identifiers.
pub mod protocol;

/// Feature/type message routing.
pub mod routing;

/// WebSocket connection lifecycle and pooling.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Cache types
pub use cache::{BridgeMetrics, CacheBridge, CacheService, InvalidationStrategy, MemoryCache};

// Configuration types
pub use config::{LoadBalancingStrategy, RouterConfig, WsConfig};

// Error types
pub use error::{Error, Result};

// Protocol types
pub use protocol::{ConnectionId, Feature, Message, MessageId, SubscriptionId};

// Routing types
pub use routing::{
    MessageHandler, MessageRoute, MessageRouter, MessageTransformer, MessageValidator,
    RouteOutcome, RouterMetrics,
};

// Transport types
pub use transport::{
    ConnectionHealth, ConnectionListener, ConnectionManager, ConnectionMetrics, ConnectionState,
    HealthStatus, SelectedConnection, WsConnection,
};
