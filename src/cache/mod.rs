//! Cache integration layer.
//!
//! The engine treats the cache as an external collaborator: an opaque
//! key-value store with TTL and `*`-pattern invalidation. This module
//! holds the consumed contract, a process-local backend, and the bridge
//! that keeps the cache consistent with server-pushed events.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `service` | [`CacheService`] contract and [`MemoryCache`] backend |
//! | `bridge` | Strategy-driven invalidation and message persistence |

// ============================================================================
// Submodules
// ============================================================================

/// Cache service contract and in-memory backend.
pub mod service;

/// Strategy-driven invalidation and message persistence.
pub mod bridge;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{BridgeMetrics, CacheBridge, InvalidationStrategy, StrategyCondition};
pub use service::{CacheService, MemoryCache};
