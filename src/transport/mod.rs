//! WebSocket transport layer.
//!
//! Owns the physical sockets and decides which one serves an operation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        ws://host/ws?token=...   ┌──────────────┐
//! │ ConnectionManager│                                 │   Realtime   │
//! │   ┌────────────┐ │ ◄──────────────────────────────►│   backend    │
//! │   │WsConnection│ │        JSON frame / Message     │              │
//! │   └────────────┘ │                                 └──────────────┘
//! └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ConnectionManager::create_connection` - allocate a pool slot
//! 2. `WsConnection::connect` - dial with the auth token, start heartbeat
//! 3. `WsConnection::send_message` / listener callbacks - traffic
//! 4. Abnormal closure - exponential-backoff reconnect, capped attempts
//! 5. `WsConnection::disconnect` - deterministic timer/socket teardown
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Single-socket lifecycle, heartbeat, reconnection |
//! | `pool` | Per-feature pooling, health scoring, failover |

// ============================================================================
// Submodules
// ============================================================================

/// Single-socket lifecycle, heartbeat, and reconnection.
pub mod connection;

/// Per-feature pooling, health scoring, and failover.
pub mod pool;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ConnectionListener, ConnectionMetrics, ConnectionState, WsConnection};
pub use pool::{
    ConnectionHealth, ConnectionManager, ConnectionRecord, HealthStatus, SelectedConnection,
};
