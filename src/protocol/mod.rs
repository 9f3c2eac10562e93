//! Wire protocol types.
//!
//! This module defines the message format exchanged between the client
//! engine and the realtime backend.
//!
//! # Protocol Overview
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Message`] | One JSON document per text frame, both directions |
//! | [`Feature`] | Namespace discriminator (`chat`, `feed`, ...) |
//! | [`MessageId`] | Per-message correlation/persistence key |
//!
//! There is no request/response correlation on this wire: frames are
//! fire-and-forget and ordering follows socket emission order.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `ids` | Type-safe identifier newtypes |
//! | `message` | Message value object and feature namespaces |

// ============================================================================
// Submodules
// ============================================================================

/// Type-safe identifier newtypes.
pub mod ids;

/// Message value object and feature namespaces.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use ids::{ConnectionId, MessageId, SubscriptionId};
pub use message::{Feature, META_SENT_AT, Message, TYPE_HEARTBEAT};
