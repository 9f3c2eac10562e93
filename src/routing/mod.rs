//! Message routing layer.
//!
//! Maps messages to registered handlers by `(feature, type)`, with
//! optional per-route validation and transformation and per-feature
//! routing metrics.
//!
//! # Dispatch Pipeline
//!
//! ```text
//! Message ──► invariant check ──► route lookup ──► validator ──► transformer ──► handler
//!                 │                   │                │              │             │
//!                 ▼                   ▼                ▼              ▼             ▼
//!          ValidationFailed     NoRouteFound   ValidationFailed  Transformation  Routed /
//!                                                                   Failed       HandlerError
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `route` | Route records, handler seams, structured outcomes |
//! | `router` | Dispatch pipeline, metrics, bounded queue |

// ============================================================================
// Submodules
// ============================================================================

/// Route records, handler seams, and structured outcomes.
pub mod route;

/// Dispatch pipeline, metrics, and bounded queue.
pub mod router;

// ============================================================================
// Re-exports
// ============================================================================

pub use route::{
    HandlerFailure, MessageHandler, MessageRoute, MessageTransformer, MessageValidator,
    RouteOutcome,
};
pub use router::{FeatureRouteMetrics, MessageRouter, RouterMetrics};
