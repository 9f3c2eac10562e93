//! Route records and handler seams.
//!
//! A [`MessageRoute`] binds a `(feature, message type)` key to a handler
//! with optional validation and transformation stages. Handlers are async
//! trait objects; plain closures work through blanket impls.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::{Feature, Message};

// ============================================================================
// Handler Seams
// ============================================================================

/// Error type surfaced by message handlers.
pub type HandlerFailure = Box<dyn std::error::Error + Send + Sync>;

/// Business handler for routed messages.
///
/// Errors are caught by the router and reported as
/// [`RouteOutcome::HandlerError`]; they never propagate to the caller.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one routed message.
    async fn handle(&self, message: &Message) -> Result<(), HandlerFailure>;
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(&Message) -> Result<(), HandlerFailure> + Send + Sync,
{
    async fn handle(&self, message: &Message) -> Result<(), HandlerFailure> {
        self(message)
    }
}

/// Pre-dispatch message validation.
pub trait MessageValidator: Send + Sync {
    /// Accepts the message or names the rejection reason.
    fn validate(&self, message: &Message) -> Result<(), String>;
}

impl<F> MessageValidator for F
where
    F: Fn(&Message) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, message: &Message) -> Result<(), String> {
        self(message)
    }
}

/// Pre-dispatch message transformation.
pub trait MessageTransformer: Send + Sync {
    /// Produces the message the handler will see.
    fn transform(&self, message: Message) -> Result<Message, String>;
}

impl<F> MessageTransformer for F
where
    F: Fn(Message) -> Result<Message, String> + Send + Sync,
{
    fn transform(&self, message: Message) -> Result<Message, String> {
        self(message)
    }
}

// ============================================================================
// MessageRoute
// ============================================================================

/// A registered `(feature, message type)` → handler binding.
///
/// Registered at startup or dynamically, removed explicitly, never
/// auto-expires. When several enabled routes share a key, dispatch picks
/// the highest priority; ties resolve to registration order.
#[derive(Clone)]
pub struct MessageRoute {
    /// Feature namespace this route serves.
    pub feature: Feature,

    /// Message type discriminator.
    pub message_type: String,

    /// Business handler.
    pub handler: Arc<dyn MessageHandler>,

    /// Optional pre-dispatch validator.
    pub validator: Option<Arc<dyn MessageValidator>>,

    /// Optional pre-dispatch transformer.
    pub transformer: Option<Arc<dyn MessageTransformer>>,

    /// Dispatch preference among routes sharing a key.
    pub priority: i32,

    /// Disabled routes never match.
    pub enabled: bool,
}

impl MessageRoute {
    /// Creates an enabled route with priority 0.
    #[must_use]
    pub fn new(
        feature: Feature,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            feature,
            message_type: message_type.into(),
            handler,
            validator: None,
            transformer: None,
            priority: 0,
            enabled: true,
        }
    }

    /// Attaches a validator.
    #[inline]
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn MessageValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Attaches a transformer.
    #[inline]
    #[must_use]
    pub fn with_transformer(mut self, transformer: Arc<dyn MessageTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Sets the dispatch priority.
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the enabled flag.
    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns `true` if this route serves the given key.
    #[inline]
    #[must_use]
    pub fn matches(&self, feature: &Feature, message_type: &str) -> bool {
        self.feature == *feature && self.message_type == message_type
    }
}

impl fmt::Debug for MessageRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRoute")
            .field("feature", &self.feature)
            .field("message_type", &self.message_type)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("has_validator", &self.validator.is_some())
            .field("has_transformer", &self.transformer.is_some())
            .finish()
    }
}

// ============================================================================
// RouteOutcome
// ============================================================================

/// Structured result of one routing pass.
///
/// Routing failures are values, never panics: a single bad message cannot
/// halt the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The matched handler ran to completion.
    Routed {
        /// End-to-end routing time for this message.
        elapsed: Duration,
    },
    /// No enabled route matched the `(feature, type)` key.
    NoRouteFound,
    /// The message failed its invariant or the route's validator.
    ValidationFailed {
        /// Rejection reason.
        reason: String,
    },
    /// The route's transformer rejected the message.
    TransformationFailed {
        /// Rejection reason.
        reason: String,
    },
    /// The handler returned an error (caught, never propagated).
    HandlerError {
        /// Stringified handler failure.
        message: String,
    },
}

impl RouteOutcome {
    /// Returns `true` for [`RouteOutcome::Routed`].
    #[inline]
    #[must_use]
    pub fn is_routed(&self) -> bool {
        matches!(self, Self::Routed { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
