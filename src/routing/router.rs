//! Feature/type-based message router.
//!
//! Decouples transport from business handling: incoming messages are
//! matched against registered routes by `(feature, type)`, passed through
//! optional validation and transformation stages, and dispatched to the
//! winning handler. Every failure mode is a structured [`RouteOutcome`];
//! nothing escapes the call boundary as a panic.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::config::RouterConfig;
use crate::protocol::{Feature, Message};

use super::route::{
    MessageHandler, MessageRoute, MessageTransformer, MessageValidator, RouteOutcome,
};

// ============================================================================
// Metrics
// ============================================================================

/// Per-feature routing counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRouteMetrics {
    /// Messages successfully dispatched for this feature.
    pub routed: u64,
    /// Handler errors for this feature.
    pub error_count: u64,
    /// Running average dispatch time, milliseconds.
    pub average_processing_ms: f64,
    /// Running average message age at dispatch, milliseconds.
    pub average_latency_ms: f64,
}

/// Router-wide counters.
#[derive(Debug, Clone, Default)]
pub struct RouterMetrics {
    /// Every message offered to `route_message`.
    pub total_messages: u64,
    /// Messages successfully dispatched.
    pub routed: u64,
    /// Messages dropped for lack of a matching route.
    pub dropped: u64,
    /// Invariant and validator rejections.
    pub validation_errors: u64,
    /// Transformer rejections.
    pub transformation_errors: u64,
    /// Caught handler failures.
    pub handler_errors: u64,
    /// Entries evicted from a full queue (drop-oldest policy).
    pub queue_evictions: u64,
    /// Running average dispatch time across all features, milliseconds.
    pub average_processing_ms: f64,
    /// Per-feature breakdown.
    pub per_feature: FxHashMap<Feature, FeatureRouteMetrics>,
}

// ============================================================================
// MessageRouter
// ============================================================================

/// Routes messages to registered handlers by `(feature, type)`.
///
/// Route and queue state is owned, encapsulated, and safe to share:
/// the router is `Send + Sync` behind its internal locks.
pub struct MessageRouter {
    config: RouterConfig,
    /// Routes sorted by descending priority; stable sort preserves
    /// registration order among equal priorities.
    routes: Mutex<Vec<MessageRoute>>,
    metrics: Mutex<RouterMetrics>,
    queue: Mutex<VecDeque<Message>>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MessageRouter - Constructors
// ============================================================================

impl MessageRouter {
    /// Creates a router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Creates a router with the given configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            config,
            routes: Mutex::new(Vec::new()),
            metrics: Mutex::new(RouterMetrics::default()),
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

// ============================================================================
// MessageRouter - Registration
// ============================================================================

impl MessageRouter {
    /// Registers a route.
    pub fn register_route(&self, route: MessageRoute) {
        debug!(
            feature = %route.feature,
            message_type = %route.message_type,
            priority = route.priority,
            "Route registered"
        );
        let mut routes = self.routes.lock();
        routes.push(route);
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Convenience registration for a bare handler.
    pub fn register(
        &self,
        feature: Feature,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.register_route(MessageRoute::new(feature, message_type, handler));
    }

    /// Removes every route for a key. Returns the number removed.
    pub fn remove_route(&self, feature: &Feature, message_type: &str) -> usize {
        let mut routes = self.routes.lock();
        let before = routes.len();
        routes.retain(|r| !r.matches(feature, message_type));
        let removed = before - routes.len();
        if removed > 0 {
            debug!(feature = %feature, message_type, removed, "Routes removed");
        }
        removed
    }

    /// Toggles every route for a key. Returns the number affected.
    pub fn set_route_enabled(&self, feature: &Feature, message_type: &str, enabled: bool) -> usize {
        let mut routes = self.routes.lock();
        let mut affected = 0;
        for route in routes.iter_mut() {
            if route.matches(feature, message_type) {
                route.enabled = enabled;
                affected += 1;
            }
        }
        affected
    }

    /// Returns the number of registered routes.
    #[inline]
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.lock().len()
    }
}

// ============================================================================
// MessageRouter - Dispatch
// ============================================================================

impl MessageRouter {
    /// Routes one message.
    ///
    /// 1. Count the message.
    /// 2. Find the highest-priority enabled route for `(feature, type)`;
    ///    none → [`RouteOutcome::NoRouteFound`], dropped counter +1.
    /// 3. Run the validator when enabled → [`RouteOutcome::ValidationFailed`].
    /// 4. Run the transformer when enabled →
    ///    [`RouteOutcome::TransformationFailed`].
    /// 5. Invoke the handler; failures are caught →
    ///    [`RouteOutcome::HandlerError`].
    /// 6. On success update routed counters and running averages, globally
    ///    and per feature.
    pub async fn route_message(&self, message: Message) -> RouteOutcome {
        let started = Instant::now();
        self.metrics.lock().total_messages += 1;

        if let Err(e) = message.validate() {
            warn!(error = %e, "Invalid message refused");
            self.metrics.lock().validation_errors += 1;
            return RouteOutcome::ValidationFailed {
                reason: e.to_string(),
            };
        }

        let matched: Option<(
            Arc<dyn MessageHandler>,
            Option<Arc<dyn MessageValidator>>,
            Option<Arc<dyn MessageTransformer>>,
        )> = {
            let routes = self.routes.lock();
            routes
                .iter()
                .find(|r| r.enabled && r.matches(&message.feature, &message.message_type))
                .map(|r| {
                    (
                        Arc::clone(&r.handler),
                        r.validator.clone(),
                        r.transformer.clone(),
                    )
                })
        };

        let Some((handler, validator, transformer)) = matched else {
            trace!(
                feature = %message.feature,
                message_type = %message.message_type,
                "No route found"
            );
            self.metrics.lock().dropped += 1;
            return RouteOutcome::NoRouteFound;
        };

        if self.config.enable_validation
            && let Some(validator) = validator
            && let Err(reason) = validator.validate(&message)
        {
            debug!(feature = %message.feature, reason = %reason, "Validation failed");
            self.metrics.lock().validation_errors += 1;
            return RouteOutcome::ValidationFailed { reason };
        }

        let message = if self.config.enable_transformation
            && let Some(transformer) = transformer
        {
            match transformer.transform(message) {
                Ok(transformed) => transformed,
                Err(reason) => {
                    debug!(reason = %reason, "Transformation failed");
                    self.metrics.lock().transformation_errors += 1;
                    return RouteOutcome::TransformationFailed { reason };
                }
            }
        } else {
            message
        };

        match handler.handle(&message).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.record_success(&message, elapsed);
                RouteOutcome::Routed { elapsed }
            }
            Err(e) => {
                warn!(
                    feature = %message.feature,
                    message_type = %message.message_type,
                    error = %e,
                    "Handler error"
                );
                let mut metrics = self.metrics.lock();
                metrics.handler_errors += 1;
                metrics
                    .per_feature
                    .entry(message.feature.clone())
                    .or_default()
                    .error_count += 1;
                RouteOutcome::HandlerError {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Updates routed counters and running averages after a dispatch.
    fn record_success(&self, message: &Message, elapsed: Duration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let latency_ms = message.age_millis() as f64;

        let mut metrics = self.metrics.lock();
        metrics.routed += 1;
        metrics.average_processing_ms =
            running_average(metrics.average_processing_ms, metrics.routed, elapsed_ms);

        let feature = metrics
            .per_feature
            .entry(message.feature.clone())
            .or_default();
        feature.routed += 1;
        feature.average_processing_ms =
            running_average(feature.average_processing_ms, feature.routed, elapsed_ms);
        feature.average_latency_ms =
            running_average(feature.average_latency_ms, feature.routed, latency_ms);
    }

    /// Returns a metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> RouterMetrics {
        self.metrics.lock().clone()
    }
}

// ============================================================================
// MessageRouter - Queueing
// ============================================================================

impl MessageRouter {
    /// Appends a message to the bounded routing queue.
    ///
    /// When the queue is full the oldest entry is evicted (drop-oldest),
    /// never the incoming one. Returns `false` when queueing is disabled.
    pub fn queue_message(&self, message: Message) -> bool {
        if !self.config.enable_queueing {
            warn!("Queueing disabled, message refused");
            return false;
        }
        let mut queue = self.queue.lock();
        if queue.len() >= self.config.max_queue_size {
            queue.pop_front();
            self.metrics.lock().queue_evictions += 1;
            trace!("Queue full, oldest entry evicted");
        }
        queue.push_back(message);
        true
    }

    /// Drains the queue snapshot and routes each entry sequentially.
    ///
    /// Returns one outcome per drained message, in queue order.
    pub async fn process_queued_messages(&self) -> Vec<RouteOutcome> {
        let drained: Vec<Message> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return Vec::new();
        }

        debug!(count = drained.len(), "Processing queued messages");
        let mut outcomes = Vec::with_capacity(drained.len());
        for message in drained {
            outcomes.push(self.route_message(message).await);
        }
        outcomes
    }

    /// Returns the number of queued messages.
    #[inline]
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queue.lock().len()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Running average over `n` samples where `sample` is the `n`th.
#[inline]
fn running_average(average: f64, n: u64, sample: f64) -> f64 {
    (average * (n - 1) as f64 + sample) / n as f64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};

    use crate::routing::route::HandlerFailure;

    fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        Arc::new(move |_: &Message| -> Result<(), HandlerFailure> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn failing_handler() -> Arc<dyn MessageHandler> {
        Arc::new(|_: &Message| -> Result<(), HandlerFailure> { Err("handler exploded".into()) })
    }

    fn chat_message() -> Message {
        Message::new(Feature::Chat, "message", json!({"text": "hi"}))
    }

    #[tokio::test]
    async fn test_route_success_invokes_exactly_one_handler() {
        let router = MessageRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        router.register(Feature::Chat, "message", counting_handler(count.clone()));

        let outcome = router.route_message(chat_message()).await;
        assert!(outcome.is_routed());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let metrics = router.metrics();
        assert_eq!(metrics.total_messages, 1);
        assert_eq!(metrics.routed, 1);
        assert_eq!(metrics.dropped, 0);
        let chat = metrics.per_feature.get(&Feature::Chat).expect("feature");
        assert_eq!(chat.routed, 1);
    }

    #[tokio::test]
    async fn test_no_route_increments_dropped_exactly_once() {
        let router = MessageRouter::new();

        let outcome = router.route_message(chat_message()).await;
        assert_eq!(outcome, RouteOutcome::NoRouteFound);

        let metrics = router.metrics();
        assert_eq!(metrics.total_messages, 1);
        assert_eq!(metrics.dropped, 1);
        assert_eq!(metrics.routed, 0);
    }

    #[tokio::test]
    async fn test_highest_priority_route_wins() {
        let router = MessageRouter::new();
        let high = Arc::new(AtomicUsize::new(0));
        let low = Arc::new(AtomicUsize::new(0));

        router.register_route(
            MessageRoute::new(Feature::Chat, "message", counting_handler(high.clone()))
                .with_priority(5),
        );
        router.register_route(
            MessageRoute::new(Feature::Chat, "message", counting_handler(low.clone()))
                .with_priority(1),
        );

        for _ in 0..3 {
            let outcome = router.route_message(chat_message()).await;
            assert!(outcome.is_routed());
        }
        assert_eq!(high.load(Ordering::SeqCst), 3);
        assert_eq!(low.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_route_never_matches() {
        let router = MessageRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        router.register_route(
            MessageRoute::new(Feature::Chat, "message", counting_handler(count.clone()))
                .with_enabled(false),
        );

        let outcome = router.route_message(chat_message()).await;
        assert_eq!(outcome, RouteOutcome::NoRouteFound);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validator_rejection() {
        let router = MessageRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let validator: Arc<dyn MessageValidator> =
            Arc::new(|_: &Message| -> Result<(), String> { Err("nope".to_string()) });

        router.register_route(
            MessageRoute::new(Feature::Chat, "message", counting_handler(count.clone()))
                .with_validator(validator),
        );

        let outcome = router.route_message(chat_message()).await;
        assert_eq!(
            outcome,
            RouteOutcome::ValidationFailed {
                reason: "nope".to_string()
            }
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(router.metrics().validation_errors, 1);
    }

    #[tokio::test]
    async fn test_validation_disabled_skips_validator() {
        let router = MessageRouter::with_config(RouterConfig::new().with_validation(false));
        let count = Arc::new(AtomicUsize::new(0));
        let validator: Arc<dyn MessageValidator> =
            Arc::new(|_: &Message| -> Result<(), String> { Err("nope".to_string()) });

        router.register_route(
            MessageRoute::new(Feature::Chat, "message", counting_handler(count.clone()))
                .with_validator(validator),
        );

        assert!(router.route_message(chat_message()).await.is_routed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transformer_rewrites_message() {
        let router = MessageRouter::new();
        let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
        let seen_clone = seen.clone();
        let handler: Arc<dyn MessageHandler> =
            Arc::new(move |m: &Message| -> Result<(), HandlerFailure> {
                seen_clone.lock().push(m.payload.clone());
                Ok(())
            });
        let transformer: Arc<dyn MessageTransformer> =
            Arc::new(|mut m: Message| -> Result<Message, String> {
                m.payload = json!({"upper": true});
                Ok(m)
            });

        router.register_route(
            MessageRoute::new(Feature::Chat, "message", handler).with_transformer(transformer),
        );

        assert!(router.route_message(chat_message()).await.is_routed());
        assert_eq!(seen.lock()[0], json!({"upper": true}));
    }

    #[tokio::test]
    async fn test_transformer_rejection() {
        let router = MessageRouter::new();
        let transformer: Arc<dyn MessageTransformer> =
            Arc::new(|_: Message| -> Result<Message, String> { Err("bad shape".to_string()) });
        let count = Arc::new(AtomicUsize::new(0));

        router.register_route(
            MessageRoute::new(Feature::Chat, "message", counting_handler(count.clone()))
                .with_transformer(transformer),
        );

        let outcome = router.route_message(chat_message()).await;
        assert!(matches!(outcome, RouteOutcome::TransformationFailed { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(router.metrics().transformation_errors, 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_caught() {
        let router = MessageRouter::new();
        router.register(Feature::Chat, "message", failing_handler());

        let outcome = router.route_message(chat_message()).await;
        assert_eq!(
            outcome,
            RouteOutcome::HandlerError {
                message: "handler exploded".to_string()
            }
        );

        let metrics = router.metrics();
        assert_eq!(metrics.handler_errors, 1);
        assert_eq!(
            metrics
                .per_feature
                .get(&Feature::Chat)
                .expect("feature")
                .error_count,
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_message_refused_before_lookup() {
        let router = MessageRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        router.register(Feature::Chat, "", counting_handler(count.clone()));

        let invalid = Message::new(Feature::Chat, "", Value::Null);
        let outcome = router.route_message(invalid).await;
        assert!(matches!(outcome, RouteOutcome::ValidationFailed { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_route() {
        let router = MessageRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        router.register(Feature::Chat, "message", counting_handler(count));
        assert_eq!(router.route_count(), 1);

        assert_eq!(router.remove_route(&Feature::Chat, "message"), 1);
        assert_eq!(router.route_count(), 0);
        assert_eq!(
            router.route_message(chat_message()).await,
            RouteOutcome::NoRouteFound
        );
    }

    #[tokio::test]
    async fn test_set_route_enabled_toggles_dispatch() {
        let router = MessageRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        router.register(Feature::Chat, "message", counting_handler(count.clone()));

        router.set_route_enabled(&Feature::Chat, "message", false);
        assert_eq!(
            router.route_message(chat_message()).await,
            RouteOutcome::NoRouteFound
        );

        router.set_route_enabled(&Feature::Chat, "message", true);
        assert!(router.route_message(chat_message()).await.is_routed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_queue_drop_oldest_on_overflow() {
        let router = MessageRouter::with_config(RouterConfig::new().with_queueing(2));
        let count = Arc::new(AtomicUsize::new(0));
        router.register(Feature::Chat, "message", counting_handler(count.clone()));

        assert!(router.queue_message(chat_message()));
        assert!(router.queue_message(chat_message()));
        assert!(router.queue_message(chat_message()));

        assert_eq!(router.queued_count(), 2);
        assert_eq!(router.metrics().queue_evictions, 1);

        let outcomes = router.process_queued_messages().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(RouteOutcome::is_routed));
        assert_eq!(router.queued_count(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_queue_disabled_refuses() {
        let router = MessageRouter::new();
        assert!(!router.queue_message(chat_message()));
        assert_eq!(router.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_running_averages_update() {
        let router = MessageRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        router.register(Feature::Chat, "message", counting_handler(count));

        router.route_message(chat_message()).await;
        router.route_message(chat_message()).await;

        let metrics = router.metrics();
        assert_eq!(metrics.routed, 2);
        assert!(metrics.average_processing_ms >= 0.0);
        let chat = metrics.per_feature.get(&Feature::Chat).expect("feature");
        assert_eq!(chat.routed, 2);
        assert!(chat.average_latency_ms >= 0.0);
    }

    #[test]
    fn test_running_average_formula() {
        let avg = running_average(0.0, 1, 10.0);
        assert!((avg - 10.0).abs() < f64::EPSILON);
        let avg = running_average(avg, 2, 20.0);
        assert!((avg - 15.0).abs() < f64::EPSILON);
        let avg = running_average(avg, 3, 30.0);
        assert!((avg - 20.0).abs() < f64::EPSILON);
    }
}
