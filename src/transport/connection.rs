//! WebSocket connection and event loop.
//!
//! A [`WsConnection`] owns exactly one physical socket and exposes a uniform
//! async contract independent of transport detail: connect/disconnect,
//! heartbeat, exponential-backoff reconnection, per-connection metrics, and
//! raw send/receive.
//!
//! # Event Loop
//!
//! Each successful connect spawns a session task that handles:
//!
//! - Incoming frames from the server (deserialize, metrics, listener dispatch)
//! - Outgoing frames from the send API
//! - Heartbeat emission and stall detection
//! - Reconnection with exponential backoff on abnormal closure
//!
//! All timers live inside the session task; dropping the task on shutdown
//! cancels them deterministically.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant as TokioInstant, interval_at, timeout};
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::cache::CacheService;
use crate::config::WsConfig;
use crate::error::{Error, Result};
use crate::protocol::message::now_millis;
use crate::protocol::{Feature, Message, SubscriptionId};

// ============================================================================
// Constants
// ============================================================================

/// Exponential moving average weight kept by the previous latency value.
const LATENCY_DECAY: f64 = 0.9;

/// Cap on the backoff shift so the multiplier cannot overflow.
const MAX_BACKOFF_SHIFT: u32 = 16;

// ============================================================================
// Types
// ============================================================================

/// The physical socket type used by this crate.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Listener arena: feature → registered callbacks.
type ListenerMap = FxHashMap<Feature, Vec<(SubscriptionId, Arc<dyn ConnectionListener>)>>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a [`WsConnection`].
///
/// `Disconnected → Connecting → Connected → (Disconnected | Reconnecting |
/// Error)`; `Reconnecting → Connecting` per attempt. `Error` is terminal
/// until the caller re-`connect`s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; initial and post-disconnect state.
    #[default]
    Disconnected,
    /// Open handshake in flight.
    Connecting,
    /// Socket open, heartbeats running.
    Connected,
    /// Abnormal closure observed; backoff in progress.
    Reconnecting,
    /// Reconnect attempts exhausted; automatic recovery stopped.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ConnectionListener
// ============================================================================

/// Lifecycle callbacks scoped to a feature.
///
/// All methods default to no-ops; implement the subset you need.
/// `on_message` fires only for messages on the subscribed feature; the
/// remaining callbacks fire for every registered listener.
pub trait ConnectionListener: Send + Sync {
    /// Socket opened (initial connect or successful reconnect).
    fn on_connect(&self) {}

    /// Socket closed (any cause).
    fn on_disconnect(&self) {}

    /// A message arrived on the subscribed feature.
    fn on_message(&self, _message: &Message) {}

    /// A transport-level failure was observed.
    fn on_error(&self, _error: &Error) {}

    /// A reconnect attempt is starting.
    fn on_reconnect(&self, _attempt: u32) {}
}

// ============================================================================
// ConnectionMetrics
// ============================================================================

/// Point-in-time snapshot of per-connection metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionMetrics {
    /// Frames successfully handed to the socket.
    pub messages_sent: u64,
    /// Frames received and parsed.
    pub messages_received: u64,
    /// Transport and parse failures observed.
    pub error_count: u64,
    /// Successful reconnects.
    pub reconnect_count: u64,
    /// Exponentially smoothed round-trip latency, milliseconds.
    pub average_latency_ms: f64,
    /// Time connected in the current session, milliseconds.
    pub uptime_ms: u64,
}

/// Mutable metrics state owned by the connection.
#[derive(Debug, Default)]
struct MetricsInner {
    messages_sent: u64,
    messages_received: u64,
    error_count: u64,
    reconnect_count: u64,
    average_latency_ms: f64,
    connected_at: Option<Instant>,
}

// ============================================================================
// Internal Types
// ============================================================================

/// Commands for the session task.
enum ConnectionCommand {
    /// Write a serialized frame to the socket.
    Send(String),
    /// Close the socket with a normal-closure code and stop.
    Shutdown,
}

/// How a single socket session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Normal closure or explicit shutdown; no reconnect.
    Clean,
    /// Abnormal closure; eligible for reconnect.
    Lost,
}

/// State shared between the API surface and the session task.
struct Shared {
    config: WsConfig,
    state: Mutex<ConnectionState>,
    listeners: Mutex<ListenerMap>,
    metrics: Mutex<MetricsInner>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<ConnectionCommand>>>,
    cache: Option<Arc<dyn CacheService>>,
    shutdown: AtomicBool,
}

// ============================================================================
// WsConnection
// ============================================================================

/// One physical WebSocket connection.
///
/// # Thread Safety
///
/// `WsConnection` is `Send + Sync` and cheap to clone; clones share the
/// same socket and state.
#[derive(Clone)]
pub struct WsConnection {
    shared: Arc<Shared>,
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection")
            .field("url", &self.shared.config.url)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// WsConnection - Constructors
// ============================================================================

impl WsConnection {
    /// Creates a connection for the configured endpoint.
    ///
    /// The socket is not dialed until [`WsConnection::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: WsConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Creates a connection that opportunistically persists sent messages
    /// into the given cache service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn with_cache(config: WsConfig, cache: Arc<dyn CacheService>) -> Result<Self> {
        Self::build(config, Some(cache))
    }

    fn build(config: WsConfig, cache: Option<Arc<dyn CacheService>>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                listeners: Mutex::new(ListenerMap::default()),
                metrics: Mutex::new(MetricsInner::default()),
                command_tx: Mutex::new(None),
                cache,
                shutdown: AtomicBool::new(false),
            }),
        })
    }
}

// ============================================================================
// WsConnection - Lifecycle
// ============================================================================

impl WsConnection {
    /// Opens the socket at `url?token=...`.
    ///
    /// A call while already `Connecting` or `Connected` is a logged no-op.
    /// On success the state transitions to `Connected`, the reconnect
    /// counter resets, and the heartbeat starts.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the open handshake does not
    ///   complete within `connection_timeout`
    /// - [`Error::WebSocket`] on handshake failure
    pub async fn connect(&self, auth_token: &str) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    debug!(state = %*state, "connect ignored, already in progress");
                    return Ok(());
                }
                _ => *state = ConnectionState::Connecting,
            }
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);

        let url = Self::connect_url(&self.shared.config.url, auth_token)?;

        match Self::dial(&url, self.shared.config.connection_timeout).await {
            Ok(ws) => {
                let (command_tx, command_rx) = mpsc::unbounded_channel();
                *self.shared.command_tx.lock() = Some(command_tx);
                {
                    let mut state = self.shared.state.lock();
                    *state = ConnectionState::Connected;
                }
                self.shared.metrics.lock().connected_at = Some(Instant::now());

                info!(url = %self.shared.config.url, "Connection established");
                Self::notify(&self.shared, |l| l.on_connect());

                let shared = Arc::clone(&self.shared);
                tokio::spawn(Self::run_session(shared, url, ws, command_rx));
                Ok(())
            }
            Err(e) => {
                *self.shared.state.lock() = ConnectionState::Disconnected;
                self.shared.metrics.lock().error_count += 1;
                warn!(error = %e, "Connect failed");
                Self::notify(&self.shared, |l| l.on_error(&e));
                Err(e)
            }
        }
    }

    /// Closes the connection.
    ///
    /// Cancels all timers, closes the socket with a normal-closure code,
    /// clears the subscriber list, and transitions to `Disconnected`.
    /// Always succeeds; calling on a closed connection is a no-op.
    pub fn disconnect(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(tx) = self.shared.command_tx.lock().take() {
            let _ = tx.send(ConnectionCommand::Shutdown);
        }
        self.shared.listeners.lock().clear();
        *self.shared.state.lock() = ConnectionState::Disconnected;
        debug!("Disconnected");
    }
}

// ============================================================================
// WsConnection - Send Path
// ============================================================================

impl WsConnection {
    /// Serializes and sends a message.
    ///
    /// On success the sent counter increments and the message is
    /// opportunistically persisted (TTL-bounded) for crash recovery;
    /// persistence failures are logged, never surfaced.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless the state is `Connected` (the sent
    ///   counter is not incremented)
    /// - [`Error::InvalidMessage`] if the message fails its invariant
    /// - [`Error::Serialization`] if the message cannot be serialized
    pub async fn send_message(&self, message: Message) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        message.validate()?;
        let frame = message.to_wire()?;

        let tx = self
            .shared
            .command_tx
            .lock()
            .clone()
            .ok_or(Error::NotConnected)?;
        tx.send(ConnectionCommand::Send(frame))
            .map_err(|_| Error::ConnectionClosed)?;

        if self.shared.config.enable_metrics {
            self.shared.metrics.lock().messages_sent += 1;
        }
        trace!(id = %message.id, feature = %message.feature, "Message sent");

        self.persist_sent(&message).await;
        Ok(())
    }

    /// Best-effort persistence of a sent message.
    async fn persist_sent(&self, message: &Message) {
        let Some(cache) = &self.shared.cache else {
            return;
        };
        let key = format!("ws:sent:{}:{}", message.feature, message.id);
        match serde_json::to_value(message) {
            Ok(value) => {
                if let Err(e) = cache.set(&key, value, self.shared.config.default_ttl).await {
                    debug!(error = %e, key = %key, "Sent-message persistence failed");
                }
            }
            Err(e) => debug!(error = %e, "Sent-message not serializable for persistence"),
        }
    }
}

// ============================================================================
// WsConnection - Subscriptions
// ============================================================================

impl WsConnection {
    /// Registers lifecycle callbacks scoped to a feature.
    pub fn subscribe(
        &self,
        feature: Feature,
        listener: Arc<dyn ConnectionListener>,
    ) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.shared
            .listeners
            .lock()
            .entry(feature.clone())
            .or_default()
            .push((id, listener));
        debug!(feature = %feature, subscription = %id, "Listener subscribed");
        id
    }

    /// Removes a listener; removing the last listener for a feature
    /// removes the feature entry.
    pub fn unsubscribe(&self, feature: &Feature, id: SubscriptionId) {
        let mut listeners = self.shared.listeners.lock();
        if let Some(entries) = listeners.get_mut(feature) {
            entries.retain(|(sid, _)| *sid != id);
            if entries.is_empty() {
                listeners.remove(feature);
            }
        }
    }

    /// Returns the number of listeners registered for a feature.
    #[must_use]
    pub fn listener_count(&self, feature: &Feature) -> usize {
        self.shared
            .listeners
            .lock()
            .get(feature)
            .map_or(0, Vec::len)
    }
}

// ============================================================================
// WsConnection - Reads
// ============================================================================

impl WsConnection {
    /// Returns `true` while the socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Returns a metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> ConnectionMetrics {
        let inner = self.shared.metrics.lock();
        let uptime_ms = match (*self.shared.state.lock(), inner.connected_at) {
            (ConnectionState::Connected, Some(at)) => at.elapsed().as_millis() as u64,
            _ => 0,
        };
        ConnectionMetrics {
            messages_sent: inner.messages_sent,
            messages_received: inner.messages_received,
            error_count: inner.error_count,
            reconnect_count: inner.reconnect_count,
            average_latency_ms: inner.average_latency_ms,
            uptime_ms,
        }
    }
}

// ============================================================================
// WsConnection - Session Task
// ============================================================================

impl WsConnection {
    /// Builds the connect URL with the bearer token as a query parameter.
    fn connect_url(base: &str, token: &str) -> Result<Url> {
        let mut url = Url::parse(base)?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// Dials the endpoint under the handshake timeout.
    async fn dial(url: &Url, handshake_timeout: Duration) -> Result<WsStream> {
        match timeout(handshake_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(Error::WebSocket(e)),
            Err(_) => Err(Error::connection_timeout(
                handshake_timeout.as_millis() as u64
            )),
        }
    }

    /// Supervises one logical connection across reconnects.
    ///
    /// The last known token travels inside `url`; reconnects re-send it.
    async fn run_session(
        shared: Arc<Shared>,
        url: Url,
        mut ws: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    ) {
        loop {
            let end = Self::drive(&shared, ws, &mut command_rx).await;
            Self::notify(&shared, |l| l.on_disconnect());

            match end {
                SessionEnd::Clean => {
                    *shared.state.lock() = ConnectionState::Disconnected;
                    break;
                }
                SessionEnd::Lost => {
                    if shared.shutdown.load(Ordering::SeqCst) {
                        *shared.state.lock() = ConnectionState::Disconnected;
                        break;
                    }
                    match Self::reconnect(&shared, &url).await {
                        Some(new_ws) => {
                            ws = new_ws;
                            continue;
                        }
                        None => {
                            if shared.shutdown.load(Ordering::SeqCst) {
                                *shared.state.lock() = ConnectionState::Disconnected;
                            } else {
                                error!(
                                    attempts = shared.config.max_reconnect_attempts,
                                    "Reconnect attempts exhausted"
                                );
                                *shared.state.lock() = ConnectionState::Error;
                            }
                            break;
                        }
                    }
                }
            }
        }
        // Explicit disconnect already took the sender; clearing here would
        // clobber a session started by an immediate re-connect.
        if !shared.shutdown.load(Ordering::SeqCst) {
            *shared.command_tx.lock() = None;
        }
        debug!("Session task terminated");
    }

    /// Event loop for one live socket. Returns how the session ended.
    async fn drive(
        shared: &Arc<Shared>,
        ws: WsStream,
        command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        let period = shared.config.heartbeat_interval;
        let mut heartbeat = interval_at(TokioInstant::now() + period, period);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(WsFrame::Text(text))) => {
                            last_inbound = Instant::now();
                            Self::handle_frame(shared, text.as_str());
                        }
                        Some(Ok(WsFrame::Close(close_frame))) => {
                            let clean = close_frame
                                .as_ref()
                                .is_some_and(|f| f.code == CloseCode::Normal);
                            debug!(clean, "WebSocket closed by remote");
                            return if clean { SessionEnd::Clean } else { SessionEnd::Lost };
                        }
                        Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => {
                            last_inbound = Instant::now();
                        }
                        // Binary frames are not part of this wire format
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            shared.metrics.lock().error_count += 1;
                            let err = Error::WebSocket(e);
                            Self::notify(shared, |l| l.on_error(&err));
                            return SessionEnd::Lost;
                        }
                        None => {
                            debug!("WebSocket stream ended");
                            return SessionEnd::Lost;
                        }
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(frame)) => {
                            if let Err(e) = sink.send(WsFrame::Text(frame.into())).await {
                                warn!(error = %e, "Frame send failed");
                                shared.metrics.lock().error_count += 1;
                                let err = Error::WebSocket(e);
                                Self::notify(shared, |l| l.on_error(&err));
                                return SessionEnd::Lost;
                            }
                        }
                        Some(ConnectionCommand::Shutdown) | None => {
                            debug!("Shutdown command received");
                            let _ = sink.close().await;
                            return SessionEnd::Clean;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    if last_inbound.elapsed() > shared.config.heartbeat_timeout {
                        warn!(
                            silent_ms = last_inbound.elapsed().as_millis() as u64,
                            "Heartbeat timeout, closing stalled connection"
                        );
                        let _ = sink.close().await;
                        return SessionEnd::Lost;
                    }
                    if let Some(end) = Self::send_heartbeat(shared, &mut sink).await {
                        return end;
                    }
                }
            }
        }
    }

    /// Emits one heartbeat frame. Returns `Some` when the session must end.
    async fn send_heartbeat(
        shared: &Arc<Shared>,
        sink: &mut SplitSink<WsStream, WsFrame>,
    ) -> Option<SessionEnd> {
        let heartbeat = Message::heartbeat();
        let frame = match heartbeat.to_wire() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Heartbeat serialization failed");
                return None;
            }
        };
        if let Err(e) = sink.send(WsFrame::Text(frame.into())).await {
            warn!(error = %e, "Heartbeat send failed");
            shared.metrics.lock().error_count += 1;
            let err = Error::WebSocket(e);
            Self::notify(shared, |l| l.on_error(&err));
            return Some(SessionEnd::Lost);
        }
        if shared.config.enable_metrics {
            shared.metrics.lock().messages_sent += 1;
        }
        trace!("Heartbeat sent");
        None
    }

    /// Re-dials with exponential backoff until success or attempts run out.
    async fn reconnect(shared: &Arc<Shared>, url: &Url) -> Option<WsStream> {
        let max_attempts = shared.config.max_reconnect_attempts;
        let mut attempt = 0;

        while attempt < max_attempts {
            attempt += 1;
            *shared.state.lock() = ConnectionState::Reconnecting;
            Self::notify(shared, |l| l.on_reconnect(attempt));

            let delay = backoff_delay(shared.config.reconnect_delay, attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::time::sleep(delay).await;

            if shared.shutdown.load(Ordering::SeqCst) {
                return None;
            }

            *shared.state.lock() = ConnectionState::Connecting;
            match Self::dial(url, shared.config.connection_timeout).await {
                Ok(ws) => {
                    {
                        let mut metrics = shared.metrics.lock();
                        metrics.reconnect_count += 1;
                        metrics.connected_at = Some(Instant::now());
                    }
                    *shared.state.lock() = ConnectionState::Connected;
                    info!(attempt, "Reconnected");
                    Self::notify(shared, |l| l.on_connect());
                    return Some(ws);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Reconnect attempt failed");
                    shared.metrics.lock().error_count += 1;
                    Self::notify(shared, |l| l.on_error(&e));
                }
            }
        }
        None
    }

    /// Parses an inbound frame, records metrics, dispatches to listeners.
    fn handle_frame(shared: &Arc<Shared>, text: &str) {
        let message = match Message::from_wire(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Failed to parse inbound frame");
                shared.metrics.lock().error_count += 1;
                return;
            }
        };

        if shared.config.enable_metrics {
            let mut metrics = shared.metrics.lock();
            metrics.messages_received += 1;
            if let Some(sent_at) = message.sent_at() {
                let sample = now_millis().saturating_sub(sent_at) as f64;
                metrics.average_latency_ms = if metrics.average_latency_ms == 0.0 {
                    sample
                } else {
                    metrics.average_latency_ms * LATENCY_DECAY + sample * (1.0 - LATENCY_DECAY)
                };
            }
        }

        let feature_listeners: Vec<Arc<dyn ConnectionListener>> = shared
            .listeners
            .lock()
            .get(&message.feature)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        trace!(
            id = %message.id,
            feature = %message.feature,
            listeners = feature_listeners.len(),
            "Frame dispatched"
        );
        for listener in feature_listeners {
            listener.on_message(&message);
        }
    }

    /// Invokes a lifecycle callback on every registered listener.
    fn notify(shared: &Shared, f: impl Fn(&dyn ConnectionListener)) {
        let all: Vec<Arc<dyn ConnectionListener>> = shared
            .listeners
            .lock()
            .values()
            .flat_map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)))
            .collect();
        for listener in all {
            f(listener.as_ref());
        }
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Delay before reconnect attempt `attempt` (1-based):
/// `base * 2^(attempt-1)`, shift capped to avoid overflow.
#[must_use]
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    base.saturating_mul(1u32 << shift)
}

// ============================================================================
// Tests
// ============================================================================
