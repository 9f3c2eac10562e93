//! Connection pool manager.
//!
//! Owns zero-or-more [`WsConnection`]s per feature and decides which one
//! serves a given operation: load-balanced selection, capacity enforcement,
//! periodic health scoring, and failover eviction.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ConnectionManager             │
//! │  ┌────────────────────────────────────┐  │
//! │  │ chat     → conn A (score 92)       │  │
//! │  │ chat     → conn B (score 71)       │  │
//! │  │ feed     → conn C (score 100)      │  │
//! │  └────────────────────────────────────┘  │
//! │  health-check loop · idle cleanup        │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Health scores are derived, never authoritative: selection and eviction
//! use them, connectivity state always comes from the connection itself.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::cache::CacheService;
use crate::config::{LoadBalancingStrategy, WsConfig};
use crate::error::{Error, Result};
use crate::protocol::{ConnectionId, Feature, Message};
use crate::transport::WsConnection;

// ============================================================================
// Constants
// ============================================================================

/// Connections unused for longer than this are reaped under capacity
/// pressure.
const IDLE_THRESHOLD: Duration = Duration::from_secs(300);

/// Health score below which failover removes a connection.
const LOW_HEALTH_THRESHOLD: u8 = 30;

/// Error count above which a connection is unhealthy.
const UNHEALTHY_ERROR_LIMIT: u64 = 5;

/// Error count above which a connection is degraded.
const DEGRADED_ERROR_LIMIT: u64 = 2;

/// Latency above which a connection is degraded.
const DEGRADED_LATENCY_MS: f64 = 1000.0;

// ============================================================================
// HealthStatus
// ============================================================================

/// Derived connection fitness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Connected, responsive, low error count.
    Healthy,
    /// High latency or elevated error count.
    Degraded,
    /// Disconnected or error count beyond the limit.
    Unhealthy,
}

// ============================================================================
// ConnectionHealth
// ============================================================================

/// Result of one health-check tick for one connection.
///
/// Recomputed on every tick; never persisted beyond process lifetime.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    /// Derived status.
    pub status: HealthStatus,
    /// Smoothed latency at check time, milliseconds.
    pub latency_ms: f64,
    /// Connection uptime at check time, milliseconds.
    pub uptime_ms: u64,
    /// Accumulated health-check errors.
    pub error_count: u64,
    /// Most recent health-check error, if any.
    pub last_error: Option<String>,
    /// When this check ran.
    pub checked_at: Instant,
}

// ============================================================================
// ConnectionRecord
// ============================================================================

/// Pool bookkeeping for one tracked connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    /// Pool-unique id.
    pub id: ConnectionId,
    /// Feature this connection serves.
    pub feature: Feature,
    /// Owning priority, used by the `priority` strategy.
    pub priority: i32,
    /// Eligible for selection.
    pub is_active: bool,
    /// Last selection instant; drives idle cleanup.
    pub last_used_at: Instant,
    /// Derived 0-100 fitness score.
    pub health_score: u8,
    /// Registration order for round-robin cycling.
    seq: u64,
}

/// One pool slot: record plus the live connection.
struct PoolEntry {
    record: ConnectionRecord,
    connection: WsConnection,
}

// ============================================================================
// SelectedConnection
// ============================================================================

/// A connection chosen by [`ConnectionManager::get_connection`].
#[derive(Debug, Clone)]
pub struct SelectedConnection {
    /// Pool id, for `release_connection`/`remove_connection`.
    pub id: ConnectionId,
    /// The live connection.
    pub connection: WsConnection,
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Pool of [`WsConnection`]s keyed by id, partitioned by feature.
///
/// All maps are owned, encapsulated state; callers obtain a manager via
/// explicit construction, never ambient lookup.
pub struct ConnectionManager {
    /// Engine configuration shared with created connections.
    config: WsConfig,

    /// Cache service handed to created connections for sent-message
    /// persistence.
    cache: Option<Arc<dyn CacheService>>,

    /// Tracked connections by id.
    entries: Mutex<FxHashMap<ConnectionId, PoolEntry>>,

    /// Latest health-check results by id.
    health: Mutex<FxHashMap<ConnectionId, ConnectionHealth>>,

    /// Shared round-robin cursor.
    rr_cursor: AtomicUsize,

    /// Registration sequence source.
    next_seq: AtomicU64,

    /// Shutdown flag for the health-check loop.
    shutdown: AtomicBool,
}

// ============================================================================
// ConnectionManager - Constructors
// ============================================================================

impl ConnectionManager {
    /// Creates a manager for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: WsConfig) -> Result<Arc<Self>> {
        Self::build(config, None)
    }

    /// Creates a manager whose connections persist sent messages into the
    /// given cache service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn with_cache(config: WsConfig, cache: Arc<dyn CacheService>) -> Result<Arc<Self>> {
        Self::build(config, Some(cache))
    }

    fn build(config: WsConfig, cache: Option<Arc<dyn CacheService>>) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            cache,
            entries: Mutex::new(FxHashMap::default()),
            health: Mutex::new(FxHashMap::default()),
            rr_cursor: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }))
    }

    /// Spawns the periodic health-check loop.
    ///
    /// Runs every `health_check_interval` until [`ConnectionManager::shutdown`].
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.health_check_interval);
            // interval's first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if manager.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                manager.perform_health_check().await;
            }
            debug!("Health-check loop terminated");
        });
        info!(
            interval_ms = self.config.health_check_interval.as_millis() as u64,
            "ConnectionManager started"
        );
    }
}

// ============================================================================
// ConnectionManager - Pool Operations
// ============================================================================

impl ConnectionManager {
    /// Creates and tracks a new connection for a feature.
    ///
    /// The underlying connection is not dialed; callers `connect` it via
    /// [`ConnectionManager::connection`] or the returned selection.
    ///
    /// # Errors
    ///
    /// - [`Error::CapacityExceeded`] if the pool is full and idle cleanup
    ///   cannot free a slot
    /// - [`Error::Config`] if the shared configuration is invalid
    pub fn create_connection(&self, feature: Feature, priority: i32) -> Result<ConnectionId> {
        let connection = match &self.cache {
            Some(cache) => WsConnection::with_cache(self.config.clone(), Arc::clone(cache))?,
            None => WsConnection::new(self.config.clone())?,
        };

        let mut entries = self.entries.lock();
        if entries.len() >= self.config.max_connections {
            self.cleanup_idle(&mut entries);
            if entries.len() >= self.config.max_connections {
                warn!(
                    limit = self.config.max_connections,
                    "Connection pool at capacity"
                );
                return Err(Error::capacity_exceeded(self.config.max_connections));
            }
        }

        let id = ConnectionId::generate();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            id,
            PoolEntry {
                record: ConnectionRecord {
                    id,
                    feature: feature.clone(),
                    priority,
                    is_active: true,
                    last_used_at: Instant::now(),
                    health_score: 100,
                    seq,
                },
                connection,
            },
        );
        debug!(connection_id = %id, feature = %feature, priority, "Connection created");
        Ok(id)
    }

    /// Selects among a feature's active connections using the configured
    /// strategy. Returns `None` when none exist; the manager never
    /// auto-creates on read.
    #[must_use]
    pub fn get_connection(&self, feature: &Feature) -> Option<SelectedConnection> {
        let mut entries = self.entries.lock();
        let health = self.health.lock();

        let mut candidates: Vec<(ConnectionId, u64, i32, u8, u64)> = entries
            .values()
            .filter(|e| e.record.is_active && e.record.feature == *feature)
            .map(|e| {
                let errors = health.get(&e.record.id).map_or(0, |h| h.error_count);
                (
                    e.record.id,
                    e.record.seq,
                    e.record.priority,
                    e.record.health_score,
                    errors,
                )
            })
            .collect();
        drop(health);

        if candidates.is_empty() {
            return None;
        }
        // Registration order keeps round-robin cycling stable.
        candidates.sort_by_key(|(_, seq, ..)| *seq);

        let chosen = match self.config.load_balancing_strategy {
            LoadBalancingStrategy::RoundRobin => {
                let idx = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                candidates[idx].0
            }
            LoadBalancingStrategy::LeastConnections => {
                candidates
                    .iter()
                    .min_by_key(|(_, _, priority, score, errors)| {
                        (*errors, u8::MAX - score, i64::from(*priority).wrapping_neg())
                    })
                    .map(|(id, ..)| *id)?
            }
            LoadBalancingStrategy::Priority => {
                candidates
                    .iter()
                    .max_by_key(|(_, _, priority, score, _)| (*priority, *score))
                    .map(|(id, ..)| *id)?
            }
        };

        let entry = entries.get_mut(&chosen)?;
        entry.record.last_used_at = Instant::now();
        Some(SelectedConnection {
            id: chosen,
            connection: entry.connection.clone(),
        })
    }

    /// Marks a connection inactive for reuse bookkeeping.
    ///
    /// The socket stays open; idle cleanup reaps it later if unused.
    pub fn release_connection(&self, id: ConnectionId) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.record.is_active = false;
                entry.record.last_used_at = Instant::now();
                debug!(connection_id = %id, "Connection released");
            }
            None => debug!(connection_id = %id, "Release for unknown connection"),
        }
    }

    /// Closes and discards a tracked connection. Idempotent.
    pub fn remove_connection(&self, id: ConnectionId) {
        let removed = self.entries.lock().remove(&id);
        self.health.lock().remove(&id);

        if let Some(entry) = removed {
            entry.connection.disconnect();
            debug!(connection_id = %id, feature = %entry.record.feature, "Connection removed");
        }
    }

    /// Returns the live connection for an id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] for an unknown id.
    pub fn connection(&self, id: ConnectionId) -> Result<WsConnection> {
        self.entries
            .lock()
            .get(&id)
            .map(|e| e.connection.clone())
            .ok_or_else(|| Error::connection_not_found(id))
    }

    /// Returns the bookkeeping record for an id.
    #[must_use]
    pub fn record(&self, id: ConnectionId) -> Option<ConnectionRecord> {
        self.entries.lock().get(&id).map(|e| e.record.clone())
    }

    /// Returns the latest health-check result for an id.
    #[must_use]
    pub fn health(&self, id: ConnectionId) -> Option<ConnectionHealth> {
        self.health.lock().get(&id).cloned()
    }

    /// Returns the number of tracked connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.entries.lock().len()
    }
}

// ============================================================================
// ConnectionManager - Health Checks
// ============================================================================

impl ConnectionManager {
    /// Runs one health-check pass over every tracked connection.
    ///
    /// Pings each connection with a heartbeat, derives status and a 0-100
    /// score, and (with failover enabled) removes connections scoring below
    /// the low-health threshold.
    pub async fn perform_health_check(&self) {
        // Copy before iterating: connections may be removed mid-pass.
        let snapshot: Vec<(ConnectionId, WsConnection)> = self
            .entries
            .lock()
            .values()
            .map(|e| (e.record.id, e.connection.clone()))
            .collect();

        for (id, connection) in snapshot {
            let connected = connection.is_connected();
            let mut ping_error: Option<String> = None;
            if connected {
                if let Err(e) = connection.send_message(Message::heartbeat()).await {
                    ping_error = Some(e.to_string());
                }
            }

            let metrics = connection.metrics();
            let (prev_errors, prev_error) = self
                .health
                .lock()
                .get(&id)
                .map_or((0, None), |h| (h.error_count, h.last_error.clone()));

            let failed = !connected || ping_error.is_some();
            let error_count = prev_errors + u64::from(failed);
            let status = derive_status(connected, metrics.average_latency_ms, error_count);
            let score = health_score(status, metrics.average_latency_ms, error_count);

            let health = ConnectionHealth {
                status,
                latency_ms: metrics.average_latency_ms,
                uptime_ms: metrics.uptime_ms,
                error_count,
                last_error: ping_error.or(prev_error),
                checked_at: Instant::now(),
            };
            debug!(
                connection_id = %id,
                ?status,
                score,
                errors = error_count,
                "Health check"
            );
            self.health.lock().insert(id, health);
            if let Some(entry) = self.entries.lock().get_mut(&id) {
                entry.record.health_score = score;
            }
        }

        if self.config.enable_failover {
            let failing: Vec<ConnectionId> = self
                .entries
                .lock()
                .values()
                .filter(|e| e.record.health_score < LOW_HEALTH_THRESHOLD)
                .map(|e| e.record.id)
                .collect();
            for id in failing {
                warn!(connection_id = %id, "Failover: removing low-health connection");
                self.remove_connection(id);
            }
        }
    }

    /// Removes connections idle past the threshold, oldest-idle-first.
    ///
    /// Called under capacity pressure with the entries lock held.
    fn cleanup_idle(&self, entries: &mut FxHashMap<ConnectionId, PoolEntry>) {
        let mut idle: Vec<(ConnectionId, Instant)> = entries
            .values()
            .filter(|e| e.record.last_used_at.elapsed() > IDLE_THRESHOLD)
            .map(|e| (e.record.id, e.record.last_used_at))
            .collect();
        idle.sort_by_key(|(_, last_used)| *last_used);

        for (id, _) in idle {
            if let Some(entry) = entries.remove(&id) {
                entry.connection.disconnect();
                self.health.lock().remove(&id);
                debug!(connection_id = %id, "Idle connection reaped");
            }
        }
    }

    /// Stops the health-check loop and removes every connection.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutting down");
        self.shutdown.store(true, Ordering::SeqCst);

        let drained: Vec<PoolEntry> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, e)| e).collect()
        };
        for entry in &drained {
            entry.connection.disconnect();
        }
        self.health.lock().clear();
        info!(closed = drained.len(), "ConnectionManager shutdown complete");
    }
}

// ============================================================================
// Health Derivation
// ============================================================================

/// Classifies a connection from connectivity, latency, and error count.
#[must_use]
pub(crate) fn derive_status(connected: bool, latency_ms: f64, error_count: u64) -> HealthStatus {
    if !connected || error_count > UNHEALTHY_ERROR_LIMIT {
        HealthStatus::Unhealthy
    } else if latency_ms > DEGRADED_LATENCY_MS || error_count > DEGRADED_ERROR_LIMIT {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Derives the 0-100 health score from fixed penalties.
#[must_use]
pub(crate) fn health_score(status: HealthStatus, latency_ms: f64, error_count: u64) -> u8 {
    let mut score: i64 = 100;

    match status {
        HealthStatus::Unhealthy => score -= 60,
        HealthStatus::Degraded => score -= 25,
        HealthStatus::Healthy => {}
    }

    if latency_ms > 2000.0 {
        score -= 20;
    } else if latency_ms > 1000.0 {
        score -= 15;
    } else if latency_ms > 500.0 {
        score -= 5;
    }

    score -= (error_count.min(6) * 5) as i64;

    score.clamp(0, 100) as u8
}

// ============================================================================
// Tests
// ============================================================================
