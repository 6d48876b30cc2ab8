use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe metrics collector for the fill stream.
#[derive(Debug)]
pub struct StreamMetrics {
    // Counters
    frames_received: AtomicU64,
    fills_forwarded: AtomicU64,
    fills_filtered: AtomicU64,
    fills_dropped: AtomicU64,
    translation_errors: AtomicU64,
    websocket_errors: AtomicU64,
    connection_failures: AtomicU64,
    auth_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnect_successes: AtomicU64,

    // Gauges
    observed_orders: AtomicU64,

    // Timestamps
    inner: RwLock<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    start_time: Instant,
    last_frame_time: Option<Instant>,
    last_error_time: Option<Instant>,
    last_reconnect_time: Option<Instant>,
    /// Set while the stream is not subscribed. `None` while streaming.
    down_since: Option<Instant>,
    ever_streamed: bool,
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamMetrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            frames_received: AtomicU64::new(0),
            fills_forwarded: AtomicU64::new(0),
            fills_filtered: AtomicU64::new(0),
            fills_dropped: AtomicU64::new(0),
            translation_errors: AtomicU64::new(0),
            websocket_errors: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            reconnect_successes: AtomicU64::new(0),
            observed_orders: AtomicU64::new(0),
            inner: RwLock::new(MetricsInner {
                start_time: now,
                last_frame_time: None,
                last_error_time: None,
                last_reconnect_time: None,
                down_since: Some(now),
                ever_streamed: false,
            }),
        }
    }

    // --- Increment methods ---

    pub fn inc_frames_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_frame_time = Some(Instant::now());
    }

    pub fn inc_fills_forwarded(&self) {
        self.fills_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fills_filtered(&self) {
        self.fills_filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// A fill could not be handed to the consumer during shutdown.
    pub fn inc_fills_dropped(&self) {
        self.fills_dropped.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_translation_errors(&self) {
        self.translation_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_websocket_errors(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_connection_failures(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error_time = Some(Instant::now());
    }

    pub fn inc_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_reconnect_time = Some(Instant::now());
    }

    pub fn inc_reconnect_successes(&self) {
        self.reconnect_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_observed_orders(&self, count: usize) {
        self.observed_orders.store(count as u64, Ordering::Relaxed);
    }

    /// The stream is subscribed and reading.
    pub fn mark_streaming(&self) {
        let mut inner = self.inner.write();
        inner.down_since = None;
        inner.ever_streamed = true;
    }

    /// The stream lost its subscription. Keeps the earliest time if already down.
    pub fn mark_down(&self) {
        let mut inner = self.inner.write();
        if inner.down_since.is_none() {
            inner.down_since = Some(Instant::now());
        }
    }

    // --- Getter methods ---

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn fills_forwarded(&self) -> u64 {
        self.fills_forwarded.load(Ordering::Relaxed)
    }

    pub fn fills_filtered(&self) -> u64 {
        self.fills_filtered.load(Ordering::Relaxed)
    }

    pub fn fills_dropped(&self) -> u64 {
        self.fills_dropped.load(Ordering::Relaxed)
    }

    pub fn translation_errors(&self) -> u64 {
        self.translation_errors.load(Ordering::Relaxed)
    }

    pub fn websocket_errors(&self) -> u64 {
        self.websocket_errors.load(Ordering::Relaxed)
    }

    pub fn connection_failures(&self) -> u64 {
        self.connection_failures.load(Ordering::Relaxed)
    }

    pub fn auth_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn reconnect_successes(&self) -> u64 {
        self.reconnect_successes.load(Ordering::Relaxed)
    }

    pub fn observed_orders(&self) -> u64 {
        self.observed_orders.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> f64 {
        self.inner.read().start_time.elapsed().as_secs_f64()
    }

    pub fn secs_since_last_frame(&self) -> Option<f64> {
        self.inner
            .read()
            .last_frame_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    pub fn secs_since_last_error(&self) -> Option<f64> {
        self.inner
            .read()
            .last_error_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    pub fn secs_since_last_reconnect(&self) -> Option<f64> {
        self.inner
            .read()
            .last_reconnect_time
            .map(|t| t.elapsed().as_secs_f64())
    }

    /// Seconds the stream has been without a subscription, `None` while streaming.
    pub fn secs_down(&self) -> Option<f64> {
        self.inner
            .read()
            .down_since
            .map(|t| t.elapsed().as_secs_f64())
    }

    /// Generate a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let ever_streamed = self.inner.read().ever_streamed;
        MetricsSnapshot {
            frames_received: self.frames_received(),
            fills_forwarded: self.fills_forwarded(),
            fills_filtered: self.fills_filtered(),
            fills_dropped: self.fills_dropped(),
            translation_errors: self.translation_errors(),
            websocket_errors: self.websocket_errors(),
            connection_failures: self.connection_failures(),
            auth_failures: self.auth_failures(),
            reconnect_attempts: self.reconnect_attempts(),
            reconnect_successes: self.reconnect_successes(),
            observed_orders: self.observed_orders(),
            uptime_secs: self.uptime_secs(),
            secs_since_last_frame: self.secs_since_last_frame(),
            secs_since_last_error: self.secs_since_last_error(),
            secs_down: self.secs_down(),
            ever_streamed,
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub fills_forwarded: u64,
    pub fills_filtered: u64,
    pub fills_dropped: u64,
    pub translation_errors: u64,
    pub websocket_errors: u64,
    pub connection_failures: u64,
    pub auth_failures: u64,
    pub reconnect_attempts: u64,
    pub reconnect_successes: u64,
    pub observed_orders: u64,
    pub uptime_secs: f64,
    pub secs_since_last_frame: Option<f64>,
    pub secs_since_last_error: Option<f64>,
    pub secs_down: Option<f64>,
    pub ever_streamed: bool,
}

/// Health status of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Subscribed and reading.
    Healthy,
    /// Reconnecting, or still starting up.
    Degraded,
    /// Down for an extended period.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

impl MetricsSnapshot {
    /// Startup grace period before a missing subscription counts against health.
    const STARTUP_GRACE_SECS: f64 = 30.0;
    /// Threshold in seconds for considering the stream unhealthy.
    const UNHEALTHY_THRESHOLD_SECS: f64 = 60.0;

    /// Determine the health status based on how long the stream has been down.
    ///
    /// Frame age is not used: a private channel is silent whenever no own
    /// order trades, and the transport already reconnects dead sockets.
    pub fn health_status(&self) -> HealthStatus {
        let secs_down = match self.secs_down {
            None => return HealthStatus::Healthy,
            Some(secs) => secs,
        };

        if !self.ever_streamed && self.uptime_secs < Self::STARTUP_GRACE_SECS {
            HealthStatus::Healthy
        } else if secs_down > Self::UNHEALTHY_THRESHOLD_SECS {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Fill Stream Metrics ===")?;
        writeln!(f, "Uptime:              {:.1}s", self.uptime_secs)?;
        writeln!(f, "Frames received:     {}", self.frames_received)?;
        writeln!(f, "Fills forwarded:     {}", self.fills_forwarded)?;
        writeln!(f, "Fills filtered:      {}", self.fills_filtered)?;
        writeln!(f, "Fills dropped:       {}", self.fills_dropped)?;
        writeln!(f, "Translation errors:  {}", self.translation_errors)?;
        writeln!(f, "WebSocket errors:    {}", self.websocket_errors)?;
        writeln!(f, "Connect failures:    {}", self.connection_failures)?;
        writeln!(f, "Auth failures:       {}", self.auth_failures)?;
        writeln!(f, "Reconnect attempts:  {}", self.reconnect_attempts)?;
        writeln!(f, "Reconnect successes: {}", self.reconnect_successes)?;
        writeln!(f, "Observed orders:     {}", self.observed_orders)?;
        if let Some(secs) = self.secs_since_last_frame {
            writeln!(f, "Since last frame:    {:.1}s", secs)?;
        }
        if let Some(secs) = self.secs_since_last_error {
            writeln!(f, "Since last error:    {:.1}s", secs)?;
        }
        if let Some(secs) = self.secs_down {
            writeln!(f, "Down for:            {:.1}s", secs)?;
        }
        Ok(())
    }
}

/// Shared handle to metrics.
pub type SharedMetrics = Arc<StreamMetrics>;

pub fn create_metrics() -> SharedMetrics {
    Arc::new(StreamMetrics::new())
}
