//! Prometheus metrics for block range streaming.
//!
//! All metrics follow the naming convention: `zb_stream_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Data events received across all sessions (duplicates included)
    pub static ref BLOCKS_RECEIVED: Counter = Counter::new(
        "zb_stream_blocks_received_total",
        "Total compact blocks received from streaming calls"
    ).expect("metric creation failed");

    /// Session outcomes
    pub static ref SESSIONS: CounterVec = CounterVec::new(
        Opts::new("zb_stream_sessions_total", "Streaming sessions by outcome"),
        &["outcome"]  // completed/cancelled/deadline_exceeded/partial/server_error/transport_error
    ).expect("metric creation failed");

    /// Session wall clock duration
    pub static ref SESSION_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "zb_stream_session_duration_seconds",
            "Time from stream open to outcome"
        ).buckets(exponential_buckets(0.005, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    /// Sessions currently open
    pub static ref ACTIVE_SESSIONS: Gauge = Gauge::new(
        "zb_stream_active_sessions",
        "Streaming sessions currently open"
    ).expect("metric creation failed");

    /// Stream re-opens during batched sync
    pub static ref RETRIES: Counter = Counter::new(
        "zb_stream_retries_total",
        "Streams re-opened after a retryable failure"
    ).expect("metric creation failed");

    /// Transactions handed to consumers
    pub static ref TRANSACTIONS_FLATTENED: Counter = Counter::new(
        "zb_stream_transactions_flattened_total",
        "Transactions flattened and delivered downstream"
    ).expect("metric creation failed");

    /// Highest height delivered by batched sync
    pub static ref SYNCED_HEIGHT: Gauge = Gauge::new(
        "zb_stream_synced_height",
        "Highest block height delivered to a consumer"
    ).expect("metric creation failed");
}

/// Handle to the registry the metrics live in.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry. Calling it again is a
/// no-op.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BLOCKS_RECEIVED.clone()),
        Box::new(SESSIONS.clone()),
        Box::new(SESSION_DURATION.clone()),
        Box::new(ACTIVE_SESSIONS.clone()),
        Box::new(RETRIES.clone()),
        Box::new(TRANSACTIONS_FLATTENED.clone()),
        Box::new(SYNCED_HEIGHT.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }

    /// Seconds elapsed so far.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.elapsed_secs());
    }
}

/// Gauge held up by one while the guard lives.
pub struct GaugeGuard {
    gauge: Gauge,
}

impl GaugeGuard {
    /// Increment `gauge` until the guard is dropped.
    pub fn new(gauge: &Gauge) -> Self {
        gauge.inc();
        Self {
            gauge: gauge.clone(),
        }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}
