//! # ZB Telemetry
//!
//! Observability for the compact block stream client.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` registry with `EnvFilter` and a
//!   pretty or JSON `fmt` layer
//! - **Metrics**: Prometheus counters and histograms in a process-wide
//!   registry, exposed in text format via `encode_metrics`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zb_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).expect("telemetry");
//!     // sessions now log and record metrics
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ZB_SERVICE_NAME` | `zb-block-stream` | Service name in logs |
//! | `ZB_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `ZB_JSON_LOGS` | `false` | JSON formatted logs |
//! | `ZB_CONSOLE_OUTPUT` | `true` | Write logs to stderr |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, LoggingGuard};
pub use metrics::{
    encode_metrics, register_metrics, GaugeGuard, HistogramTimer, MetricsHandle, ACTIVE_SESSIONS,
    BLOCKS_RECEIVED, REGISTRY, RETRIES, SESSIONS, SESSION_DURATION, SYNCED_HEIGHT,
    TRANSACTIONS_FLATTENED,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Metric registration or encoding failed.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    /// Invalid filter or other setting.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first so early sessions are counted
    let metrics = register_metrics()?;
    let logging = init_logging(&config)?;

    tracing::info!(service = %config.service_name, "[zb-telemetry] telemetry initialized");
    Ok(TelemetryGuard {
        _logging: logging,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logging: LoggingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!("[zb-telemetry] shutting down telemetry");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
