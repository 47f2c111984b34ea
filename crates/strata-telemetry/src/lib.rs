//! Logging and metrics plumbing for Strata services.
//!
//! - **Logging**: a `tracing-subscriber` registry with an `EnvFilter` and a
//!   JSON or pretty `fmt` layer ([`logging`])
//! - **Metrics**: [`PrometheusSink`], a [`MetricsSink`](strata_core::MetricsSink)
//!   that forwards to the `metrics` facade, plus an optional Prometheus scrape
//!   listener ([`metrics`])
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_server::App;
//! use strata_telemetry::{init_telemetry, PrometheusSink, TelemetryConfig};
//!
//! init_telemetry(
//!     &TelemetryConfig::builder()
//!         .service_name("orders")
//!         .environment("production")
//!         .metrics_addr("0.0.0.0:9090")
//!         .build(),
//! )?;
//!
//! let app = App::builder()
//!     .name("orders")
//!     .metrics(Arc::new(PrometheusSink::new()))
//!     .router(routes())
//!     .build()?;
//! ```

#![doc(html_root_url = "https://docs.rs/strata-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, render_metrics, MetricsConfig, PrometheusSink};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Installs logging, then the metrics exporter.
///
/// # Errors
///
/// Returns the first subsystem failure.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        "telemetry initialized"
    );
    Ok(())
}
