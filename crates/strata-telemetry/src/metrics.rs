//! Prometheus metrics.
//!
//! [`PrometheusSink`] forwards Strata [`MetricEvent`]s to the `metrics`
//! facade, so whichever recorder is installed receives them. [`init_metrics`]
//! installs the Prometheus recorder with its own HTTP listener.
//!
//! | Event kind | Facade call | Labels |
//! |------------|-------------|--------|
//! | [`MetricKind::Value`] | `histogram!` | `route`, `result`, `status` when present |
//! | [`MetricKind::Count`] | `counter!` | same |
//! | [`MetricKind::Gauge`] | `gauge!` | same |
//!
//! Event names are passed through unchanged; the exporter rewrites
//! characters Prometheus does not accept (so `orders.pg-pool-available`
//! is scraped as `orders_pg_pool_available`).

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, gauge, histogram, Label};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use strata_core::{MetricEvent, MetricKind, MetricsSink};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics exporter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether to install the exporter.
    pub enabled: bool,

    /// Listen address of the scrape endpoint.
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Installs the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime; the listener runs as a task.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidAddress`] for a bad listen address and
/// [`TelemetryError::MetricsInit`] if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);

    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}

/// Renders the installed recorder in Prometheus text format.
///
/// Returns `None` if [`init_metrics`] has not installed one.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// A [`MetricsSink`] that forwards to the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl PrometheusSink {
    /// Creates the sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn labels(event: &MetricEvent) -> Vec<Label> {
    let mut labels = Vec::with_capacity(3);
    if let Some(route) = &event.route {
        labels.push(Label::new("route", route.clone()));
    }
    if let Some(result) = event.result {
        labels.push(Label::new("result", result.as_str()));
    }
    if let Some(status) = event.status {
        labels.push(Label::new("status", status.to_string()));
    }
    labels
}

impl MetricsSink for PrometheusSink {
    fn emit(&self, event: MetricEvent) {
        let labels = labels(&event);
        match event.kind {
            MetricKind::Value => histogram!(event.name, labels).record(event.value),
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            MetricKind::Count => counter!(event.name, labels).increment(event.value.max(0.0) as u64),
            MetricKind::Gauge => gauge!(event.name, labels).set(event.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::MetricResult;

    fn render_with(events: Vec<MetricEvent>) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            for event in events {
                PrometheusSink::new().emit(event);
            }
        });
        handle.render()
    }

    #[test]
    fn test_counter_with_labels() {
        let rendered = render_with(vec![
            MetricEvent::count("orders.query", 1).with_route(Some("item_detail")),
            MetricEvent::count("orders.query", 2).with_route(Some("item_detail")),
        ]);
        assert!(rendered.contains("orders_query"));
        assert!(rendered.contains("route=\"item_detail\""));
        assert!(rendered.contains(" 3"));
    }

    #[test]
    fn test_gauge_and_histogram() {
        let rendered = render_with(vec![
            MetricEvent::gauge("orders.pg-pool-available", 7.0),
            MetricEvent::value("latency", 12.5)
                .with_result(MetricResult::Success)
                .with_status(200),
        ]);
        assert!(rendered.contains("orders_pg_pool_available 7"));
        assert!(rendered.contains("latency"));
        assert!(rendered.contains("result=\"success\""));
        assert!(rendered.contains("status=\"200\""));
    }

    #[test]
    fn test_labels_skip_missing_tags() {
        assert!(labels(&MetricEvent::value("latency", 1.0)).is_empty());
        let tagged = MetricEvent::value("latency", 1.0).with_status(503);
        assert_eq!(labels(&tagged), vec![Label::new("status", "503")]);
    }

    #[test]
    fn test_disabled_config_installs_nothing() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_address() {
        let config = MetricsConfig {
            enabled: true,
            addr: "not-an-address".to_string(),
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }
}
