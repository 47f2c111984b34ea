//! Combined telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;

/// Configuration for logging and metrics together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name, recorded on the startup log line.
    pub service_name: String,

    /// Deployment environment (`development`, `production`, ...).
    pub environment: String,

    /// Logging configuration.
    pub logging: LogConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "strata".to_string(),
            environment: "development".to_string(),
            logging: LogConfig::development(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Builder for [`TelemetryConfig`].
///
/// When no logging configuration is given, the preset for the environment
/// is used.
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    environment: Option<String>,
    logging: Option<LogConfig>,
    metrics: Option<MetricsConfig>,
}

impl TelemetryConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn environment(mut self, env: &str) -> Self {
        self.environment = Some(env.to_string());
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Sets the metrics configuration.
    #[must_use]
    pub fn metrics(mut self, config: MetricsConfig) -> Self {
        self.metrics = Some(config);
        self
    }

    /// Enables the metrics exporter on `addr`.
    #[must_use]
    pub fn metrics_addr(mut self, addr: &str) -> Self {
        self.metrics = Some(MetricsConfig {
            enabled: true,
            addr: addr.to_string(),
        });
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();
        let environment = self.environment.unwrap_or(defaults.environment);
        let logging = self
            .logging
            .unwrap_or_else(|| LogConfig::for_environment(&environment));

        TelemetryConfig {
            service_name: self.service_name.unwrap_or(defaults.service_name),
            environment,
            logging,
            metrics: self.metrics.unwrap_or(defaults.metrics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "strata");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_logging_follows_environment() {
        let config = TelemetryConfig::builder().environment("production").build();
        assert_eq!(config.logging.format, LogFormat::Json);

        let config = TelemetryConfig::builder()
            .environment("production")
            .logging(LogConfig::development())
            .build();
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_metrics_addr_enables_exporter() {
        let config = TelemetryConfig::builder()
            .service_name("orders")
            .metrics_addr("127.0.0.1:9464")
            .build();
        assert_eq!(config.service_name, "orders");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.addr, "127.0.0.1:9464");
    }
}
