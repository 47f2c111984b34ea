//! Settings types.
//!
//! Every section is optional in a settings file; missing fields fall back to
//! the defaults below and unknown fields are rejected.
//!
//! ```toml
//! name = "orders"
//! router = "orders"
//! port = 8080
//! request_id_headers = ["x-request-id", "request-id"]
//! middleware = [
//!     "metrics",
//!     { name = "database", options = { pool = { max_size = 20 } } },
//! ]
//!
//! [logging]
//! level = "info,strata_server=debug"
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//! ```

use crate::error::ConfigError;
use http::HeaderName;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use strata_telemetry::{LogConfig, LogFormat, MetricsConfig, TelemetryConfig};

/// Environment variable consulted for the default `environment`.
pub const ENVIRONMENT_ENV: &str = "STRATA_ENV";

fn default_environment() -> String {
    env::var(ENVIRONMENT_ENV).unwrap_or_else(|_| "development".to_string())
}

/// Application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Service name; prefixes server-scoped metric names.
    pub name: String,

    /// Whether the service faces clients outside the deployment.
    pub is_external: bool,

    /// Headers consulted, in order, for an incoming request id.
    pub request_id_headers: Vec<String>,

    /// Middleware, outermost first.
    pub middleware: Vec<MiddlewareEntry>,

    /// Name of the router to resolve.
    pub router: Option<String>,

    /// Listen port, for shells that bind one.
    pub port: Option<u16>,

    /// Listen host, for shells that bind one.
    pub host: Option<String>,

    /// Deployment environment.
    pub environment: String,

    /// Debug mode; forces debug-level logging.
    pub debug: bool,

    /// Logging overrides.
    pub logging: LoggingSettings,

    /// Prometheus exporter.
    pub metrics: MetricsSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "strata".to_string(),
            is_external: true,
            request_id_headers: vec!["request-id".to_string()],
            middleware: Vec::new(),
            router: None,
            port: None,
            host: None,
            environment: default_environment(),
            debug: false,
            logging: LoggingSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl Settings {
    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingRouter`] when no router is named
    /// - [`ConfigError::InvalidValue`] for an empty name, a bad header name,
    ///   a bad listen or metrics address, or a bad log filter
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid_value("name", "must not be empty"));
        }
        match self.router.as_deref() {
            None => return Err(ConfigError::MissingRouter),
            Some(router) if router.trim().is_empty() => return Err(ConfigError::MissingRouter),
            Some(_) => {}
        }
        for header in &self.request_id_headers {
            HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
                ConfigError::invalid_value(
                    "request_id_headers",
                    format!("{header:?} is not a valid header name"),
                )
            })?;
        }
        for entry in &self.middleware {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::invalid_value("middleware", "entry without a name"));
            }
        }
        self.socket_addr()?;
        if self.metrics.enabled {
            self.metrics.addr.parse::<SocketAddr>().map_err(|_| {
                ConfigError::invalid_value(
                    "metrics.addr",
                    format!("invalid socket address: {}", self.metrics.addr),
                )
            })?;
        }
        if let Some(level) = &self.logging.level {
            strata_telemetry::logging::create_env_filter(level)
                .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;
        }
        Ok(())
    }

    /// Returns the listen address, if a port is configured.
    ///
    /// The host defaults to `0.0.0.0`; `localhost` means `127.0.0.1`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the host is not an IP address.
    pub fn socket_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        let ip = match self.host.as_deref() {
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Some("localhost") => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Some(host) => host.parse().map_err(|_| {
                ConfigError::invalid_value("host", format!("{host:?} is not an IP address"))
            })?,
        };
        Ok(self.port.map(|port| SocketAddr::new(ip, port)))
    }

    /// Returns `true` for development-like environments.
    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "development" | "dev" | "test" | "local"
        )
    }

    /// Builds the telemetry configuration these settings describe.
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let mut logging = LogConfig::for_environment(&self.environment);
        if let Some(level) = &self.logging.level {
            logging.level.clone_from(level);
        }
        if let Some(format) = self.logging.format {
            logging.format = format;
        }
        if self.debug {
            logging.level = "debug".to_string();
        }

        TelemetryConfig::builder()
            .service_name(&self.name)
            .environment(&self.environment)
            .logging(logging)
            .metrics(MetricsConfig {
                enabled: self.metrics.enabled,
                addr: self.metrics.addr.clone(),
            })
            .build()
    }

    /// Finds the first middleware entry with the given name.
    #[must_use]
    pub fn middleware_entry(&self, name: &str) -> Option<&MiddlewareEntry> {
        self.middleware.iter().find(|entry| entry.name == name)
    }
}

/// Logging overrides; unset fields follow the environment preset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Filter directive.
    pub level: Option<String>,
    /// Output format.
    pub format: Option<LogFormat>,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsSettings {
    /// Whether the exporter and the Prometheus sink are used.
    pub enabled: bool,
    /// Scrape listener address.
    pub addr: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// One configured middleware: a registered name plus free-form options.
///
/// In a settings file an entry is either a bare name or a table with `name`
/// and `options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEntry")]
pub struct MiddlewareEntry {
    /// Registered factory name.
    pub name: String,
    /// Options handed to the factory.
    pub options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Name(String),
    Table {
        name: String,
        #[serde(default)]
        options: serde_json::Map<String, serde_json::Value>,
    },
}

impl From<RawEntry> for MiddlewareEntry {
    fn from(raw: RawEntry) -> Self {
        match raw {
            RawEntry::Name(name) => Self::new(name),
            RawEntry::Table { name, options } => Self { name, options },
        }
    }
}

impl MiddlewareEntry {
    /// An entry with no options.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: serde_json::Map::new(),
        }
    }

    /// Adds an option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Returns `true` if no options were given.
    #[must_use]
    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }

    /// Deserializes the options into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the entry when the options
    /// do not match `T`.
    pub fn options_as<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(serde_json::Value::Object(self.options.clone())).map_err(|e| {
            ConfigError::invalid_value(format!("middleware.{}.options", self.name), e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routed() -> Settings {
        Settings {
            router: Some("orders".into()),
            ..Settings::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.name, "strata");
        assert!(settings.is_external);
        assert_eq!(settings.request_id_headers, vec!["request-id"]);
        assert!(settings.middleware.is_empty());
        assert!(settings.router.is_none());
        assert!(!settings.debug);
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_missing_router() {
        assert!(matches!(
            Settings::default().validate(),
            Err(ConfigError::MissingRouter)
        ));
        assert!(routed().validate().is_ok());
    }

    #[test]
    fn test_socket_addr() {
        let mut settings = routed();
        assert_eq!(settings.socket_addr().unwrap(), None);

        settings.port = Some(8080);
        assert_eq!(
            settings.socket_addr().unwrap(),
            Some("0.0.0.0:8080".parse().unwrap())
        );

        settings.host = Some("localhost".into());
        assert_eq!(
            settings.socket_addr().unwrap(),
            Some("127.0.0.1:8080".parse().unwrap())
        );

        settings.host = Some("not a host".into());
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "host"
        ));
    }

    #[test]
    fn test_invalid_values() {
        let settings = Settings {
            request_id_headers: vec!["bad header".into()],
            ..routed()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            metrics: MetricsSettings {
                enabled: true,
                addr: "nowhere".into(),
            },
            ..routed()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            logging: LoggingSettings {
                level: Some("strata=loud".into()),
                format: None,
            },
            ..routed()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_middleware_entries_accept_names_and_tables() {
        let settings: Settings = toml::from_str(
            r#"
            router = "orders"
            middleware = ["metrics", { name = "database", options = { max_connections_per_request = 2 } }]
            "#,
        )
        .unwrap();
        assert_eq!(settings.middleware[0], MiddlewareEntry::new("metrics"));
        assert_eq!(
            settings.middleware_entry("database").unwrap().options["max_connections_per_request"],
            json!(2)
        );
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(toml::from_str::<Settings>("routr = \"orders\"").is_err());
        assert!(toml::from_str::<Settings>("[logging]\ncolour = true").is_err());
    }

    #[test]
    fn test_options_as() {
        #[derive(Debug, Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Opts {
            limit: u32,
        }

        let entry = MiddlewareEntry::new("limits").with_option("limit", json!(5));
        assert_eq!(entry.options_as::<Opts>().unwrap().limit, 5);

        let entry = MiddlewareEntry::new("limits").with_option("limit", json!("five"));
        let err = entry.options_as::<Opts>().unwrap_err();
        assert!(err.to_string().contains("middleware.limits.options"));
    }

    #[test]
    fn test_telemetry_config() {
        let settings = Settings {
            environment: "production".into(),
            debug: true,
            metrics: MetricsSettings {
                enabled: true,
                addr: "127.0.0.1:9464".into(),
            },
            ..routed()
        };
        let telemetry = settings.telemetry_config();
        assert_eq!(telemetry.logging.format, LogFormat::Json);
        assert_eq!(telemetry.logging.level, "debug");
        assert!(telemetry.metrics.enabled);
        assert!(!settings.is_development());
    }
}
