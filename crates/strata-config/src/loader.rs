//! Layered settings loader.
//!
//! Layers apply in this order, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML or JSON settings file
//! 3. A `.env` file, which only feeds the environment
//! 4. Environment variables `PREFIX__KEY` / `PREFIX__SECTION__KEY`
//! 5. Programmatic overrides

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::settings::Settings;

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "STRATA";

type Override = Box<dyn FnOnce(&mut Settings) + Send>;

/// Loads [`Settings`] from layered sources.
///
/// # Example
///
/// ```no_run
/// use strata_config::ConfigLoader;
///
/// # fn main() -> Result<(), strata_config::ConfigError> {
/// let settings = ConfigLoader::new()
///     .with_optional_file("strata.toml")?
///     .with_dotenv()?
///     .with_env_prefix("STRATA")
///     .with_override(|s| s.debug = true)
///     .load()?;
/// # Ok(())
/// # }
/// ```
pub struct ConfigLoader {
    settings: Settings,
    env_prefix: Option<String>,
    overrides: Vec<Override>,
    sources: Vec<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("settings", &self.settings)
            .field("env_prefix", &self.env_prefix)
            .field("overrides", &self.overrides.len())
            .field("sources", &self.sources)
            .finish()
    }
}

impl ConfigLoader {
    /// Creates a loader starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            env_prefix: None,
            overrides: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Loads a settings file, picking the format from its extension.
    ///
    /// Fields the file leaves out keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, unreadable, malformed, has an
    /// unsupported extension, or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        self.settings = match format.as_str() {
            "toml" | "json" => parse(&content, &format)?,
            _ => {
                return Err(ConfigError::invalid_value(
                    "file",
                    format!("unsupported configuration file format: {}", path.display()),
                ))
            }
        };
        self.sources.push(path.to_path_buf());
        tracing::debug!(path = %path.display(), "loaded settings file");
        Ok(self)
    }

    /// Loads a settings file if it exists.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads settings from a string in the given format (`"toml"` or `"json"`).
    ///
    /// # Errors
    ///
    /// Fails on a parse error or an unsupported format.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.settings = parse(content, &format.to_lowercase())?;
        Ok(self)
    }

    /// Loads `.env` from the current directory or its parents, if present.
    ///
    /// Variables already set in the process environment are not replaced.
    ///
    /// # Errors
    ///
    /// Fails if a `.env` file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "loaded .env");
                Ok(self)
            }
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads a specific `.env` file.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing or cannot be parsed.
    pub fn with_dotenv_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        dotenvy::from_path(path)?;
        self.sources.push(path.to_path_buf());
        Ok(self)
    }

    /// Enables environment overrides under `prefix`.
    ///
    /// Recognised keys, shown with the default `STRATA` prefix:
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `STRATA__NAME` | `name` |
    /// | `STRATA__IS_EXTERNAL` | `is_external` |
    /// | `STRATA__REQUEST_ID_HEADERS` | `request_id_headers` (comma separated) |
    /// | `STRATA__ROUTER` | `router` |
    /// | `STRATA__PORT` | `port` |
    /// | `STRATA__HOST` | `host` |
    /// | `STRATA__ENVIRONMENT` | `environment` |
    /// | `STRATA__DEBUG` | `debug` |
    /// | `STRATA__LOGGING__LEVEL` | `logging.level` |
    /// | `STRATA__LOGGING__FORMAT` | `logging.format` |
    /// | `STRATA__METRICS__ENABLED` | `metrics.enabled` |
    /// | `STRATA__METRICS__ADDR` | `metrics.addr` |
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Adds a programmatic override, applied after every other layer.
    #[must_use]
    pub fn with_override<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Settings) + Send + 'static,
    {
        self.overrides.push(Box::new(f));
        self
    }

    /// Applies the remaining layers and validates.
    ///
    /// # Errors
    ///
    /// Fails on a bad environment variable or invalid settings.
    pub fn load(self) -> Result<Settings, ConfigError> {
        let settings = self.load_unvalidated()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Applies the remaining layers without validating.
    ///
    /// # Errors
    ///
    /// Fails on a bad environment variable.
    pub fn load_unvalidated(mut self) -> Result<Settings, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: BTreeMap<String, String> = env::vars()
                .filter(|(k, _)| k.starts_with(&format!("{prefix}__")))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }
        for apply in self.overrides.drain(..) {
            apply(&mut self.settings);
        }
        Ok(self.settings)
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let rest = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;
        let parts: Vec<&str> = rest.split("__").collect();
        let settings = &mut self.settings;

        match parts.as_slice() {
            ["NAME"] => settings.name = value.to_string(),
            ["IS_EXTERNAL"] => settings.is_external = bool_var(key, value)?,
            ["REQUEST_ID_HEADERS"] => {
                settings.request_id_headers = value
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            ["ROUTER"] => settings.router = optional(value),
            ["PORT"] => {
                settings.port = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(|_| {
                        ConfigError::env_parse_error(key, "expected a port number")
                    })?)
                };
            }
            ["HOST"] => settings.host = optional(value),
            ["ENVIRONMENT"] => settings.environment = value.to_string(),
            ["DEBUG"] => settings.debug = bool_var(key, value)?,
            ["LOGGING", "LEVEL"] => settings.logging.level = optional(value),
            ["LOGGING", "FORMAT"] => {
                settings.logging.format = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(|_| {
                        ConfigError::env_parse_error(key, "expected 'json' or 'pretty'")
                    })?)
                };
            }
            ["METRICS", "ENABLED"] => settings.metrics.enabled = bool_var(key, value)?,
            ["METRICS", "ADDR"] => settings.metrics.addr = value.to_string(),
            _ => tracing::debug!(var = key, "ignoring unrecognised settings variable"),
        }
        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<Settings, ConfigError> {
    match format {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        _ => Err(ConfigError::invalid_value(
            "format",
            format!("unsupported configuration format: {format}"),
        )),
    }
}

fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_telemetry::LogFormat;

    fn routed() -> ConfigLoader {
        ConfigLoader::new().with_override(|s| s.router = Some("orders".into()))
    }

    #[test]
    fn test_defaults_need_a_router() {
        assert!(matches!(
            ConfigLoader::new().load(),
            Err(ConfigError::MissingRouter)
        ));
        let settings = routed().load().unwrap();
        assert_eq!(settings.name, "strata");
    }

    #[test]
    fn test_with_string_toml_keeps_defaults() {
        let settings = ConfigLoader::new()
            .with_string(
                r#"
                name = "orders"
                router = "orders"
                port = 3000
                "#,
                "toml",
            )
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(settings.name, "orders");
        assert_eq!(settings.port, Some(3000));
        assert_eq!(settings.request_id_headers, vec!["request-id"]);
        assert!(settings.is_external);
    }

    #[test]
    fn test_with_string_json() {
        let settings = ConfigLoader::new()
            .with_string(r#"{"router": "orders", "is_external": false}"#, "JSON")
            .unwrap()
            .load()
            .unwrap();
        assert!(!settings.is_external);
    }

    #[test]
    fn test_unsupported_format() {
        assert!(ConfigLoader::new().with_string("", "yaml").is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConfigLoader::new().with_file("/nonexistent/strata.toml"),
            Err(ConfigError::FileNotFound { .. })
        ));
        let settings = routed()
            .with_optional_file("/nonexistent/strata.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(settings.name, "strata");
    }

    #[test]
    fn test_apply_env_vars() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("T__NAME", "orders", "T").unwrap();
        loader.apply_env_var("T__PORT", "8081", "T").unwrap();
        loader.apply_env_var("T__DEBUG", "yes", "T").unwrap();
        loader
            .apply_env_var("T__REQUEST_ID_HEADERS", "x-request-id, request-id", "T")
            .unwrap();
        loader.apply_env_var("T__LOGGING__FORMAT", "pretty", "T").unwrap();
        loader.apply_env_var("T__METRICS__ENABLED", "on", "T").unwrap();
        loader.apply_env_var("T__SOMETHING_ELSE", "x", "T").unwrap();

        let settings = loader.load_unvalidated().unwrap();
        assert_eq!(settings.name, "orders");
        assert_eq!(settings.port, Some(8081));
        assert!(settings.debug);
        assert_eq!(settings.request_id_headers, vec!["x-request-id", "request-id"]);
        assert_eq!(settings.logging.format, Some(LogFormat::Pretty));
        assert!(settings.metrics.enabled);
    }

    #[test]
    fn test_apply_env_var_errors() {
        let mut loader = ConfigLoader::new();
        assert!(loader.apply_env_var("T__PORT", "eighty", "T").is_err());
        assert!(loader.apply_env_var("T__DEBUG", "maybe", "T").is_err());
        assert!(loader.apply_env_var("T__LOGGING__FORMAT", "xml", "T").is_err());
    }

    #[test]
    fn test_overrides_apply_last() {
        let settings = ConfigLoader::new()
            .with_string("name = \"from-file\"\nrouter = \"orders\"", "toml")
            .unwrap()
            .with_override(|s| s.name = "from-code".into())
            .load()
            .unwrap();
        assert_eq!(settings.name, "from-code");
    }

    #[test]
    fn test_parse_bool() {
        for t in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(t), Some(true));
        }
        for f in ["false", "0", "no", "Off"] {
            assert_eq!(parse_bool(f), Some(false));
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }
}
