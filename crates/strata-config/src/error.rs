//! Configuration error types.

use std::path::PathBuf;
use strata_core::StrataError;
use thiserror::Error;

/// Errors raised while loading settings or assembling components.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read a settings or `.env` file.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error.
    #[error("failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// `.env` file error.
    #[error("failed to load .env file: {0}")]
    DotenvError(#[from] dotenvy::Error),

    /// No router was configured.
    #[error("settings must name a router")]
    MissingRouter,

    /// A middleware or router name has no registered factory.
    #[error("unknown {kind} {name:?}")]
    UnknownComponent {
        /// `"middleware"` or `"router"`.
        kind: &'static str,
        /// The name that failed to resolve.
        name: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field with the invalid value.
        field: String,
        /// Why it is invalid.
        reason: String,
    },

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParseError {
        /// The environment variable name.
        var: String,
        /// Why it did not parse.
        reason: String,
    },

    /// The assembled application failed to build.
    #[error("failed to build application: {0}")]
    Build(#[source] StrataError),
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a read error.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Creates an unknown middleware error.
    pub fn unknown_middleware(name: impl Into<String>) -> Self {
        Self::UnknownComponent {
            kind: "middleware",
            name: name.into(),
        }
    }

    /// Creates an unknown router error.
    pub fn unknown_router(name: impl Into<String>) -> Self {
        Self::UnknownComponent {
            kind: "router",
            name: name.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an environment variable parse error.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for StrataError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Build(inner) => inner,
            other => Self::configuration(other.to_string()),
        }
    }
}
