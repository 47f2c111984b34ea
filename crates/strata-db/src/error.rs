//! Error types for pooling.

use std::time::Duration;
use strata_core::StrataError;
use thiserror::Error;

/// Errors raised by the pool and request sessions.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has been closed.
    #[error("connection pool is closed")]
    Closed,

    /// No connection became available in time.
    #[error("timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    /// The connection manager failed to open a connection.
    #[error("failed to open connection: {message}")]
    Connect {
        /// Human-readable error message.
        message: String,
        /// The underlying driver error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The session was already released.
    #[error("database session already released")]
    SessionReleased,

    /// No database session is active for the current request.
    #[error("no database session for the current request")]
    NoSession,

    /// The pool configuration is unusable.
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// Creates a connect error wrapping a driver error.
    pub fn connect(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connect {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<PoolError> for StrataError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(_) => Self::timeout(err.to_string()),
            PoolError::Config(message) => Self::configuration(message),
            PoolError::NoSession => Self::internal(err.to_string()),
            other => Self::resource_with_source(other.to_string(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::ErrorCategory;

    #[test]
    fn test_into_strata_error() {
        let err: StrataError = PoolError::Closed.into();
        assert_eq!(err.category(), ErrorCategory::Resource);
        assert_eq!(err.status_code().as_u16(), 503);

        let err: StrataError = PoolError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let err: StrataError = PoolError::Config("max_size must be positive".into()).into();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_connect_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = PoolError::connect("db:5432", io);
        assert_eq!(err.to_string(), "failed to open connection: db:5432");
        assert!(std::error::Error::source(&err).is_some());
    }
}
