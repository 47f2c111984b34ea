//! Test error types.

use strata_core::StrataError;
use thiserror::Error;

/// Errors raised by the test harness.
#[derive(Debug, Error)]
pub enum TestError {
    /// A testcase body failed or panicked.
    #[error("testcase '{name}' failed: {source}")]
    Testcase {
        /// Testcase name.
        name: String,
        /// The captured failure.
        #[source]
        source: anyhow::Error,
    },

    /// The app failed to build, serve, or run a phase.
    #[error("server error: {0}")]
    Server(#[from] StrataError),

    /// The suite phase finished without marking the suite ready.
    #[error("suite '{0}' was not marked ready")]
    SuiteNotReady(String),

    /// The suite has no request interceptor installed.
    #[error("no request interceptor installed on suite '{0}'")]
    NoInterceptor(String),

    /// The serving task could not be joined.
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Request building failed.
    #[error("request build error: {0}")]
    RequestBuild(String),

    /// A header name or value is invalid.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Response body reading failed.
    #[error("body read error: {0}")]
    BodyRead(String),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TestError {
    /// Returns the captured testcase failure, if this is one.
    #[must_use]
    pub fn testcase_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Testcase { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_testcase_display_and_source() {
        let err = TestError::Testcase {
            name: "creates order".into(),
            source: anyhow::anyhow!("expected 201"),
        };
        assert_eq!(
            err.to_string(),
            "testcase 'creates order' failed: expected 201"
        );
        assert!(err.source().is_some());
        assert_eq!(err.testcase_error().unwrap().to_string(), "expected 201");
    }

    #[test]
    fn test_from_strata_error() {
        let err: TestError = StrataError::configuration("no router").into();
        assert!(matches!(err, TestError::Server(_)));
        assert!(err.testcase_error().is_none());
    }
}
