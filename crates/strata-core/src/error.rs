//! Error types for Strata.
//!
//! [`StrataError`] is the failure type that travels through every phase
//! onion. Middleware may translate it into a response, rewrap it, or let it
//! propagate; the engine itself never recovers from it.

use crate::types::{Response, ResponseExt};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`StrataError`].
pub type StrataResult<T> = Result<T, StrataError>;

/// Categories of errors for classification and handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Startup configuration is unusable.
    Configuration,
    /// No route matched the request.
    NotFound,
    /// A view failed while producing a response.
    View,
    /// A pooled resource could not be acquired or used.
    Resource,
    /// The request body could not be read or parsed.
    Body,
    /// A middleware rejected the request with an explicit status.
    Rejected,
    /// An operation timed out.
    Timeout,
    /// Anything else.
    Internal,
}

impl ErrorCategory {
    /// Returns the default HTTP status code for this error category.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Body => StatusCode::BAD_REQUEST,
            Self::Rejected => StatusCode::FORBIDDEN,
            Self::Resource => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Configuration | Self::View | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Standard error type for Strata.
///
/// # Example
///
/// ```
/// use strata_core::{ErrorCategory, StrataError};
///
/// let err = StrataError::not_found("/missing");
/// assert_eq!(err.category(), ErrorCategory::NotFound);
/// assert_eq!(err.status_code().as_u16(), 404);
/// ```
#[derive(Error, Debug)]
pub enum StrataError {
    /// Startup configuration error. Fatal: the server never starts.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable error message.
        message: String,
    },

    /// No route matched.
    #[error("Not found: {path}")]
    NotFound {
        /// The request path that failed to match.
        path: String,
    },

    /// A view failed.
    #[error("View error in {view}: {message}")]
    View {
        /// Name of the failing view.
        view: String,
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Pool or connection failure.
    #[error("Resource error: {message}")]
    Resource {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Body read or parse failure.
    #[error("Body error: {message}")]
    Body {
        /// Human-readable error message.
        message: String,
        /// Status to report, defaults to 400.
        status: Option<StatusCode>,
    },

    /// A middleware rejected the request.
    #[error("Rejected ({status}): {message}")]
    Rejected {
        /// Status to report.
        status: StatusCode,
        /// Human-readable error message.
        message: String,
    },

    /// Timeout.
    #[error("Timeout: {message}")]
    Timeout {
        /// Human-readable error message.
        message: String,
    },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl StrataError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a not found error for a path.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates a view error.
    #[must_use]
    pub fn view(view: impl Into<String>, message: impl Into<String>) -> Self {
        Self::View {
            view: view.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a view error wrapping a source error.
    pub fn view_with_source(
        view: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::View {
            view: view.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a resource error.
    #[must_use]
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a resource error wrapping a source error.
    pub fn resource_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Resource {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a body error reported as 400.
    #[must_use]
    pub fn body(message: impl Into<String>) -> Self {
        Self::Body {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a body error reported with a specific status.
    #[must_use]
    pub fn body_with_status(message: impl Into<String>, status: StatusCode) -> Self {
        Self::Body {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Creates a rejection with an explicit status.
    #[must_use]
    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::View { .. } => ErrorCategory::View,
            Self::Resource { .. } => ErrorCategory::Resource,
            Self::Body { .. } => ErrorCategory::Body,
            Self::Rejected { .. } => ErrorCategory::Rejected,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Rejected { status, .. }
            | Self::Body {
                status: Some(status),
                ..
            } => *status,
            _ => self.category().default_status_code(),
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::View { .. } => "VIEW_ERROR",
            Self::Resource { .. } => "RESOURCE_UNAVAILABLE",
            Self::Body { .. } => "BAD_BODY",
            Self::Rejected { .. } => "REJECTED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Converts this error to a serializable error envelope.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        // Internal details stay out of client-visible messages.
        let message = match self {
            Self::Internal { .. } | Self::Configuration { .. } => {
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };
        ErrorEnvelope {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message,
                category: self.category(),
            },
            request_id: request_id.map(ToString::to_string),
        }
    }

    /// Renders this error as a JSON error response.
    #[must_use]
    pub fn to_response(&self, request_id: Option<&str>) -> Response {
        let envelope = self.to_envelope(request_id);
        let body = serde_json::to_value(&envelope).unwrap_or_default();
        Response::json(self.status_code(), &body)
    }
}

/// Serializable error envelope for HTTP responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorDetail,
    /// The request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error detail within an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Error category.
    pub category: ErrorCategory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(StrataError::not_found("/x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            StrataError::view("home", "boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            StrataError::resource("pool closed").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(StrataError::body("bad json").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            StrataError::body_with_status("too big", StatusCode::PAYLOAD_TOO_LARGE).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            StrataError::rejected(StatusCode::UNAUTHORIZED, "no token").status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_internal_message_is_hidden() {
        let err = StrataError::internal("database password is hunter2");
        let envelope = err.to_envelope(Some("req-1"));
        assert_eq!(envelope.error.code, "INTERNAL_ERROR");
        assert!(!envelope.error.message.contains("hunter2"));
        assert_eq!(envelope.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_envelope_serialization() {
        let err = StrataError::not_found("/users/9");
        let json = serde_json::to_value(err.to_envelope(None)).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["category"], "not_found");
        assert!(json.get("request_id").is_none());
    }

    #[test]
    fn test_to_response() {
        let response = StrataError::timeout("slow").to_response(None);
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let err = StrataError::resource_with_source("connect failed", io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "socket closed");
    }
}
