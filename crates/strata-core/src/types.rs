//! HTTP and body types shared by every phase.

use crate::error::StrataError;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use http_body_util::Full;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The raw request body as a stream of chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, StrataError>> + Send>>;

/// The HTTP request type used by the request and view phases.
pub type Request = http::Request<Body>;

/// The HTTP response type produced by views and middleware.
pub type Response = http::Response<Full<Bytes>>;

/// A request body that has not been parsed yet.
///
/// The stream is taken exactly once, by the body phase. Reading a body twice
/// yields an empty stream the second time.
#[derive(Default)]
pub struct Body {
    stream: Mutex<Option<BodyStream>>,
}

impl Body {
    /// Creates an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a body from a chunk stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, StrataError>> + Send + 'static,
    {
        Self {
            stream: Mutex::new(Some(Box::pin(stream))),
        }
    }

    /// Takes the underlying stream, leaving the body consumed.
    pub fn take_stream(&mut self) -> BodyStream {
        self.stream
            .get_mut()
            .take()
            .unwrap_or_else(|| Box::pin(stream::empty()))
    }

    /// Returns `true` once the stream has been taken.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.stream.lock().is_none()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        Self::from_stream(stream::once(futures_util::future::ready(Ok(bytes))))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::from(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::from(Bytes::from(s))
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Self::from(Bytes::from(v))
    }
}

/// The parts of a request the body phase sees alongside the raw stream.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// HTTP version.
    pub version: Version,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Copies the head of a request.
    #[must_use]
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }

    /// Returns the content type, if present and valid UTF-8.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Result of the body phase.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    /// The body was empty.
    Empty,
    /// A JSON document.
    Json(serde_json::Value),
    /// UTF-8 text that was not declared as JSON.
    Text(String),
    /// Anything else.
    Bytes(Bytes),
}

impl ParsedBody {
    /// Returns the JSON value, if this body was JSON.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Extension trait for building responses.
pub trait ResponseExt {
    /// Creates a plain-text response.
    fn text(status: StatusCode, body: impl Into<String>) -> Response;

    /// Creates a JSON response.
    fn json(status: StatusCode, body: &serde_json::Value) -> Response;

    /// Creates an empty response.
    fn empty(status: StatusCode) -> Response;
}

impl ResponseExt for Response {
    fn text(status: StatusCode, body: impl Into<String>) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.into())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    fn json(status: StatusCode, body: &serde_json::Value) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        response
    }

    fn empty(status: StatusCode) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
    }
}
