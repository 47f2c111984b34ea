//! Body parsing.
//!
//! The body phase's terminal is a [`BodyParser`]. Views reach it through the
//! [`BodyReader`] stored in their [`ViewContext`](strata_core::ViewContext),
//! which runs the full body onion so middleware see every parse.

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::StatusCode;
use std::sync::Arc;
use strata_core::{
    BodyReader, BodyStream, BoxFuture, ParsedBody, RequestHead, StrataError, StrataResult,
};
use strata_middleware::{BodyPhase, Onion};

/// Turns a raw body stream into a [`ParsedBody`].
pub trait BodyParser: Send + Sync + 'static {
    /// Parses the body.
    fn parse(&self, head: RequestHead, stream: BodyStream)
        -> BoxFuture<'static, StrataResult<ParsedBody>>;
}

/// Parser that buffers the body and decodes it by content type.
///
/// | Content type | Result |
/// |--------------|--------|
/// | (empty body) | [`ParsedBody::Empty`] |
/// | `application/json`, `*+json` | [`ParsedBody::Json`] |
/// | `text/*` | [`ParsedBody::Text`] |
/// | anything else | [`ParsedBody::Bytes`] |
///
/// Bodies over `max_size` bytes fail with `413 Payload Too Large`.
#[derive(Debug, Clone, Copy)]
pub struct DefaultBodyParser {
    max_size: usize,
}

impl DefaultBodyParser {
    /// Default size limit: 1 MiB.
    pub const DEFAULT_MAX_SIZE: usize = 1024 * 1024;

    /// Creates a parser with the given size limit.
    #[must_use]
    pub const fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Returns the size limit.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for DefaultBodyParser {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_SIZE)
    }
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

fn is_text(content_type: &str) -> bool {
    content_type.trim_start().to_ascii_lowercase().starts_with("text/")
}

async fn collect(mut stream: BodyStream, max_size: usize) -> StrataResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > max_size {
            return Err(StrataError::body_with_status(
                format!("body exceeds {max_size} bytes"),
                StatusCode::PAYLOAD_TOO_LARGE,
            ));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

impl BodyParser for DefaultBodyParser {
    fn parse(
        &self,
        head: RequestHead,
        stream: BodyStream,
    ) -> BoxFuture<'static, StrataResult<ParsedBody>> {
        let max_size = self.max_size;
        Box::pin(async move {
            let bytes = collect(stream, max_size).await?;
            if bytes.is_empty() {
                return Ok(ParsedBody::Empty);
            }
            match head.content_type() {
                Some(ct) if is_json(ct) => serde_json::from_slice(&bytes)
                    .map(ParsedBody::Json)
                    .map_err(|e| StrataError::body(format!("invalid JSON body: {e}"))),
                Some(ct) if is_text(ct) => String::from_utf8(bytes.to_vec())
                    .map(ParsedBody::Text)
                    .map_err(|_| StrataError::body("text body is not valid UTF-8")),
                _ => Ok(ParsedBody::Bytes(bytes)),
            }
        })
    }
}

/// A [`BodyReader`] that runs the compiled body onion.
pub(crate) struct OnionBodyReader {
    onion: Arc<Onion<BodyPhase>>,
}

impl OnionBodyReader {
    pub(crate) fn new(onion: Arc<Onion<BodyPhase>>) -> Self {
        Self { onion }
    }
}

impl BodyReader for OnionBodyReader {
    fn read(
        &self,
        head: RequestHead,
        stream: BodyStream,
    ) -> BoxFuture<'static, StrataResult<ParsedBody>> {
        let onion = Arc::clone(&self.onion);
        Box::pin(async move { onion.call((head, stream)).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use strata_core::{Body, ErrorCategory, Request};

    fn parts(content_type: Option<&str>, chunks: Vec<&'static str>) -> (RequestHead, BodyStream) {
        let mut builder = http::Request::builder().method("POST").uri("/items");
        if let Some(ct) = content_type {
            builder = builder.header(http::header::CONTENT_TYPE, ct);
        }
        let body = Body::from_stream(stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, StrataError>(Bytes::from_static(c.as_bytes()))),
        ));
        let mut request: Request = builder.body(body).unwrap();
        (RequestHead::from_request(&request), request.body_mut().take_stream())
    }

    #[tokio::test]
    async fn test_json_body() {
        let (head, stream) = parts(Some("application/json; charset=utf-8"), vec!["{\"a\":", "1}"]);
        let parsed = DefaultBodyParser::default().parse(head, stream).await.unwrap();
        assert_eq!(parsed, ParsedBody::Json(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_vendor_json_and_text() {
        let (head, stream) = parts(Some("application/problem+json"), vec!["[]"]);
        let parsed = DefaultBodyParser::default().parse(head, stream).await.unwrap();
        assert!(parsed.as_json().is_some());

        let (head, stream) = parts(Some("text/plain"), vec!["hello"]);
        let parsed = DefaultBodyParser::default().parse(head, stream).await.unwrap();
        assert_eq!(parsed, ParsedBody::Text("hello".into()));
    }

    #[tokio::test]
    async fn test_empty_and_binary() {
        let (head, stream) = parts(Some("application/json"), vec![]);
        let parsed = DefaultBodyParser::default().parse(head, stream).await.unwrap();
        assert_eq!(parsed, ParsedBody::Empty);

        let (head, stream) = parts(None, vec!["\u{1}\u{2}"]);
        let parsed = DefaultBodyParser::default().parse(head, stream).await.unwrap();
        assert!(matches!(parsed, ParsedBody::Bytes(_)));
    }

    #[tokio::test]
    async fn test_invalid_json_is_bad_request() {
        let (head, stream) = parts(Some("application/json"), vec!["{nope"]);
        let err = DefaultBodyParser::default().parse(head, stream).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Body);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_size_limit() {
        let (head, stream) = parts(Some("text/plain"), vec!["12345", "67890"]);
        let err = DefaultBodyParser::new(8).parse(head, stream).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
