//! In-memory requests against a test app.

use crate::error::TestError;
use crate::response::TestResponse;
use bytes::Bytes;
use http::{header, HeaderName, HeaderValue, Method};
use serde::Serialize;
use strata_core::Body;
use strata_server::App;

/// Issues requests through an app's request onion without a transport.
///
/// Failures the app does not translate come back rendered as JSON error
/// envelopes, the same way a shell would send them.
#[derive(Debug, Clone)]
pub struct TestClient {
    app: App,
    default_headers: Vec<(String, String)>,
}

impl TestClient {
    /// Creates a client for `app`.
    #[must_use]
    pub fn new(app: App) -> Self {
        Self {
            app,
            default_headers: Vec::new(),
        }
    }

    /// Adds a header sent with every request.
    #[must_use]
    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Starts a GET request.
    pub fn get(&self, uri: impl Into<String>) -> TestClientRequest<'_> {
        self.request(Method::GET, uri)
    }

    /// Starts a POST request.
    pub fn post(&self, uri: impl Into<String>) -> TestClientRequest<'_> {
        self.request(Method::POST, uri)
    }

    /// Starts a PUT request.
    pub fn put(&self, uri: impl Into<String>) -> TestClientRequest<'_> {
        self.request(Method::PUT, uri)
    }

    /// Starts a DELETE request.
    pub fn delete(&self, uri: impl Into<String>) -> TestClientRequest<'_> {
        self.request(Method::DELETE, uri)
    }

    /// Starts a request with an arbitrary method.
    pub fn request(&self, method: Method, uri: impl Into<String>) -> TestClientRequest<'_> {
        TestClientRequest {
            client: self,
            method,
            uri: uri.into(),
            headers: self.default_headers.clone(),
            body: Bytes::new(),
            error: None,
        }
    }
}

/// A request builder bound to a [`TestClient`].
#[derive(Debug)]
#[must_use = "requests do nothing until sent"]
pub struct TestClientRequest<'a> {
    client: &'a TestClient,
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    error: Option<TestError>,
}

impl TestClientRequest<'_> {
    /// Sets a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the JSON body and sets the content type.
    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.body = Bytes::from(body);
                self.headers.push((
                    header::CONTENT_TYPE.as_str().to_string(),
                    "application/json".to_string(),
                ));
            }
            Err(err) => self.error = Some(TestError::Json(err)),
        }
        self
    }

    /// Sends the request through the app.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be built or the response body
    /// cannot be read. App failures arrive as error responses, not `Err`.
    pub async fn send(self) -> Result<TestResponse, TestError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut builder = http::Request::builder()
            .method(self.method)
            .uri(self.uri.as_str());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TestError::InvalidHeader(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TestError::InvalidHeader(format!("{name}: {e}")))?;
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Body::from(self.body))
            .map_err(|e| TestError::RequestBuild(e.to_string()))?;

        tracing::debug!(
            method = %request.method(),
            uri = %request.uri(),
            "test request"
        );
        let response = self.client.app.respond(request).await;
        TestResponse::from_response(response).await
    }
}
