//! Router and view contracts.
//!
//! Routing algorithms live outside the engine. The coordinator only needs a
//! [`Router`] that turns a request into a [`RouteMatch`] and a [`View`] that
//! turns the request into a response. [`RouteTable`] is a minimal router for
//! wiring and tests.

use crate::error::{StrataError, StrataResult};
use crate::types::{BodyStream, BoxFuture, ParsedBody, Request, RequestHead, Response};
use http::Method;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A matched view.
pub trait View: Send + Sync + 'static {
    /// Produces a response for the request.
    fn call<'a>(
        &'a self,
        request: Request,
        ctx: ViewContext,
    ) -> BoxFuture<'a, StrataResult<Response>>;
}

/// Adapter turning an async function into a [`View`].
pub struct FnView<F>(F);

impl<F, Fut> View for FnView<F>
where
    F: Fn(Request, ViewContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StrataResult<Response>> + Send + 'static,
{
    fn call<'a>(
        &'a self,
        request: Request,
        ctx: ViewContext,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        Box::pin((self.0)(request, ctx))
    }
}

/// Wraps an async function as a shared view.
///
/// # Example
///
/// ```
/// use http::StatusCode;
/// use strata_core::{view_fn, Response, ResponseExt};
///
/// let view = view_fn(|_req, _ctx| async { Ok(Response::text(StatusCode::OK, "hi")) });
/// # let _ = view;
/// ```
pub fn view_fn<F, Fut>(f: F) -> Arc<dyn View>
where
    F: Fn(Request, ViewContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StrataResult<Response>> + Send + 'static,
{
    Arc::new(FnView(f))
}

/// Result of routing a request.
#[derive(Clone)]
pub struct RouteMatch {
    /// Name of the matched view.
    pub view_name: String,
    /// Captured path parameters.
    pub params: HashMap<String, String>,
    /// The view to invoke.
    pub view: Arc<dyn View>,
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("view_name", &self.view_name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Resolves requests to views.
pub trait Router: Send + Sync + 'static {
    /// Returns the match for `request`, or a not-found error.
    fn route(&self, request: &Request) -> StrataResult<RouteMatch>;
}

/// Reads a request body through the body phase.
pub trait BodyReader: Send + Sync + 'static {
    /// Parses a raw body stream.
    fn read(&self, head: RequestHead, stream: BodyStream) -> BoxFuture<'static, StrataResult<ParsedBody>>;
}

/// Context handed to a view alongside the request.
#[derive(Clone, Default)]
pub struct ViewContext {
    params: HashMap<String, String>,
    body_reader: Option<Arc<dyn BodyReader>>,
}

impl ViewContext {
    /// Creates a view context.
    #[must_use]
    pub fn new(params: HashMap<String, String>, body_reader: Option<Arc<dyn BodyReader>>) -> Self {
        Self {
            params,
            body_reader,
        }
    }

    /// Returns a captured path parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns all captured path parameters.
    #[must_use]
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Reads and parses the request body through the body phase.
    ///
    /// The body stream is taken from the request; a second read sees an
    /// empty body.
    pub async fn body(&self, request: &mut Request) -> StrataResult<ParsedBody> {
        let reader = self
            .body_reader
            .as_ref()
            .ok_or_else(|| StrataError::internal("no body reader configured"))?;
        let head = RequestHead::from_request(request);
        let stream = request.body_mut().take_stream();
        reader.read(head, stream).await
    }
}

impl fmt::Debug for ViewContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewContext")
            .field("params", &self.params)
            .field("has_body_reader", &self.body_reader.is_some())
            .finish()
    }
}

struct Route {
    method: Method,
    segments: Vec<Segment>,
    name: String,
    view: Arc<dyn View>,
}

enum Segment {
    Literal(String),
    Param(String),
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// A first-match route table.
///
/// Patterns are `/`-separated; a segment starting with `:` captures a
/// parameter.
///
/// # Example
///
/// ```
/// use http::{Method, StatusCode};
/// use strata_core::{view_fn, Response, ResponseExt, RouteTable};
///
/// let table = RouteTable::new().route(
///     Method::GET,
///     "/users/:id",
///     "user_detail",
///     view_fn(|_req, _ctx| async { Ok(Response::empty(StatusCode::OK)) }),
/// );
/// assert_eq!(table.len(), 1);
/// ```
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route.
    #[must_use]
    pub fn route(
        mut self,
        method: Method,
        pattern: &str,
        name: impl Into<String>,
        view: Arc<dyn View>,
    ) -> Self {
        let segments = split(pattern)
            .map(|s| match s.strip_prefix(':') {
                Some(param) => Segment::Param(param.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        self.routes.push(Route {
            method,
            segments,
            name: name.into(),
            view,
        });
        self
    }

    /// Returns the number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> Option<HashMap<String, String>> {
        if self.method != method {
            return None;
        }
        let parts: Vec<&str> = split(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

impl Router for RouteTable {
    fn route(&self, request: &Request) -> StrataResult<RouteMatch> {
        let path = request.uri().path();
        self.routes
            .iter()
            .find_map(|route| {
                route.matches(request.method(), path).map(|params| RouteMatch {
                    view_name: route.name.clone(),
                    params,
                    view: Arc::clone(&route.view),
                })
            })
            .ok_or_else(|| StrataError::not_found(path))
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|r| (&r.method, &r.name)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::types::{Body, ResponseExt};
    use http::StatusCode;

    fn request(method: Method, path: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    fn table() -> RouteTable {
        RouteTable::new()
            .route(
                Method::GET,
                "/",
                "home",
                view_fn(|_r, _c| async { Ok(Response::text(StatusCode::OK, "home")) }),
            )
            .route(
                Method::GET,
                "/users/:id",
                "user_detail",
                view_fn(|_r, ctx: ViewContext| async move {
                    let id = ctx.param("id").unwrap_or_default().to_string();
                    Ok(Response::text(StatusCode::OK, id))
                }),
            )
    }

    #[test]
    fn test_route_literal_and_params() {
        let table = table();
        let home = Router::route(&table, &request(Method::GET, "/")).unwrap();
        assert_eq!(home.view_name, "home");

        let user = Router::route(&table, &request(Method::GET, "/users/7")).unwrap();
        assert_eq!(user.view_name, "user_detail");
        assert_eq!(user.params.get("id").map(String::as_str), Some("7"));
    }

    #[test]
    fn test_route_not_found() {
        let table = table();
        let err = Router::route(&table, &request(Method::POST, "/")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        let err = Router::route(&table, &request(Method::GET, "/users/7/posts")).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn test_view_call() {
        let table = table();
        let matched = Router::route(&table, &request(Method::GET, "/users/9")).unwrap();
        let ctx = ViewContext::new(matched.params.clone(), None);
        let response = matched
            .view
            .call(request(Method::GET, "/users/9"), ctx)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_body_without_reader_fails() {
        let ctx = ViewContext::default();
        let mut req = request(Method::POST, "/");
        let err = ctx.body(&mut req).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Internal);
    }
}
