//! The lifecycle coordinator.
//!
//! An [`App`] owns the server handle and the six compiled phase onions. It
//! compiles every onion once, in [`AppBuilder::build`], and from then on only
//! dispatches into them.
//!
//! | Entry point | Phase | Terminal |
//! |-------------|-------|----------|
//! | [`App::serve`] | server | mark ready, run the shell |
//! | [`App::handle`] | request | route, then the view onion |
//! | [`App::dispatch_view`] | view | call the matched view |
//! | [`App::read_body`] | body | the body parser |
//! | [`App::run_suite`] | suite | mark the suite ready |
//! | [`App::run_testcase`] | testcase | run the testcase, capture the outcome |

use crate::body::{BodyParser, DefaultBodyParser, OnionBodyReader};
use crate::shell::{Shell, WaitForShutdown};
use http::header::HeaderName;
use http::HeaderValue;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_core::{
    BodyReader, BodyStream, MetricsSink, NoopSink, ParsedBody, Request, RequestContext,
    RequestHead, RequestId, Response, RouteMatch, Router, ServerHandle, Settlement, StrataError,
    StrataResult, SuiteHandle, Testcase, TestcaseOutcome, ViewContext,
};
use strata_middleware::{
    terminal, BodyPhase, Middleware, Onion, PhaseRegistry, RequestPhase, ServerPhase, SuitePhase,
    TestcasePhase, ViewPhase,
};
use tracing::Instrument;

/// Default header consulted for an incoming request id.
pub const DEFAULT_REQUEST_ID_HEADER: &str = "request-id";

/// The lifecycle coordinator.
///
/// Cheap to clone; clones share the same server and onions.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    server: ServerHandle,
    registry: PhaseRegistry,
    request_id_headers: Vec<HeaderName>,
    body_reader: Arc<dyn BodyReader>,
    server_onion: Onion<ServerPhase>,
    request_onion: Onion<RequestPhase>,
    view_onion: Arc<Onion<ViewPhase>>,
    body_onion: Arc<Onion<BodyPhase>>,
    suite_onion: Onion<SuitePhase>,
    testcase_onion: Onion<TestcasePhase>,
    started: AtomicBool,
}

impl App {
    /// Starts building an app.
    #[must_use]
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Returns the server handle.
    #[must_use]
    pub fn server(&self) -> &ServerHandle {
        &self.inner.server
    }

    /// Returns the middleware registry the onions were compiled from.
    #[must_use]
    pub fn registry(&self) -> &PhaseRegistry {
        &self.inner.registry
    }

    /// Runs the server phase: every `process_server` setup, the shell, then
    /// every teardown in reverse.
    ///
    /// Can only be called once.
    pub async fn serve(&self) -> StrataResult<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(StrataError::configuration("server already started"));
        }
        let server = self.inner.server.clone();
        tracing::info!(
            server = server.name(),
            middleware = ?self.inner.registry,
            "server starting"
        );
        let result = self.inner.server_onion.call(server.clone()).await;
        server.mark_stopped();
        match &result {
            Ok(()) => tracing::info!(server = server.name(), "server stopped"),
            Err(err) => tracing::error!(server = server.name(), error = %err, "server failed"),
        }
        result
    }

    /// Triggers graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!(server = self.inner.server.name(), "shutdown triggered");
        self.inner.server.shutdown().trigger();
    }

    /// Runs one request through the request onion.
    ///
    /// Creates a fresh request context, taking the request id from the
    /// configured headers when present, and settles it with the outcome.
    /// Failures that no middleware translated come back as `Err`.
    pub async fn handle(&self, request: Request) -> StrataResult<Response> {
        let ctx = self.context_for(&request);
        self.handle_in(ctx, request).await
    }

    /// Like [`handle`](Self::handle), but renders an unhandled failure as a
    /// JSON error response. Every response carries the request id.
    pub async fn respond(&self, request: Request) -> Response {
        let ctx = self.context_for(&request);
        let request_id = ctx.request_id().clone();
        let mut response = match self.handle_in(ctx, request).await {
            Ok(response) => response,
            Err(err) => err.to_response(Some(request_id.as_str())),
        };
        if let (Some(header), Ok(value)) = (
            self.inner.request_id_headers.first(),
            HeaderValue::from_str(request_id.as_str()),
        ) {
            response.headers_mut().insert(header.clone(), value);
        }
        response
    }

    async fn handle_in(&self, ctx: RequestContext, request: Request) -> StrataResult<Response> {
        let server = &self.inner.server;
        // Count the request before checking the flag so a drain that starts
        // in between still waits for it.
        let _in_flight = server.in_flight().enter();
        if server.shutdown().is_shutdown() {
            return Err(StrataError::resource("server is shutting down"));
        }

        let span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id(),
            method = %request.method(),
            path = %request.uri().path(),
        );
        ctx.begin();
        let result = ctx
            .clone()
            .scope(self.inner.request_onion.call(request))
            .instrument(span)
            .await;

        let outcome = match &result {
            Ok(response) => Settlement::Response {
                status: response.status().as_u16(),
            },
            Err(err) => Settlement::Failure {
                category: err.category(),
            },
        };
        ctx.settle(outcome);
        if let Err(err) = &result {
            if err.status_code().is_server_error() {
                tracing::error!(request_id = %ctx.request_id(), error = %err, "request failed");
            } else {
                tracing::debug!(request_id = %ctx.request_id(), error = %err, "request rejected");
            }
        }
        result
    }

    /// Runs the view onion for an already-routed request.
    ///
    /// Uses the current request context, or a fresh one for a bare
    /// invocation.
    pub async fn dispatch_view(&self, request: Request, route: RouteMatch) -> StrataResult<Response> {
        let view_context = ViewContext::new(route.params.clone(), Some(Arc::clone(&self.inner.body_reader)));
        let onion = Arc::clone(&self.inner.view_onion);
        self.in_context(async move { onion.call((request, route, view_context)).await })
            .await
    }

    /// Runs the body onion over a raw stream.
    ///
    /// Uses the current request context, or a fresh one for a bare
    /// invocation.
    pub async fn read_body(&self, head: RequestHead, stream: BodyStream) -> StrataResult<ParsedBody> {
        let onion = Arc::clone(&self.inner.body_onion);
        self.in_context(async move { onion.call((head, stream)).await })
            .await
    }

    /// Runs the suite phase.
    pub async fn run_suite(&self, suite: SuiteHandle) -> StrataResult<()> {
        tracing::info!(suite = suite.name(), "suite starting");
        self.inner.suite_onion.call(suite).await
    }

    /// Runs one testcase through the testcase phase.
    ///
    /// The terminal captures the testcase's own failure in the outcome; an
    /// `Err` here means a middleware failed.
    pub async fn run_testcase(
        &self,
        suite: SuiteHandle,
        testcase: Testcase,
    ) -> StrataResult<TestcaseOutcome> {
        let name = testcase.name().to_string();
        let outcome = self
            .inner
            .testcase_onion
            .call((suite, testcase))
            .instrument(tracing::info_span!("testcase", name = %name))
            .await?;
        tracing::debug!(
            testcase = %outcome.name,
            success = outcome.is_success(),
            elapsed = ?outcome.elapsed,
            "testcase finished"
        );
        Ok(outcome)
    }

    fn context_for(&self, request: &Request) -> RequestContext {
        let request_id = self
            .inner
            .request_id_headers
            .iter()
            .filter_map(|name| request.headers().get(name))
            .filter_map(|value| value.to_str().ok())
            .find_map(RequestId::from_header)
            .unwrap_or_default();
        RequestContext::new(request_id, Some(self.inner.server.clone()))
    }

    async fn in_context<F: Future>(&self, future: F) -> F::Output {
        if RequestContext::current().is_some() {
            future.await
        } else {
            RequestContext::new(RequestId::new(), Some(self.inner.server.clone()))
                .scope(future)
                .await
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("server", &self.inner.server)
            .field("middleware", &self.inner.registry)
            .field("request_id_headers", &self.inner.request_id_headers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`App`].
///
/// # Example
///
/// ```
/// use http::{Method, StatusCode};
/// use strata_core::{view_fn, Response, ResponseExt, RouteTable};
/// use strata_server::App;
///
/// let routes = RouteTable::new().route(
///     Method::GET,
///     "/health",
///     "health",
///     view_fn(|_req, _ctx| async { Ok(Response::text(StatusCode::OK, "ok")) }),
/// );
/// let app = App::builder().name("api").router(routes).build().unwrap();
/// assert_eq!(app.server().name(), "api");
/// ```
#[must_use]
pub struct AppBuilder {
    name: String,
    middleware: Vec<Arc<dyn Middleware>>,
    router: Option<Arc<dyn Router>>,
    metrics: Arc<dyn MetricsSink>,
    shell: Arc<dyn Shell>,
    body_parser: Arc<dyn BodyParser>,
    request_id_headers: Vec<String>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppBuilder {
    /// Creates a builder with defaults: name `strata`, no middleware, no
    /// router, a no-op metrics sink, the [`WaitForShutdown`] shell, and the
    /// [`DefaultBodyParser`].
    pub fn new() -> Self {
        Self {
            name: "strata".to_string(),
            middleware: Vec::new(),
            router: None,
            metrics: Arc::new(NoopSink),
            shell: Arc::new(WaitForShutdown),
            body_parser: Arc::new(DefaultBodyParser::default()),
            request_id_headers: vec![DEFAULT_REQUEST_ID_HEADER.to_string()],
        }
    }

    /// Sets the server name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends a middleware.
    pub fn middleware(self, middleware: impl Middleware) -> Self {
        self.middleware_arc(Arc::new(middleware))
    }

    /// Appends a shared middleware.
    pub fn middleware_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Inserts a middleware before all others, making it outermost.
    pub fn prepend_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.insert(0, middleware);
        self
    }

    /// Sets the router.
    pub fn router(self, router: impl Router) -> Self {
        self.router_arc(Arc::new(router))
    }

    /// Sets a shared router.
    pub fn router_arc(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Sets the shell the server phase runs.
    pub fn shell(mut self, shell: impl Shell) -> Self {
        self.shell = Arc::new(shell);
        self
    }

    /// Sets the body parser.
    pub fn body_parser(mut self, parser: impl BodyParser) -> Self {
        self.body_parser = Arc::new(parser);
        self
    }

    /// Sets the headers consulted, in order, for an incoming request id.
    pub fn request_id_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request_id_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Compiles every phase onion and builds the app.
    ///
    /// Fails with a configuration error if no router was set or a request id
    /// header name is invalid.
    pub fn build(self) -> StrataResult<App> {
        let router = self
            .router
            .ok_or_else(|| StrataError::configuration("no router configured"))?;
        let request_id_headers = self
            .request_id_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()).map_err(|_| {
                    StrataError::configuration(format!("invalid request id header: {name:?}"))
                })
            })
            .collect::<StrataResult<Vec<_>>>()?;

        let registry = PhaseRegistry::new(self.middleware);
        let server = ServerHandle::new(self.name, self.metrics);

        let body_onion = Arc::new(registry.compile(body_terminal(self.body_parser)));
        let body_reader: Arc<dyn BodyReader> =
            Arc::new(OnionBodyReader::new(Arc::clone(&body_onion)));
        let view_onion = Arc::new(registry.compile(view_terminal()));
        let request_onion = registry.compile(request_terminal(
            router,
            Arc::clone(&view_onion),
            Arc::clone(&body_reader),
        ));
        let server_onion = registry.compile(server_terminal(self.shell));
        let suite_onion = registry.compile(terminal::<SuitePhase, _, _>(|suite: SuiteHandle| async move {
            suite.mark_ready();
            Ok(())
        }));
        let testcase_onion = registry.compile(terminal::<TestcasePhase, _, _>(
            |(_suite, testcase): (SuiteHandle, Testcase)| async move { Ok(testcase.run().await) },
        ));

        tracing::debug!(
            server = server.name(),
            middleware = registry.len(),
            "app built"
        );

        Ok(App {
            inner: Arc::new(AppInner {
                server,
                registry,
                request_id_headers,
                body_reader,
                server_onion,
                request_onion,
                view_onion,
                body_onion,
                suite_onion,
                testcase_onion,
                started: AtomicBool::new(false),
            }),
        })
    }
}

impl fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppBuilder")
            .field("name", &self.name)
            .field("middleware", &self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("has_router", &self.router.is_some())
            .field("request_id_headers", &self.request_id_headers)
            .finish_non_exhaustive()
    }
}

fn server_terminal(shell: Arc<dyn Shell>) -> strata_middleware::Terminal<ServerPhase> {
    terminal::<ServerPhase, _, _>(move |server: ServerHandle| {
        let shell = Arc::clone(&shell);
        async move {
            server.mark_ready();
            tracing::info!(server = server.name(), "server ready");
            shell.run(server).await
        }
    })
}

fn request_terminal(
    router: Arc<dyn Router>,
    views: Arc<Onion<ViewPhase>>,
    body_reader: Arc<dyn BodyReader>,
) -> strata_middleware::Terminal<RequestPhase> {
    terminal::<RequestPhase, _, _>(move |request: Request| {
        let router = Arc::clone(&router);
        let views = Arc::clone(&views);
        let body_reader = Arc::clone(&body_reader);
        async move {
            let ctx = RequestContext::current();
            if let Some(ctx) = &ctx {
                ctx.mark_dispatched();
            }
            let route = router.route(&request)?;
            if let Some(ctx) = &ctx {
                ctx.set_view_name(route.view_name.clone());
            }
            tracing::debug!(view = %route.view_name, "route matched");
            let view_context = ViewContext::new(route.params.clone(), Some(body_reader));
            views.call((request, route, view_context)).await
        }
    })
}

fn view_terminal() -> strata_middleware::Terminal<ViewPhase> {
    terminal::<ViewPhase, _, _>(
        |(request, route, view_context): (Request, RouteMatch, ViewContext)| async move {
            route.view.call(request, view_context).await
        },
    )
}

fn body_terminal(parser: Arc<dyn BodyParser>) -> strata_middleware::Terminal<BodyPhase> {
    terminal::<BodyPhase, _, _>(move |(head, stream): (RequestHead, BodyStream)| {
        parser.parse(head, stream)
    })
}
