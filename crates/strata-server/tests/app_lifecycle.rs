//! Coordinator tests: every phase driven through a built `App`.

use anyhow::anyhow;
use http::{Method, StatusCode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    view_fn, Body, BodyStream, BoxFuture, ErrorCategory, ParsedBody, Request, RequestContext,
    RequestHead, RequestState, Response, ResponseExt, RouteMatch, RouteTable, ServerHandle,
    Settlement, StrataError, StrataResult, SuiteHandle, Testcase, TestcaseOutcome, ViewContext,
};
use strata_middleware::{
    BodyHook, BodyPhase, Middleware, Next, RequestHook, RequestPhase, ServerHook, ServerPhase,
    SuiteHook, SuitePhase, TestcaseHook, TestcasePhase, ViewHook, ViewPhase,
};
use strata_server::{App, FnShell};

type Log = Arc<Mutex<Vec<String>>>;

/// Logs around every phase it takes part in.
struct Tracer {
    name: &'static str,
    log: Log,
}

impl Tracer {
    fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: Arc::clone(log),
        }
    }

    fn push(&self, what: &str) {
        self.log.lock().push(format!("{}-{}", self.name, what));
    }
}

impl Middleware for Tracer {
    fn name(&self) -> &'static str {
        self.name
    }
    fn server_hook(self: Arc<Self>) -> Option<Arc<dyn ServerHook>> {
        Some(self)
    }
    fn request_hook(self: Arc<Self>) -> Option<Arc<dyn RequestHook>> {
        Some(self)
    }
    fn view_hook(self: Arc<Self>) -> Option<Arc<dyn ViewHook>> {
        Some(self)
    }
    fn body_hook(self: Arc<Self>) -> Option<Arc<dyn BodyHook>> {
        Some(self)
    }
    fn suite_hook(self: Arc<Self>) -> Option<Arc<dyn SuiteHook>> {
        Some(self)
    }
    fn testcase_hook(self: Arc<Self>) -> Option<Arc<dyn TestcaseHook>> {
        Some(self)
    }
}

impl ServerHook for Tracer {
    fn process_server<'a>(
        &'a self,
        server: ServerHandle,
        next: Next<'a, ServerPhase>,
    ) -> BoxFuture<'a, StrataResult<()>> {
        Box::pin(async move {
            self.push("setup");
            let result = next.run(server).await;
            self.push("teardown");
            result
        })
    }
}

impl RequestHook for Tracer {
    fn process_request<'a>(
        &'a self,
        request: Request,
        next: Next<'a, RequestPhase>,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        Box::pin(async move {
            self.push("before");
            let result = next.run(request).await;
            self.push("after");
            result
        })
    }
}

impl ViewHook for Tracer {
    fn process_view<'a>(
        &'a self,
        request: Request,
        route: RouteMatch,
        view_context: ViewContext,
        next: Next<'a, ViewPhase>,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        Box::pin(async move {
            self.push(&format!("view:{}", route.view_name));
            next.run((request, route, view_context)).await
        })
    }
}

impl BodyHook for Tracer {
    fn process_body<'a>(
        &'a self,
        head: RequestHead,
        stream: BodyStream,
        next: Next<'a, BodyPhase>,
    ) -> BoxFuture<'a, StrataResult<ParsedBody>> {
        Box::pin(async move {
            self.push("body");
            next.run((head, stream)).await
        })
    }
}

impl SuiteHook for Tracer {
    fn process_suite<'a>(
        &'a self,
        suite: SuiteHandle,
        next: Next<'a, SuitePhase>,
    ) -> BoxFuture<'a, StrataResult<()>> {
        Box::pin(async move {
            self.push("suite");
            next.run(suite).await
        })
    }
}

impl TestcaseHook for Tracer {
    fn process_testcase<'a>(
        &'a self,
        suite: SuiteHandle,
        testcase: Testcase,
        next: Next<'a, TestcasePhase>,
    ) -> BoxFuture<'a, StrataResult<TestcaseOutcome>> {
        Box::pin(async move {
            self.push(&format!("testcase:{}", testcase.name()));
            next.run((suite, testcase)).await
        })
    }
}

/// Records the request context it saw so tests can inspect its final state.
#[derive(Default)]
struct ContextSpy {
    seen: Mutex<Option<RequestContext>>,
}

impl Middleware for ContextSpy {
    fn name(&self) -> &'static str {
        "spy"
    }
    fn request_hook(self: Arc<Self>) -> Option<Arc<dyn RequestHook>> {
        Some(self)
    }
}

impl RequestHook for ContextSpy {
    fn process_request<'a>(
        &'a self,
        request: Request,
        next: Next<'a, RequestPhase>,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        *self.seen.lock() = RequestContext::current();
        Box::pin(next.run(request))
    }
}

fn routes(log: &Log) -> RouteTable {
    let log = Arc::clone(log);
    RouteTable::new()
        .route(
            Method::GET,
            "/items/:id",
            "item_detail",
            view_fn(move |_req, ctx| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push("T".to_string());
                    let id = ctx.param("id").unwrap_or_default().to_string();
                    Ok(Response::text(StatusCode::OK, id))
                }
            }),
        )
        .route(
            Method::POST,
            "/items",
            "item_create",
            view_fn(|mut req, ctx| async move {
                let body = ctx.body(&mut req).await?;
                Ok::<_, StrataError>(Response::json(
                    StatusCode::CREATED,
                    body.as_json().unwrap_or(&serde_json::Value::Null),
                ))
            }),
        )
        .route(
            Method::GET,
            "/whoami",
            "whoami",
            view_fn(|_req, _ctx| async {
                let id = RequestContext::current()
                    .map(|ctx| ctx.request_id().to_string())
                    .unwrap_or_default();
                Ok(Response::text(StatusCode::OK, id))
            }),
        )
        .route(
            Method::GET,
            "/slow",
            "slow",
            view_fn(|_req, _ctx| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Response::text(StatusCode::OK, "done"))
            }),
        )
}

fn get(uri: &str) -> Request {
    http::Request::get(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: Response) -> String {
    use http_body_util::BodyExt;
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[test]
fn test_missing_router_is_a_configuration_error() {
    let err = App::builder().build().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_invalid_request_id_header_is_rejected() {
    let err = App::builder()
        .router(RouteTable::new())
        .request_id_headers(["bad header"])
        .build()
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[tokio::test]
async fn test_request_runs_onion_then_view() {
    let log = Log::default();
    let app = App::builder()
        .middleware(Tracer::new("A", &log))
        .middleware(Tracer::new("B", &log))
        .middleware(Tracer::new("C", &log))
        .router(routes(&log))
        .build()
        .unwrap();

    let response = app.handle(get("/items/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "42");
    assert_eq!(
        *log.lock(),
        vec![
            "A-before",
            "B-before",
            "C-before",
            "A-view:item_detail",
            "B-view:item_detail",
            "C-view:item_detail",
            "T",
            "C-after",
            "B-after",
            "A-after"
        ]
    );
}

#[tokio::test]
async fn test_not_found_settles_as_failure() {
    let log = Log::default();
    let spy = Arc::new(ContextSpy::default());
    let app = App::builder()
        .middleware_arc(Arc::clone(&spy) as Arc<dyn Middleware>)
        .router(routes(&log))
        .build()
        .unwrap();

    let err = app.handle(get("/nope")).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

    // Routing is part of dispatch, so an unmatched path still reached it.
    let ctx = spy.seen.lock().clone().unwrap();
    assert_eq!(ctx.view_name(), None);
    assert_eq!(
        ctx.state(),
        RequestState::Settled {
            dispatched: true,
            outcome: Settlement::Failure {
                category: ErrorCategory::NotFound
            },
        }
    );
}

#[tokio::test]
async fn test_short_circuit_settles_undispatched() {
    struct Gate {
        seen: Mutex<Option<RequestContext>>,
    }

    impl Middleware for Gate {
        fn name(&self) -> &'static str {
            "gate"
        }
        fn request_hook(self: Arc<Self>) -> Option<Arc<dyn RequestHook>> {
            Some(self)
        }
    }

    impl RequestHook for Gate {
        fn process_request<'a>(
            &'a self,
            _request: Request,
            _next: Next<'a, RequestPhase>,
        ) -> BoxFuture<'a, StrataResult<Response>> {
            *self.seen.lock() = RequestContext::current();
            Box::pin(async { Ok(Response::text(StatusCode::TOO_MANY_REQUESTS, "slow down")) })
        }
    }

    let log = Log::default();
    let gate = Arc::new(Gate {
        seen: Mutex::new(None),
    });
    let app = App::builder()
        .middleware_arc(Arc::clone(&gate) as Arc<dyn Middleware>)
        .router(routes(&log))
        .build()
        .unwrap();

    let response = app.handle(get("/items/7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(log.lock().is_empty());

    let ctx = gate.seen.lock().clone().unwrap();
    assert_eq!(
        ctx.state(),
        RequestState::Settled {
            dispatched: false,
            outcome: Settlement::Response { status: 429 },
        }
    );
}

#[tokio::test]
async fn test_dispatched_request_settles_with_response() {
    let log = Log::default();
    let spy = Arc::new(ContextSpy::default());
    let app = App::builder()
        .middleware_arc(Arc::clone(&spy) as Arc<dyn Middleware>)
        .router(routes(&log))
        .build()
        .unwrap();

    app.handle(get("/items/7")).await.unwrap();
    let ctx = spy.seen.lock().clone().unwrap();
    assert_eq!(ctx.view_name().as_deref(), Some("item_detail"));
    assert_eq!(
        ctx.state(),
        RequestState::Settled {
            dispatched: true,
            outcome: Settlement::Response { status: 200 },
        }
    );
}

#[tokio::test]
async fn test_respond_renders_errors_with_request_id() {
    let log = Log::default();
    let app = App::builder().router(routes(&log)).build().unwrap();

    let request = http::Request::get("/nope")
        .header("request-id", "req-123")
        .body(Body::empty())
        .unwrap();
    let response = app.respond(request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["request-id"], "req-123");

    let envelope: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(envelope["error"]["code"], "NOT_FOUND");
    assert_eq!(envelope["request_id"], "req-123");
}

#[tokio::test]
async fn test_request_id_headers_in_order() {
    let log = Log::default();
    let app = App::builder()
        .request_id_headers(["x-request-id", "x-correlation-id"])
        .router(routes(&log))
        .build()
        .unwrap();

    let request = http::Request::get("/whoami")
        .header("x-correlation-id", "corr-9")
        .body(Body::empty())
        .unwrap();
    let response = app.handle(request).await.unwrap();
    assert_eq!(body_text(response).await, "corr-9");

    let response = app.handle(get("/whoami")).await.unwrap();
    assert_eq!(body_text(response).await.len(), 36);
}

#[tokio::test]
async fn test_view_reads_body_through_body_phase() {
    let log = Log::default();
    let app = App::builder()
        .middleware(Tracer::new("A", &log))
        .router(routes(&log))
        .build()
        .unwrap();

    let request = http::Request::post("/items")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"lamp"}"#))
        .unwrap();
    let response = app.handle(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_text(response).await, r#"{"name":"lamp"}"#);
    assert!(log.lock().contains(&"A-body".to_string()));
}

#[tokio::test]
async fn test_bare_body_invocation_gets_a_context() {
    let app = App::builder().router(RouteTable::new()).build().unwrap();
    let mut request = http::Request::post("/")
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Body::from("plain"))
        .unwrap();
    let head = RequestHead::from_request(&request);
    let stream = request.body_mut().take_stream();

    let parsed = app.read_body(head, stream).await.unwrap();
    assert_eq!(parsed, ParsedBody::Text("plain".into()));
}

#[tokio::test]
async fn test_server_phase_wraps_shell() {
    let log = Log::default();
    let shell_log = Arc::clone(&log);
    let app = App::builder()
        .middleware(Tracer::new("A", &log))
        .middleware(Tracer::new("B", &log))
        .router(RouteTable::new())
        .shell(FnShell::new(move |server: ServerHandle| {
            let log = Arc::clone(&shell_log);
            async move {
                assert!(server.is_ready());
                log.lock().push("shell".to_string());
                Ok(())
            }
        }))
        .build()
        .unwrap();

    app.serve().await.unwrap();
    assert_eq!(
        *log.lock(),
        vec!["A-setup", "B-setup", "shell", "B-teardown", "A-teardown"]
    );
    assert!(!app.server().is_ready());

    let err = app.serve().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[tokio::test]
async fn test_shutdown_drains_before_teardown() {
    let log = Log::default();
    let app = App::builder()
        .middleware(Tracer::new("A", &log))
        .router(routes(&log))
        .build()
        .unwrap();

    let serving = {
        let app = app.clone();
        tokio::spawn(async move { app.serve().await })
    };
    app.server().wait_ready().await;

    let slow = {
        let app = app.clone();
        tokio::spawn(async move { app.handle(get("/slow")).await })
    };
    while app.server().in_flight().active() == 0 {
        tokio::task::yield_now().await;
    }
    app.shutdown();

    let response = slow.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    serving.await.unwrap().unwrap();

    let log = log.lock().clone();
    let after = log.iter().position(|e| e == "A-after").unwrap();
    let teardown = log.iter().position(|e| e == "A-teardown").unwrap();
    assert!(after < teardown);

    let err = app.handle(get("/slow")).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Resource);
    assert_eq!(app.server().in_flight().active(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_requests_racing_shutdown_finish_before_teardown() {
    let log = Log::default();
    let app = App::builder()
        .middleware(Tracer::new("A", &log))
        .router(routes(&log))
        .build()
        .unwrap();

    let serving = {
        let app = app.clone();
        tokio::spawn(async move { app.serve().await })
    };
    app.server().wait_ready().await;

    let racers: Vec<_> = (0..32)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { app.handle(get("/items/1")).await })
        })
        .collect();
    app.shutdown();
    serving.await.unwrap().unwrap();

    // Every request that got past the shutdown check ran to completion
    // before the server phase unwound.
    let teardown = log.lock().iter().position(|e| e == "A-teardown").unwrap();
    for racer in racers {
        match racer.await.unwrap() {
            Ok(response) => assert_eq!(response.status(), StatusCode::OK),
            Err(err) => assert_eq!(err.category(), ErrorCategory::Resource),
        }
    }
    let log = log.lock().clone();
    let last_after = log.iter().rposition(|e| e == "A-after");
    assert!(last_after.map_or(true, |after| after < teardown));
    assert_eq!(app.server().in_flight().active(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_keep_their_own_context() {
    let log = Log::default();
    let app = App::builder().router(routes(&log)).build().unwrap();

    let ids = ["one", "two", "three"];
    let handles: Vec<_> = ids
        .iter()
        .map(|id| {
            let app = app.clone();
            let request = http::Request::get("/whoami")
                .header("request-id", *id)
                .body(Body::empty())
                .unwrap();
            tokio::spawn(async move { body_text(app.handle(request).await.unwrap()).await })
        })
        .collect();

    for (id, handle) in ids.iter().zip(handles) {
        assert_eq!(handle.await.unwrap(), *id);
    }
}

#[tokio::test]
async fn test_suite_and_testcase_phases() {
    let log = Log::default();
    let app = App::builder()
        .middleware(Tracer::new("A", &log))
        .router(RouteTable::new())
        .build()
        .unwrap();

    let suite = SuiteHandle::new("checkout");
    app.run_suite(suite.clone()).await.unwrap();
    assert!(suite.is_ready());

    let outcome = app
        .run_testcase(suite.clone(), Testcase::new("passes", || async { Ok(()) }))
        .await
        .unwrap();
    assert!(outcome.is_success());

    let outcome = app
        .run_testcase(
            suite,
            Testcase::new("fails", || async { Err::<(), _>(anyhow!("expected failure")) }),
        )
        .await
        .unwrap();
    assert!(!outcome.is_success());
    assert!(outcome.into_result().unwrap_err().to_string().contains("expected failure"));

    assert_eq!(
        *log.lock(),
        vec!["A-suite", "A-testcase:passes", "A-testcase:fails"]
    );
}

#[tokio::test]
async fn test_middleware_can_translate_failures() {
    struct Translate;

    impl Middleware for Translate {
        fn name(&self) -> &'static str {
            "translate"
        }
        fn request_hook(self: Arc<Self>) -> Option<Arc<dyn RequestHook>> {
            Some(self)
        }
    }

    impl RequestHook for Translate {
        fn process_request<'a>(
            &'a self,
            request: Request,
            next: Next<'a, RequestPhase>,
        ) -> BoxFuture<'a, StrataResult<Response>> {
            Box::pin(async move {
                match next.run(request).await {
                    Err(StrataError::NotFound { path }) => {
                        Ok(Response::text(StatusCode::GONE, format!("gone: {path}")))
                    }
                    other => other,
                }
            })
        }
    }

    let log = Log::default();
    let app = App::builder()
        .middleware(Translate)
        .router(routes(&log))
        .build()
        .unwrap();
    let response = app.handle(get("/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}
