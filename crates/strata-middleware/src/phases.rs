//! The six lifecycle phases.

use crate::middleware::{
    BodyHook, Middleware, RequestHook, ServerHook, SuiteHook, TestcaseHook, ViewHook,
};
use crate::onion::{Next, Phase};
use std::sync::Arc;
use strata_core::{
    BodyStream, BoxFuture, ParsedBody, Request, RequestHead, Response, RouteMatch, ServerHandle,
    StrataResult, SuiteHandle, Testcase, TestcaseOutcome, ViewContext,
};

/// Server start to stop. Terminal: run the shell.
#[derive(Debug, Clone, Copy)]
pub struct ServerPhase;

impl Phase for ServerPhase {
    const NAME: &'static str = "server";
    type Args = ServerHandle;
    type Output = ();
    type Hook = dyn ServerHook;

    fn select(middleware: &Arc<dyn Middleware>) -> Option<Arc<Self::Hook>> {
        Arc::clone(middleware).server_hook()
    }

    fn invoke<'a>(
        hook: &'a Self::Hook,
        server: ServerHandle,
        next: Next<'a, Self>,
    ) -> BoxFuture<'a, StrataResult<()>> {
        hook.process_server(server, next)
    }
}

/// One request. Terminal: route, then run the view onion.
#[derive(Debug, Clone, Copy)]
pub struct RequestPhase;

impl Phase for RequestPhase {
    const NAME: &'static str = "request";
    type Args = Request;
    type Output = Response;
    type Hook = dyn RequestHook;

    fn select(middleware: &Arc<dyn Middleware>) -> Option<Arc<Self::Hook>> {
        Arc::clone(middleware).request_hook()
    }

    fn invoke<'a>(
        hook: &'a Self::Hook,
        request: Request,
        next: Next<'a, Self>,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        hook.process_request(request, next)
    }
}

/// One view dispatch. Terminal: call the matched view.
#[derive(Debug, Clone, Copy)]
pub struct ViewPhase;

impl Phase for ViewPhase {
    const NAME: &'static str = "view";
    type Args = (Request, RouteMatch, ViewContext);
    type Output = Response;
    type Hook = dyn ViewHook;

    fn select(middleware: &Arc<dyn Middleware>) -> Option<Arc<Self::Hook>> {
        Arc::clone(middleware).view_hook()
    }

    fn invoke<'a>(
        hook: &'a Self::Hook,
        (request, route, view_context): Self::Args,
        next: Next<'a, Self>,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        hook.process_view(request, route, view_context, next)
    }
}

/// One body parse. Terminal: the configured body parser.
#[derive(Debug, Clone, Copy)]
pub struct BodyPhase;

impl Phase for BodyPhase {
    const NAME: &'static str = "body";
    type Args = (RequestHead, BodyStream);
    type Output = ParsedBody;
    type Hook = dyn BodyHook;

    fn select(middleware: &Arc<dyn Middleware>) -> Option<Arc<Self::Hook>> {
        Arc::clone(middleware).body_hook()
    }

    fn invoke<'a>(
        hook: &'a Self::Hook,
        (head, stream): Self::Args,
        next: Next<'a, Self>,
    ) -> BoxFuture<'a, StrataResult<ParsedBody>> {
        hook.process_body(head, stream, next)
    }
}

/// Test suite setup. Terminal: mark the suite ready.
#[derive(Debug, Clone, Copy)]
pub struct SuitePhase;

impl Phase for SuitePhase {
    const NAME: &'static str = "suite";
    type Args = SuiteHandle;
    type Output = ();
    type Hook = dyn SuiteHook;

    fn select(middleware: &Arc<dyn Middleware>) -> Option<Arc<Self::Hook>> {
        Arc::clone(middleware).suite_hook()
    }

    fn invoke<'a>(
        hook: &'a Self::Hook,
        suite: SuiteHandle,
        next: Next<'a, Self>,
    ) -> BoxFuture<'a, StrataResult<()>> {
        hook.process_suite(suite, next)
    }
}

/// One testcase. Terminal: run it and capture the outcome.
#[derive(Debug, Clone, Copy)]
pub struct TestcasePhase;

impl Phase for TestcasePhase {
    const NAME: &'static str = "testcase";
    type Args = (SuiteHandle, Testcase);
    type Output = TestcaseOutcome;
    type Hook = dyn TestcaseHook;

    fn select(middleware: &Arc<dyn Middleware>) -> Option<Arc<Self::Hook>> {
        Arc::clone(middleware).testcase_hook()
    }

    fn invoke<'a>(
        hook: &'a Self::Hook,
        (suite, testcase): Self::Args,
        next: Next<'a, Self>,
    ) -> BoxFuture<'a, StrataResult<TestcaseOutcome>> {
        hook.process_testcase(suite, testcase, next)
    }
}
