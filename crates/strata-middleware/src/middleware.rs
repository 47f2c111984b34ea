//! The middleware contract.
//!
//! A middleware is any type implementing [`Middleware`]. It opts into a
//! lifecycle phase by implementing that phase's hook trait and returning
//! itself from the matching accessor:
//!
//! | Phase | Hook trait | Accessor |
//! |-------|------------|----------|
//! | server | [`ServerHook`] | [`Middleware::server_hook`] |
//! | request | [`RequestHook`] | [`Middleware::request_hook`] |
//! | view | [`ViewHook`] | [`Middleware::view_hook`] |
//! | body | [`BodyHook`] | [`Middleware::body_hook`] |
//! | suite | [`SuiteHook`] | [`Middleware::suite_hook`] |
//! | testcase | [`TestcaseHook`] | [`Middleware::testcase_hook`] |
//!
//! Accessors default to `None`, so a middleware is skipped in every phase it
//! does not opt into while keeping its position in the others.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use strata_core::{BoxFuture, Request, Response, StrataResult};
//! use strata_middleware::{Middleware, Next, RequestHook, RequestPhase};
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn request_hook(self: Arc<Self>) -> Option<Arc<dyn RequestHook>> {
//!         Some(self)
//!     }
//! }
//!
//! impl RequestHook for Timing {
//!     fn process_request<'a>(
//!         &'a self,
//!         request: Request,
//!         next: Next<'a, RequestPhase>,
//!     ) -> BoxFuture<'a, StrataResult<Response>> {
//!         Box::pin(async move {
//!             let started = std::time::Instant::now();
//!             let response = next.run(request).await;
//!             tracing::debug!(elapsed = ?started.elapsed(), "request finished");
//!             response
//!         })
//!     }
//! }
//! ```

use crate::onion::Next;
use crate::phases::{BodyPhase, RequestPhase, ServerPhase, SuitePhase, TestcasePhase, ViewPhase};
use std::sync::Arc;
use strata_core::{
    BodyStream, BoxFuture, ParsedBody, Request, RequestHead, Response, RouteMatch, ServerHandle,
    StrataResult, SuiteHandle, Testcase, TestcaseOutcome, ViewContext,
};

/// A middleware descriptor.
///
/// # Invariants
///
/// - A hook SHOULD run its `next` exactly once, or not at all to short-circuit
/// - Code after `next` runs only once the inner chain has settled
pub trait Middleware: Send + Sync + 'static {
    /// Returns the middleware name, used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Opts into the server phase.
    fn server_hook(self: Arc<Self>) -> Option<Arc<dyn ServerHook>> {
        None
    }

    /// Opts into the request phase.
    fn request_hook(self: Arc<Self>) -> Option<Arc<dyn RequestHook>> {
        None
    }

    /// Opts into the view phase.
    fn view_hook(self: Arc<Self>) -> Option<Arc<dyn ViewHook>> {
        None
    }

    /// Opts into the body phase.
    fn body_hook(self: Arc<Self>) -> Option<Arc<dyn BodyHook>> {
        None
    }

    /// Opts into the suite phase.
    fn suite_hook(self: Arc<Self>) -> Option<Arc<dyn SuiteHook>> {
        None
    }

    /// Opts into the testcase phase.
    fn testcase_hook(self: Arc<Self>) -> Option<Arc<dyn TestcaseHook>> {
        None
    }
}

/// Wraps the server's whole run.
///
/// Setup goes before `next`, teardown after it resolves.
pub trait ServerHook: Send + Sync + 'static {
    /// Processes the server phase.
    fn process_server<'a>(
        &'a self,
        server: ServerHandle,
        next: Next<'a, ServerPhase>,
    ) -> BoxFuture<'a, StrataResult<()>>;
}

/// Wraps each request.
pub trait RequestHook: Send + Sync + 'static {
    /// Processes the request phase.
    fn process_request<'a>(
        &'a self,
        request: Request,
        next: Next<'a, RequestPhase>,
    ) -> BoxFuture<'a, StrataResult<Response>>;
}

/// Wraps each view dispatch.
///
/// Runs `next` with `(request, route, view_context)`.
pub trait ViewHook: Send + Sync + 'static {
    /// Processes the view phase.
    fn process_view<'a>(
        &'a self,
        request: Request,
        route: RouteMatch,
        view_context: ViewContext,
        next: Next<'a, ViewPhase>,
    ) -> BoxFuture<'a, StrataResult<Response>>;
}

/// Wraps each body parse.
///
/// Runs `next` with `(head, stream)`; a hook may replace the stream.
pub trait BodyHook: Send + Sync + 'static {
    /// Processes the body phase.
    fn process_body<'a>(
        &'a self,
        head: RequestHead,
        stream: BodyStream,
        next: Next<'a, BodyPhase>,
    ) -> BoxFuture<'a, StrataResult<ParsedBody>>;
}

/// Wraps a test suite's setup.
pub trait SuiteHook: Send + Sync + 'static {
    /// Processes the suite phase.
    fn process_suite<'a>(
        &'a self,
        suite: SuiteHandle,
        next: Next<'a, SuitePhase>,
    ) -> BoxFuture<'a, StrataResult<()>>;
}

/// Wraps each testcase.
///
/// Runs `next` with `(suite, testcase)`.
pub trait TestcaseHook: Send + Sync + 'static {
    /// Processes the testcase phase.
    fn process_testcase<'a>(
        &'a self,
        suite: SuiteHandle,
        testcase: Testcase,
        next: Next<'a, TestcasePhase>,
    ) -> BoxFuture<'a, StrataResult<TestcaseOutcome>>;
}
