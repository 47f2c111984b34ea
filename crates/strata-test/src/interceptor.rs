//! Per-testcase request interception.
//!
//! [`RequestInterceptor`] sits outermost in the request onion of a test app.
//! Before each request it awaits the current interceptor, which may rewrite
//! the request or reject it. The suite phase hands the suite an
//! [`InterceptorHandle`] to swap the interceptor; the testcase phase resets it
//! to the no-op before every testcase, so nothing leaks between testcases.

use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use strata_core::{
    BoxFuture, Request, Response, StrataResult, SuiteHandle, Testcase, TestcaseOutcome,
};
use strata_middleware::{
    Middleware, Next, RequestHook, RequestPhase, SuiteHook, SuitePhase, TestcaseHook,
    TestcasePhase,
};

/// Inspects, rewrites, or rejects a request before the app sees it.
pub type Interceptor =
    Arc<dyn Fn(Request) -> BoxFuture<'static, StrataResult<Request>> + Send + Sync>;

fn passthrough() -> Interceptor {
    Arc::new(|request: Request| -> BoxFuture<'static, StrataResult<Request>> {
        Box::pin(async move { Ok(request) })
    })
}

/// Swaps the interceptor of a running test app.
#[derive(Clone)]
pub struct InterceptorHandle {
    slot: Arc<RwLock<Interceptor>>,
}

impl InterceptorHandle {
    /// Installs `interceptor` for subsequent requests.
    pub fn set<F, Fut>(&self, interceptor: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StrataResult<Request>> + Send + 'static,
    {
        let interceptor: Interceptor = Arc::new(move |request: Request| {
            Box::pin(interceptor(request)) as BoxFuture<'static, StrataResult<Request>>
        });
        *self.slot.write() = interceptor;
    }

    /// Restores the pass-through interceptor.
    pub fn reset(&self) {
        *self.slot.write() = passthrough();
    }

    fn current(&self) -> Interceptor {
        Arc::clone(&self.slot.read())
    }
}

impl fmt::Debug for InterceptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorHandle").finish_non_exhaustive()
    }
}

/// Middleware that runs the current interceptor ahead of every request.
#[derive(Debug)]
pub struct RequestInterceptor {
    handle: InterceptorHandle,
}

impl RequestInterceptor {
    /// Creates an interceptor middleware with the pass-through installed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handle: InterceptorHandle {
                slot: Arc::new(RwLock::new(passthrough())),
            },
        }
    }

    /// Returns a handle to this middleware's interceptor slot.
    #[must_use]
    pub fn handle(&self) -> InterceptorHandle {
        self.handle.clone()
    }
}

impl Default for RequestInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for RequestInterceptor {
    fn name(&self) -> &'static str {
        "request-interceptor"
    }

    fn request_hook(self: Arc<Self>) -> Option<Arc<dyn RequestHook>> {
        Some(self)
    }

    fn suite_hook(self: Arc<Self>) -> Option<Arc<dyn SuiteHook>> {
        Some(self)
    }

    fn testcase_hook(self: Arc<Self>) -> Option<Arc<dyn TestcaseHook>> {
        Some(self)
    }
}

impl RequestHook for RequestInterceptor {
    fn process_request<'a>(
        &'a self,
        request: Request,
        next: Next<'a, RequestPhase>,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        let interceptor = self.handle.current();
        Box::pin(async move {
            let request = interceptor(request).await?;
            next.run(request).await
        })
    }
}

impl SuiteHook for RequestInterceptor {
    fn process_suite<'a>(
        &'a self,
        suite: SuiteHandle,
        next: Next<'a, SuitePhase>,
    ) -> BoxFuture<'a, StrataResult<()>> {
        suite.extensions().insert(self.handle());
        Box::pin(next.run(suite))
    }
}

impl TestcaseHook for RequestInterceptor {
    fn process_testcase<'a>(
        &'a self,
        suite: SuiteHandle,
        testcase: Testcase,
        next: Next<'a, TestcasePhase>,
    ) -> BoxFuture<'a, StrataResult<TestcaseOutcome>> {
        self.handle.reset();
        Box::pin(next.run((suite, testcase)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use strata_core::{Body, StrataError};

    fn request() -> Request {
        http::Request::get("/").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_passthrough_by_default() {
        let mw = RequestInterceptor::new();
        let out = mw.handle().current()(request()).await.unwrap();
        assert_eq!(out.uri().path(), "/");
    }

    #[tokio::test]
    async fn test_set_and_reset() {
        let mw = RequestInterceptor::new();
        let handle = mw.handle();
        handle.set(|_request| async {
            Err(StrataError::rejected(StatusCode::FORBIDDEN, "blocked"))
        });
        let err = handle.current()(request()).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        handle.reset();
        assert!(handle.current()(request()).await.is_ok());
    }
}
