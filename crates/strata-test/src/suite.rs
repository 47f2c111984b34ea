//! Suites: a running test app plus the testcases run against it.

use crate::client::TestClient;
use crate::error::TestError;
use crate::interceptor::{InterceptorHandle, RequestInterceptor};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use strata_core::{Request, StrataError, StrataResult, SuiteHandle, Testcase, TestcaseOutcome};
use strata_server::{App, AppBuilder};
use tokio::task::JoinHandle;

/// A test app serving in the background, with the suite phase completed.
///
/// The app is named `test-{suite}` and gets a [`RequestInterceptor`] as its
/// outermost middleware. Each testcase starts with the pass-through
/// interceptor installed.
pub struct Suite {
    app: App,
    handle: SuiteHandle,
    serving: Option<JoinHandle<StrataResult<()>>>,
}

impl Suite {
    /// Builds the app, starts serving it, and runs the suite phase.
    ///
    /// Returns once the server is ready and the suite phase has marked the
    /// suite ready.
    ///
    /// # Errors
    ///
    /// - [`TestError::Server`] if the app fails to build, fails during
    ///   startup, or a suite middleware fails
    /// - [`TestError::SuiteNotReady`] if a suite middleware finished without
    ///   calling `next`
    pub async fn start(name: impl Into<String>, builder: AppBuilder) -> Result<Self, TestError> {
        let name = name.into();
        let app = builder
            .name(format!("test-{name}"))
            .prepend_middleware(Arc::new(RequestInterceptor::new()))
            .build()?;

        let mut serving = {
            let app = app.clone();
            tokio::spawn(async move { app.serve().await })
        };
        tokio::select! {
            () = app.server().wait_ready() => {}
            joined = &mut serving => {
                joined??;
                return Err(TestError::Server(StrataError::configuration(
                    "server stopped before becoming ready",
                )));
            }
        }

        let handle = SuiteHandle::new(name);
        let mut suite = Self {
            app,
            handle: handle.clone(),
            serving: Some(serving),
        };
        suite.app.run_suite(handle.clone()).await?;
        if !handle.is_ready() {
            let err = TestError::SuiteNotReady(handle.name().to_string());
            suite.stop().await;
            return Err(err);
        }
        tracing::debug!(suite = handle.name(), "suite ready");
        Ok(suite)
    }

    /// Returns the app under test.
    #[must_use]
    pub fn app(&self) -> &App {
        &self.app
    }

    /// Returns the suite handle the suite phase ran with.
    #[must_use]
    pub fn handle(&self) -> &SuiteHandle {
        &self.handle
    }

    /// Returns a client that sends requests through the app.
    #[must_use]
    pub fn client(&self) -> TestClient {
        TestClient::new(self.app.clone())
    }

    /// Installs a request interceptor for the rest of the current testcase.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::NoInterceptor`] if the suite phase did not
    /// install an interceptor handle.
    pub fn set_request_interceptor<F, Fut>(&self, interceptor: F) -> Result<(), TestError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StrataResult<Request>> + Send + 'static,
    {
        let slot = self
            .handle
            .extensions()
            .get::<InterceptorHandle>()
            .ok_or_else(|| TestError::NoInterceptor(self.handle.name().to_string()))?;
        slot.set(interceptor);
        Ok(())
    }

    /// Runs a testcase through the testcase phase and returns its outcome.
    ///
    /// A failing body is captured in the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::Server`] if a testcase middleware fails.
    pub async fn outcome<F, Fut>(
        &self,
        name: impl Into<String>,
        body: F,
    ) -> Result<TestcaseOutcome, TestError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let testcase = Testcase::new(name, body);
        Ok(self.app.run_testcase(self.handle.clone(), testcase).await?)
    }

    /// Runs a testcase and re-raises its captured failure.
    ///
    /// # Errors
    ///
    /// - [`TestError::Testcase`] if the body failed or panicked
    /// - [`TestError::Server`] if a testcase middleware fails
    pub async fn run<F, Fut>(&self, name: impl Into<String>, body: F) -> Result<(), TestError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let outcome = self.outcome(name, body).await?;
        let name = outcome.name.clone();
        outcome
            .into_result()
            .map_err(|source| TestError::Testcase { name, source })
    }

    /// Shuts the app down and waits for the server phase to unwind.
    ///
    /// # Errors
    ///
    /// Returns the server phase's failure, if any.
    pub async fn finish(mut self) -> Result<(), TestError> {
        self.app.shutdown();
        match self.serving.take() {
            Some(serving) => Ok(serving.await??),
            None => Ok(()),
        }
    }

    async fn stop(&mut self) {
        self.app.shutdown();
        if let Some(serving) = self.serving.take() {
            if let Ok(Err(err)) = serving.await {
                tracing::warn!(error = %err, "server failed while stopping suite");
            }
        }
    }
}

impl Drop for Suite {
    fn drop(&mut self) {
        if self.serving.is_some() {
            self.app.shutdown();
        }
    }
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("app", &self.app)
            .field("handle", &self.handle)
            .field("serving", &self.serving.is_some())
            .finish()
    }
}
