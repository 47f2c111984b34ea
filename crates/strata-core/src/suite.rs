//! Suite and testcase types used by the suite and testcase phases.

use crate::extensions::Extensions;
use crate::types::BoxFuture;
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Handle to a test suite.
///
/// Lives across every testcase in the suite. Middleware attach suite-level
/// capabilities (such as a request interceptor setter) as extensions during
/// the suite phase.
#[derive(Clone)]
pub struct SuiteHandle {
    inner: Arc<SuiteInner>,
}

struct SuiteInner {
    name: String,
    extensions: Extensions,
    ready: watch::Sender<bool>,
}

impl SuiteHandle {
    /// Creates a suite that is not ready yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(SuiteInner {
                name: name.into(),
                extensions: Extensions::new(),
                ready,
            }),
        }
    }

    /// Returns the suite name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Suite-level typed extensions.
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.inner.extensions
    }

    /// Marks the suite ready.
    pub fn mark_ready(&self) {
        self.inner.ready.send_replace(true);
    }

    /// Returns `true` once the suite is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Waits for the suite phase to mark the suite ready.
    pub async fn wait_ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl fmt::Debug for SuiteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuiteHandle")
            .field("name", &self.inner.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}

type TestcaseBody = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A testcase body waiting to run.
pub struct Testcase {
    name: String,
    body: TestcaseBody,
}

impl Testcase {
    /// Creates a named testcase.
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(move || -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(body()) }),
        }
    }

    /// Returns the testcase name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the body and captures its outcome.
    ///
    /// Errors and panics are both captured; neither crosses this boundary.
    pub async fn run(self) -> TestcaseOutcome {
        let started = Instant::now();
        let result = AssertUnwindSafe((self.body)()).catch_unwind().await;
        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic) => Some(anyhow::anyhow!("testcase panicked: {}", panic_message(&*panic))),
        };
        TestcaseOutcome {
            name: self.name,
            error,
            elapsed: started.elapsed(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl fmt::Debug for Testcase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Testcase")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Captured `(error, result)` of a testcase run.
#[derive(Debug)]
pub struct TestcaseOutcome {
    /// Testcase name.
    pub name: String,
    /// The failure, if the body failed or panicked.
    pub error: Option<anyhow::Error>,
    /// Wall time spent in the body.
    pub elapsed: Duration,
}

impl TestcaseOutcome {
    /// Returns `true` if the body succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts the outcome into a result, re-raising a captured failure.
    pub fn into_result(self) -> anyhow::Result<()> {
        self.error.map_or(Ok(()), Err)
    }
}
