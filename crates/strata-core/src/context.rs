//! Request-scoped context and its ambient task-local slot.
//!
//! The [`RequestContext`] carries per-invocation state through the request,
//! view, and body onions. Code that is not handed the context explicitly
//! (logging deep inside a view, pool instrumentation) reads it through
//! [`RequestContext::current`], which is backed by a `tokio` task-local slot
//! entered with [`RequestContext::scope`].

use crate::error::ErrorCategory;
use crate::extensions::Extensions;
use crate::metrics::MetricEvent;
use crate::server::ServerHandle;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Longest request id accepted from a client header.
const MAX_REQUEST_ID_LEN: usize = 200;

/// Identifier used to correlate logs and metrics for one request.
///
/// Generated ids are UUID v7, which are time-ordered. Ids taken from a
/// client header are kept verbatim.
///
/// # Example
///
/// ```
/// use strata_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(id.as_str().len(), 36);
///
/// let forwarded = RequestId::from_header("abc-123").unwrap();
/// assert_eq!(forwarded.to_string(), "abc-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Accepts a client-supplied id if it is non-empty, reasonably short, and
    /// made of visible ASCII.
    #[must_use]
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        let valid = !value.is_empty()
            && value.len() <= MAX_REQUEST_ID_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());
        valid.then(|| Self(value.to_string()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

/// How a settled request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// A response was produced, possibly by middleware translating a failure.
    Response {
        /// Response status code.
        status: u16,
    },
    /// A failure propagated out of the outermost handler.
    Failure {
        /// Category of the propagated failure.
        category: ErrorCategory,
    },
}

/// Lifecycle of one request-phase invocation.
///
/// `Received -> InPipeline -> (Dispatched | ShortCircuited) -> Settled`.
/// `Settled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// The context exists but the onion has not been entered.
    Received,
    /// Middleware are running.
    InPipeline,
    /// The request terminal ran and handed off to routing.
    Dispatched,
    /// The onion returned without reaching the terminal.
    ShortCircuited,
    /// The invocation finished.
    Settled {
        /// Whether the terminal ran.
        dispatched: bool,
        /// How it ended.
        outcome: Settlement,
    },
}

impl RequestState {
    /// Returns `true` once the request has settled.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Settled { .. })
    }
}

/// Per-invocation context shared by every handler in one onion call.
///
/// Cloning is cheap and clones share state, so a middleware can stash a
/// clone and observe values set further in.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    request_id: RequestId,
    received_at: Instant,
    server: Option<ServerHandle>,
    parent: Option<RequestContext>,
    view_name: RwLock<Option<String>>,
    state: Mutex<RequestState>,
    extensions: Extensions,
}

impl RequestContext {
    /// Creates a context for a request received now.
    #[must_use]
    pub fn new(request_id: RequestId, server: Option<ServerHandle>) -> Self {
        Self::build(request_id, server, None, None)
    }

    /// Creates a context with a fresh id and no server, for bare invocations.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(RequestId::new(), None)
    }

    fn build(
        request_id: RequestId,
        server: Option<ServerHandle>,
        parent: Option<Self>,
        view_name: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request_id,
                received_at: Instant::now(),
                server,
                parent,
                view_name: RwLock::new(view_name),
                state: Mutex::new(RequestState::Received),
                extensions: Extensions::new(),
            }),
        }
    }

    /// Creates a subsession context.
    ///
    /// The child shares the request id and server, inherits the current view
    /// name, and starts with its own extensions and timer.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::build(
            self.inner.request_id.clone(),
            self.inner.server.clone(),
            Some(self.clone()),
            self.view_name(),
        )
    }

    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.inner.request_id
    }

    /// Returns when the request was received.
    #[must_use]
    pub fn received_at(&self) -> Instant {
        self.inner.received_at
    }

    /// Returns the time elapsed since the request was received.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.inner.received_at.elapsed()
    }

    /// Returns the server this request belongs to, if any.
    #[must_use]
    pub fn server(&self) -> Option<&ServerHandle> {
        self.inner.server.as_ref()
    }

    /// Returns the parent context of a subsession.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.inner.parent.as_ref()
    }

    /// Request-local typed extensions.
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.inner.extensions
    }

    /// Returns the matched view name, once routing has run.
    #[must_use]
    pub fn view_name(&self) -> Option<String> {
        self.inner.view_name.read().clone()
    }

    /// Sets the view name.
    pub fn set_view_name(&self, name: impl Into<String>) {
        *self.inner.view_name.write() = Some(name.into());
    }

    /// Emits a metric through the server's sink. Dropped without a server.
    pub fn emit(&self, event: MetricEvent) {
        if let Some(server) = &self.inner.server {
            server.emit(event);
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        *self.inner.state.lock()
    }

    /// `Received -> InPipeline`. Ignored in any other state.
    pub fn begin(&self) {
        let mut state = self.inner.state.lock();
        if *state == RequestState::Received {
            *state = RequestState::InPipeline;
        }
    }

    /// `InPipeline -> Dispatched`. Ignored in any other state.
    pub fn mark_dispatched(&self) {
        let mut state = self.inner.state.lock();
        if *state == RequestState::InPipeline {
            *state = RequestState::Dispatched;
        }
    }

    /// Settles the request. Returns `false` if it was already settled.
    pub fn settle(&self, outcome: Settlement) -> bool {
        let mut state = self.inner.state.lock();
        let dispatched = match *state {
            RequestState::Settled { .. } => return false,
            RequestState::Dispatched => true,
            RequestState::InPipeline => {
                *state = RequestState::ShortCircuited;
                tracing::debug!(
                    request_id = %self.inner.request_id,
                    "request short-circuited before dispatch"
                );
                false
            }
            RequestState::Received | RequestState::ShortCircuited => false,
        };
        *state = RequestState::Settled {
            dispatched,
            outcome,
        };
        true
    }

    /// Runs `future` with this context as the ambient current context.
    ///
    /// The context stays active across every suspension point of `future`;
    /// other tasks keep their own context.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        CURRENT.scope(self, future).await
    }

    /// Returns the ambient current context, if one is active.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Calls `f` with the ambient current context, if one is active.
    pub fn with_current<R>(f: impl FnOnce(&Self) -> R) -> Option<R> {
        CURRENT.try_with(f).ok()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.inner.request_id)
            .field("view_name", &self.view_name())
            .field("state", &self.state())
            .field("is_subsession", &self.inner.parent.is_some())
            .finish_non_exhaustive()
    }
}

/// Spawns `future` on the runtime with the current context, if any, active.
///
/// Plain `tokio::spawn` does not carry the ambient context into the new task.
pub fn spawn_scoped<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match RequestContext::current() {
        Some(ctx) => tokio::spawn(CURRENT.scope(ctx, future)),
        None => tokio::spawn(future),
    }
}
