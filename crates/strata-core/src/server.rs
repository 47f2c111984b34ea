//! Server-scoped context.
//!
//! A [`ServerHandle`] is created once per coordinator and lives for the whole
//! run. Middleware install server-wide resources (pools, timers) as typed
//! extensions during `process_server` setup and remove them during teardown.

use crate::extensions::Extensions;
use crate::metrics::{MetricEvent, MetricsSink};
use crate::types::BoxFuture;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;

/// Handle to the server-scoped context.
///
/// Cheap to clone; all clones refer to the same server.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use strata_core::{NoopSink, ServerHandle};
///
/// let server = ServerHandle::new("api", Arc::new(NoopSink));
/// assert_eq!(server.name(), "api");
/// assert!(!server.is_ready());
/// ```
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    name: String,
    metrics: Arc<dyn MetricsSink>,
    extensions: Extensions,
    shutdown: ShutdownSignal,
    in_flight: InFlightTracker,
    ready: watch::Sender<bool>,
    created_at: Instant,
}

impl ServerHandle {
    /// Creates a new server-scoped context.
    pub fn new(name: impl Into<String>, metrics: Arc<dyn MetricsSink>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServerInner {
                name: name.into(),
                metrics,
                extensions: Extensions::new(),
                shutdown: ShutdownSignal::new(),
                in_flight: InFlightTracker::new(),
                ready,
                created_at: Instant::now(),
            }),
        }
    }

    /// Returns the server name, used as a metric prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the injected metrics sink.
    #[must_use]
    pub fn metrics(&self) -> Arc<dyn MetricsSink> {
        Arc::clone(&self.inner.metrics)
    }

    /// Emits a metric event through the server's sink.
    pub fn emit(&self, event: MetricEvent) {
        self.inner.metrics.emit(event);
    }

    /// Server-wide typed extensions.
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.inner.extensions
    }

    /// The shutdown signal for this server.
    #[must_use]
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.inner.shutdown
    }

    /// Tracks requests currently inside the request phase.
    #[must_use]
    pub fn in_flight(&self) -> &InFlightTracker {
        &self.inner.in_flight
    }

    /// Time since the handle was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    /// Marks the server as ready to accept work.
    pub fn mark_ready(&self) {
        self.inner.ready.send_replace(true);
    }

    /// Marks the server as no longer accepting work.
    pub fn mark_stopped(&self) {
        self.inner.ready.send_replace(false);
    }

    /// Returns `true` while the server is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Waits until the server is ready.
    pub async fn wait_ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("name", &self.inner.name)
            .field("ready", &self.is_ready())
            .field("shutdown", &self.inner.shutdown.is_shutdown())
            .field("in_flight", &self.inner.in_flight.active())
            .finish()
    }
}

/// A signal that can be used to trigger and await graceful shutdown.
///
/// Clones share state; triggering is idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Creates a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Triggers the signal and wakes every waiter.
    pub fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // No receivers is fine.
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` if shutdown has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Returns a future that completes when shutdown is triggered.
    ///
    /// Completes immediately if the signal already fired.
    pub fn recv(&self) -> ShutdownReceiver {
        let triggered = Arc::clone(&self.triggered);
        // Subscribe before checking the flag so a trigger in between is seen.
        let mut receiver = self.sender.subscribe();
        ShutdownReceiver {
            wait: Box::pin(async move {
                if triggered.load(Ordering::SeqCst) {
                    return;
                }
                let _ = receiver.recv().await;
            }),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A future that completes when the shutdown signal is triggered.
pub struct ShutdownReceiver {
    wait: BoxFuture<'static, ()>,
}

impl Future for ShutdownReceiver {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.wait.as_mut().poll(cx)
    }
}

impl fmt::Debug for ShutdownReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownReceiver").finish_non_exhaustive()
    }
}

/// Counts in-flight requests so shutdown can drain them before teardown.
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl InFlightTracker {
    /// Creates a tracker with no active requests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request; the token unregisters it on drop.
    #[must_use]
    pub fn enter(&self) -> InFlightToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        InFlightToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Returns the number of in-flight requests.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until no request is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a drop in between is not missed.
            notified.as_mut().enable();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Token held for the lifetime of one in-flight request.
#[derive(Debug)]
pub struct InFlightToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for InFlightToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}
