//! Shells.
//!
//! A shell is what the server phase's terminal runs once every
//! `process_server` setup has completed: bring the service up, serve until
//! shutdown, then return so the server onion can unwind through teardown.
//! The HTTP listener itself is out of scope; a transport drives requests
//! through [`App::handle`](crate::App::handle) from its own tasks and plugs
//! its accept loop in as a shell.

use std::fmt;
use std::future::Future;
use strata_core::{BoxFuture, ServerHandle, StrataResult};

/// Runs the service between server setup and teardown.
pub trait Shell: Send + Sync + 'static {
    /// Serves until shutdown.
    fn run(&self, server: ServerHandle) -> BoxFuture<'_, StrataResult<()>>;
}

/// The default shell: waits for the shutdown signal, then drains in-flight
/// requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitForShutdown;

impl Shell for WaitForShutdown {
    fn run(&self, server: ServerHandle) -> BoxFuture<'_, StrataResult<()>> {
        Box::pin(async move {
            server.shutdown().recv().await;
            let in_flight = server.in_flight().active();
            tracing::info!(in_flight, "shutdown requested, draining requests");
            server.in_flight().wait_idle().await;
            tracing::info!("requests drained");
            Ok(())
        })
    }
}

/// A shell built from an async function.
pub struct FnShell<F>(F);

impl<F, Fut> FnShell<F>
where
    F: Fn(ServerHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StrataResult<()>> + Send + 'static,
{
    /// Wraps `f` as a shell.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> Shell for FnShell<F>
where
    F: Fn(ServerHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StrataResult<()>> + Send + 'static,
{
    fn run(&self, server: ServerHandle) -> BoxFuture<'_, StrataResult<()>> {
        Box::pin((self.0)(server))
    }
}

impl<F> fmt::Debug for FnShell<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnShell").finish_non_exhaustive()
    }
}
