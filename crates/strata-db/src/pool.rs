//! A bounded connection pool.
//!
//! The pool is generic over a [`ConnectionManager`], which is the driver
//! collaborator that actually opens connections. Concurrent checkouts are
//! bounded by a semaphore sized to `max_size`; returned connections are kept
//! idle and reused.

use crate::error::PoolError;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_core::BoxFuture;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Opens connections for a [`Pool`].
pub trait ConnectionManager: Send + Sync + 'static {
    /// The connection type.
    type Connection: Send + 'static;

    /// Opens a new connection.
    fn connect(&self) -> BoxFuture<'_, Result<Self::Connection, PoolError>>;

    /// Returns `true` if a returned connection must not be reused.
    fn has_broken(&self, _connection: &Self::Connection) -> bool {
        false
    }
}

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once.
    pub max_size: usize,
    /// How long a checkout may wait, in milliseconds. `None` waits forever.
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout_ms: Some(30_000),
        }
    }
}

impl PoolConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Config("max_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Returns the checkout timeout.
    #[must_use]
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

struct PoolInner<M: ConnectionManager> {
    manager: Arc<M>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<M::Connection>>,
    waiting: AtomicUsize,
    closed: AtomicBool,
}

/// A shared, bounded connection pool.
///
/// Cheap to clone; clones share the same connections.
pub struct Pool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Counts a task as waiting for as long as it is alive.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<M: ConnectionManager> Pool<M> {
    /// Creates a pool. No connection is opened until the first checkout.
    pub fn new(manager: Arc<M>, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                manager,
                semaphore: Arc::new(Semaphore::new(config.max_size)),
                config,
                idle: Mutex::new(Vec::new()),
                waiting: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Checks out a connection, opening one if none is idle.
    ///
    /// A failed checkout leaves the pool's counts unchanged.
    pub async fn get(&self) -> Result<PooledConnection<M>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let permit = {
            let _waiting = WaitingGuard::enter(&self.inner.waiting);
            let acquire = Arc::clone(&self.inner.semaphore).acquire_owned();
            match self.inner.config.acquire_timeout() {
                Some(limit) => tokio::time::timeout(limit, acquire)
                    .await
                    .map_err(|_| PoolError::Timeout(limit))?,
                None => acquire.await,
            }
            .map_err(|_| PoolError::Closed)?
        };

        let idle = self.inner.idle.lock().pop();
        let connection = match idle {
            Some(connection) => connection,
            None => self.inner.manager.connect().await?,
        };

        Ok(PooledConnection {
            connection: Some(connection),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Number of checkouts that could succeed right now without waiting.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Number of tasks waiting for a connection.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    /// Number of idle connections kept for reuse.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Maximum number of concurrent checkouts.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.inner.config.max_size
    }

    /// Returns `true` once the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closes the pool.
    ///
    /// Waiters fail with [`PoolError::Closed`], idle connections are dropped,
    /// and connections still checked out are dropped when returned.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.semaphore.close();
            self.inner.idle.lock().clear();
            tracing::debug!("connection pool closed");
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("max_size", &self.max_size())
            .field("available", &self.available())
            .field("waiting", &self.waiting())
            .field("idle", &self.idle())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A checked-out connection. Returned to the pool on drop.
pub struct PooledConnection<M: ConnectionManager> {
    connection: Option<M::Connection>,
    pool: Arc<PoolInner<M>>,
    _permit: OwnedSemaphorePermit,
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref().expect("connection present until drop")
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut().expect("connection present until drop")
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        // The connection goes back before the permit is released, so the
        // next checkout finds it idle.
        if let Some(connection) = self.connection.take() {
            let reusable = !self.pool.closed.load(Ordering::SeqCst)
                && !self.pool.manager.has_broken(&connection);
            if reusable {
                self.pool.idle.lock().push(connection);
            }
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}
