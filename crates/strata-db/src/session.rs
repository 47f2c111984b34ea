//! Server-scoped database and per-request sessions.
//!
//! A [`Database`] lives in the server handle's extensions for the lifetime
//! of the server phase. Each request opens one [`Session`], stored in the
//! request context's extensions. The session checks out its shared pooled
//! connection lazily and gives it back exactly once when released or
//! dropped, whichever comes first. Concurrent transactions may each hold a
//! further connection, up to the database's per-request limit.

use crate::error::PoolError;
use crate::pool::{ConnectionManager, Pool, PooledConnection};
use parking_lot::RwLock;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use strata_core::{Baton, RequestContext, SharedInstrumentation};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, OwnedSemaphorePermit, Semaphore};

/// The pool plus everything sessions share.
pub struct Database<M: ConnectionManager> {
    pool: Pool<M>,
    instrumentation: SharedInstrumentation,
    max_connections_per_request: usize,
    active_sessions: AtomicUsize,
}

impl<M: ConnectionManager> Database<M> {
    /// Creates a database over `pool`.
    pub fn new(
        pool: Pool<M>,
        instrumentation: SharedInstrumentation,
        max_connections_per_request: usize,
    ) -> Self {
        Self {
            pool,
            instrumentation,
            max_connections_per_request: max_connections_per_request.max(1),
            active_sessions: AtomicUsize::new(0),
        }
    }

    /// Returns the pool.
    pub fn pool(&self) -> &Pool<M> {
        &self.pool
    }

    /// Returns the instrumentation.
    pub fn instrumentation(&self) -> &SharedInstrumentation {
        &self.instrumentation
    }

    /// Number of sessions not yet released.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Looks up the database attached to the current request's server.
    pub fn current() -> Option<Arc<Self>> {
        RequestContext::with_current(|ctx| ctx.server()?.extensions().get::<Self>()).flatten()
    }

    /// Opens a session for `ctx` and stores it in the context's extensions.
    pub fn open_session(self: &Arc<Self>, ctx: &RequestContext) -> Arc<Session<M>> {
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session {
            database: Arc::clone(self),
            info: Arc::new(SessionInfo::default()),
            connection: Mutex::new(None),
            extra_connections: Arc::new(Semaphore::new(self.max_connections_per_request - 1)),
            released: AtomicBool::new(false),
        });
        ctx.extensions().insert_shared(Arc::clone(&session));
        ctx.extensions().insert_shared(Arc::clone(&session.info));
        session
    }

    /// Opens a subsession under `parent`.
    ///
    /// Returns a child context carrying its own session. Run work inside it
    /// with [`RequestContext::scope`]; the subsession is released when the
    /// child context is dropped, or earlier with [`Session::release`].
    pub fn subsession(self: &Arc<Self>, parent: &RequestContext) -> RequestContext {
        let child = parent.child();
        let session = self.open_session(&child);
        if let Some(parent_info) = parent.extensions().get::<SessionInfo>() {
            if let Some(view_name) = parent_info.view_name() {
                session.info.set_view_name(view_name);
            }
        }
        self.instrumentation.on_subsession_start(parent, &child);
        tracing::trace!(
            request_id = %parent.request_id(),
            "database subsession opened"
        );
        child
    }

    fn session_closed(&self) {
        if self.active_sessions.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.instrumentation.on_session_idle();
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for Database<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("pool", &self.pool)
            .field("active_sessions", &self.active_sessions())
            .field(
                "max_connections_per_request",
                &self.max_connections_per_request,
            )
            .finish_non_exhaustive()
    }
}

/// Driver-independent facts about a session, readable by instrumentation.
#[derive(Debug, Default)]
pub struct SessionInfo {
    view_name: RwLock<Option<String>>,
}

impl SessionInfo {
    /// The view this session serves, once dispatched.
    pub fn view_name(&self) -> Option<String> {
        self.view_name.read().clone()
    }

    /// Records the view this session serves.
    pub fn set_view_name(&self, name: impl Into<String>) {
        *self.view_name.write() = Some(name.into());
    }

    /// Returns the current request's session info.
    pub fn current() -> Option<Arc<Self>> {
        RequestContext::with_current(|ctx| ctx.extensions().get::<Self>()).flatten()
    }
}

/// A connection checked out for a session, reported finished on drop.
struct Held<M: ConnectionManager> {
    connection: PooledConnection<M>,
    baton: Baton,
    instrumentation: SharedInstrumentation,
}

impl<M: ConnectionManager> Drop for Held<M> {
    fn drop(&mut self) {
        self.instrumentation.on_connection_finish(self.baton);
    }
}

#[derive(Debug, Clone, Copy)]
enum Acquisition {
    Connection,
    Transaction,
}

/// A baton between its request and start hooks.
///
/// Dropping it unstarted, on error or cancellation, fires the matching
/// finish hook so instrumentation never keeps an orphaned entry.
struct Pending {
    baton: Baton,
    kind: Acquisition,
    instrumentation: SharedInstrumentation,
    armed: bool,
}

impl Pending {
    fn request(instrumentation: &SharedInstrumentation, kind: Acquisition) -> Self {
        let baton = Baton::next();
        match kind {
            Acquisition::Connection => instrumentation.on_connection_request(baton),
            Acquisition::Transaction => instrumentation.on_transaction_connection_request(baton),
        }
        Self {
            baton,
            kind,
            instrumentation: Arc::clone(instrumentation),
            armed: true,
        }
    }

    fn start(mut self) -> Baton {
        match self.kind {
            Acquisition::Connection => self.instrumentation.on_connection_start(self.baton),
            Acquisition::Transaction => {
                self.instrumentation.on_transaction_connection_start(self.baton);
            }
        }
        self.armed = false;
        self.baton
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.kind {
            Acquisition::Connection => self.instrumentation.on_connection_finish(self.baton),
            Acquisition::Transaction => {
                self.instrumentation.on_transaction_connection_finish(self.baton);
            }
        }
    }
}

/// One request's view of the database.
///
/// The session owns one shared connection. Transactions use it when it is
/// free; while it is busy a transaction checks out a connection of its own,
/// so at most `max_connections_per_request` connections are held at once.
pub struct Session<M: ConnectionManager> {
    database: Arc<Database<M>>,
    info: Arc<SessionInfo>,
    connection: Mutex<Option<Held<M>>>,
    extra_connections: Arc<Semaphore>,
    released: AtomicBool,
}

impl<M: ConnectionManager> Session<M> {
    /// Returns the current request's session.
    pub fn current() -> Option<Arc<Self>> {
        RequestContext::with_current(|ctx| ctx.extensions().get::<Self>()).flatten()
    }

    /// Returns the database this session belongs to.
    pub fn database(&self) -> &Arc<Database<M>> {
        &self.database
    }

    /// Returns the session's instrumentation-visible facts.
    pub fn info(&self) -> &Arc<SessionInfo> {
        &self.info
    }

    /// Returns `true` once the session has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Returns `true` if the session currently holds its shared connection.
    pub fn has_connection(&self) -> bool {
        self.connection
            .try_lock()
            .map_or(true, |slot| slot.is_some())
    }

    /// Borrows the session's shared connection, checking one out on first use.
    pub async fn connection(&self) -> Result<SessionConnection<'_, M>, PoolError> {
        let slot = self.connection.lock().await;
        self.shared(slot).await
    }

    /// Starts a transaction.
    ///
    /// The transaction runs on the shared connection if nobody holds it,
    /// otherwise on a connection of its own. Once the session holds
    /// `max_connections_per_request` connections further transactions queue
    /// until one ends.
    pub async fn transaction(&self) -> Result<Transaction<'_, M>, PoolError> {
        let pending = Pending::request(&self.database.instrumentation, Acquisition::Transaction);
        let connection = self.transaction_connection().await?;
        let instrumentation = Arc::clone(&pending.instrumentation);
        let baton = pending.start();
        Ok(Transaction {
            connection,
            baton,
            instrumentation,
        })
    }

    /// Releases the session, returning its shared connection to the pool.
    ///
    /// Waits for a transaction on the shared connection to end first.
    /// Transactions on their own connections return them when dropped.
    /// Idempotent.
    pub async fn release(&self) {
        let (held, first) = {
            let mut slot = self.connection.lock().await;
            self.extra_connections.close();
            (slot.take(), !self.released.swap(true, Ordering::SeqCst))
        };
        drop(held);
        if first {
            self.database.session_closed();
        }
    }

    async fn shared<'a>(
        &'a self,
        mut slot: MutexGuard<'a, Option<Held<M>>>,
    ) -> Result<SessionConnection<'a, M>, PoolError> {
        if self.is_released() {
            return Err(PoolError::SessionReleased);
        }
        if slot.is_none() {
            *slot = Some(self.checkout().await?);
        }

        MutexGuard::try_map(slot, |slot| slot.as_mut().map(|held| &mut *held.connection))
            .map(|guard| SessionConnection { guard })
            .map_err(|_| PoolError::SessionReleased)
    }

    async fn checkout(&self) -> Result<Held<M>, PoolError> {
        let pending = Pending::request(&self.database.instrumentation, Acquisition::Connection);
        let connection = self.database.pool.get().await?;
        let instrumentation = Arc::clone(&pending.instrumentation);
        let baton = pending.start();
        Ok(Held {
            connection,
            baton,
            instrumentation,
        })
    }

    async fn transaction_connection(&self) -> Result<TransactionConnection<'_, M>, PoolError> {
        if let Ok(slot) = self.connection.try_lock() {
            return self.shared(slot).await.map(TransactionConnection::Shared);
        }

        let extra = Arc::clone(&self.extra_connections);
        tokio::select! {
            slot = self.connection.lock() => {
                self.shared(slot).await.map(TransactionConnection::Shared)
            }
            permit = extra.acquire_owned() => {
                let permit = permit.map_err(|_| PoolError::SessionReleased)?;
                if self.is_released() {
                    return Err(PoolError::SessionReleased);
                }
                let held = self.checkout().await?;
                Ok(TransactionConnection::Own {
                    held,
                    _permit: permit,
                })
            }
        }
    }
}

impl<M: ConnectionManager> Drop for Session<M> {
    fn drop(&mut self) {
        drop(self.connection.get_mut().take());
        if !self.released.swap(true, Ordering::SeqCst) {
            self.database.session_closed();
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("view_name", &self.info.view_name())
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a session's connection.
pub struct SessionConnection<'a, M: ConnectionManager> {
    guard: MappedMutexGuard<'a, M::Connection>,
}

impl<M: ConnectionManager> Deref for SessionConnection<'_, M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<M: ConnectionManager> DerefMut for SessionConnection<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

enum TransactionConnection<'a, M: ConnectionManager> {
    Shared(SessionConnection<'a, M>),
    Own {
        held: Held<M>,
        _permit: OwnedSemaphorePermit,
    },
}

/// A running transaction. Ends when dropped.
pub struct Transaction<'a, M: ConnectionManager> {
    connection: TransactionConnection<'a, M>,
    baton: Baton,
    instrumentation: SharedInstrumentation,
}

impl<M: ConnectionManager> Transaction<'_, M> {
    /// Identity of this transaction for instrumentation.
    pub fn baton(&self) -> Baton {
        self.baton
    }

    /// Returns `true` if the transaction runs on the session's shared connection.
    pub fn is_shared(&self) -> bool {
        matches!(self.connection, TransactionConnection::Shared(_))
    }
}

impl<M: ConnectionManager> Deref for Transaction<'_, M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.connection {
            TransactionConnection::Shared(connection) => connection,
            TransactionConnection::Own { held, .. } => &held.connection,
        }
    }
}

impl<M: ConnectionManager> DerefMut for Transaction<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.connection {
            TransactionConnection::Shared(connection) => connection,
            TransactionConnection::Own { held, .. } => &mut held.connection,
        }
    }
}

impl<M: ConnectionManager> Drop for Transaction<'_, M> {
    fn drop(&mut self) {
        self.instrumentation.on_transaction_connection_finish(self.baton);
    }
}
