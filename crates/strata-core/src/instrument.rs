//! Resource-pool instrumentation protocol.
//!
//! A pooled-resource provider calls these hooks at fixed points of a
//! connection's or transaction's life. Every hook has a no-op default, so an
//! instrumentation only implements what it observes.
//!
//! Each acquisition is identified by a [`Baton`]. Consumers keep any
//! per-baton bookkeeping in a side table keyed by the baton and evict it on
//! the matching `finish` hook. A baton they have never seen must be ignored.

use crate::context::RequestContext;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_BATON: AtomicU64 = AtomicU64::new(1);

/// Identity of one connection or transaction acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Baton(u64);

impl Baton {
    /// Allocates a process-unique baton.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_BATON.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Baton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "baton#{}", self.0)
    }
}

/// Hooks through which middleware observe pool behaviour.
///
/// Implementations must never fail and must not block.
#[allow(unused_variables)]
pub trait PoolInstrumentation: Send + Sync + 'static {
    /// The pool has no active sessions.
    fn on_session_idle(&self) {}

    /// A subsession was opened from `parent`.
    fn on_subsession_start(&self, parent: &RequestContext, child: &RequestContext) {}

    /// A session asked the pool for a connection.
    fn on_connection_request(&self, baton: Baton) {}

    /// The pool handed the session a connection.
    fn on_connection_start(&self, baton: Baton) {}

    /// The session released its connection.
    fn on_connection_finish(&self, baton: Baton) {}

    /// A transaction asked for the session's connection.
    fn on_transaction_connection_request(&self, baton: Baton) {}

    /// The transaction got the connection.
    fn on_transaction_connection_start(&self, baton: Baton) {}

    /// The transaction ended.
    fn on_transaction_connection_finish(&self, baton: Baton) {}
}

/// Shared instrumentation handle.
pub type SharedInstrumentation = Arc<dyn PoolInstrumentation>;

/// Instrumentation that observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInstrumentation;

impl PoolInstrumentation for NoInstrumentation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batons_are_unique_and_increasing() {
        let a = Baton::next();
        let b = Baton::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(a.to_string(), format!("baton#{}", a.id()));
    }

    #[test]
    fn test_defaults_are_noops() {
        let noop: SharedInstrumentation = Arc::new(NoInstrumentation);
        let baton = Baton::next();
        noop.on_session_idle();
        noop.on_connection_request(baton);
        noop.on_connection_start(baton);
        noop.on_connection_finish(baton);
        let parent = RequestContext::detached();
        noop.on_subsession_start(&parent, &parent.child());
    }
}
