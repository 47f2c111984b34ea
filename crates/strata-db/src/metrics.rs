//! Default pool instrumentation.
//!
//! [`PoolMetrics`] turns pool callbacks into metric events on the server's
//! sink:
//!
//! | Event | Kind | Emitted on |
//! |-------|------|------------|
//! | `{name}.idleTime` | duration | first connection request after an idle period |
//! | `{name}.connectionWait` | duration | connection started |
//! | `{name}.connectionDuration` | duration | connection finished |
//! | `{name}.query` | count | transaction requested |
//! | `{name}.transactionWait` | duration | transaction started |
//! | `{name}.transactionDuration` | duration | transaction finished |
//!
//! Every event carries the current session's view name as its route when
//! one is known.

use crate::session::SessionInfo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use strata_core::{Baton, MetricEvent, MetricsSink, PoolInstrumentation, RequestContext};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Timing {
    requested: Instant,
    started: Option<Instant>,
}

impl Timing {
    fn new(now: Instant) -> Self {
        Self {
            requested: now,
            started: None,
        }
    }
}

#[derive(Debug)]
struct State {
    idle_since: Instant,
    idle_reported: bool,
    connections: HashMap<Baton, Timing>,
    transactions: HashMap<Baton, Timing>,
}

/// Pool instrumentation that emits metric events.
pub struct PoolMetrics {
    name: String,
    sink: Arc<dyn MetricsSink>,
    state: Mutex<State>,
}

impl PoolMetrics {
    /// Creates instrumentation emitting `{name}.*` events to `sink`.
    pub fn new(name: impl Into<String>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            name: name.into(),
            sink,
            state: Mutex::new(State {
                idle_since: Instant::now(),
                idle_reported: false,
                connections: HashMap::new(),
                transactions: HashMap::new(),
            }),
        }
    }

    /// Number of acquisitions currently tracked.
    pub fn tracked(&self) -> usize {
        let state = self.state.lock();
        state.connections.len() + state.transactions.len()
    }

    fn emit(&self, event: MetricEvent) {
        let route = SessionInfo::current()
            .and_then(|info| info.view_name())
            .or_else(|| RequestContext::with_current(RequestContext::view_name).flatten());
        self.sink.emit(event.with_route(route));
    }

    fn metric(&self, suffix: &str) -> String {
        format!("{}.{}", self.name, suffix)
    }
}

impl fmt::Debug for PoolMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolMetrics")
            .field("name", &self.name)
            .field("tracked", &self.tracked())
            .finish_non_exhaustive()
    }
}

impl PoolInstrumentation for PoolMetrics {
    fn on_session_idle(&self) {
        let mut state = self.state.lock();
        state.idle_since = Instant::now();
        state.idle_reported = false;
    }

    fn on_subsession_start(&self, parent: &RequestContext, child: &RequestContext) {
        let Some(view_name) = parent
            .extensions()
            .get::<SessionInfo>()
            .and_then(|info| info.view_name())
            .or_else(|| parent.view_name())
        else {
            return;
        };
        if let Some(info) = child.extensions().get::<SessionInfo>() {
            if info.view_name().is_none() {
                info.set_view_name(view_name.clone());
            }
        }
        if child.view_name().is_none() {
            child.set_view_name(view_name);
        }
    }

    fn on_connection_request(&self, baton: Baton) {
        let now = Instant::now();
        let idle = {
            let mut state = self.state.lock();
            state.connections.insert(baton, Timing::new(now));
            if state.idle_reported {
                None
            } else {
                state.idle_reported = true;
                Some(now - state.idle_since)
            }
        };
        if let Some(idle) = idle {
            self.emit(MetricEvent::duration(self.metric("idleTime"), idle));
        }
    }

    fn on_connection_start(&self, baton: Baton) {
        let now = Instant::now();
        let wait = self.state.lock().connections.get_mut(&baton).map(|timing| {
            timing.started = Some(now);
            now - timing.requested
        });
        if let Some(wait) = wait {
            self.emit(MetricEvent::duration(self.metric("connectionWait"), wait));
        }
    }

    fn on_connection_finish(&self, baton: Baton) {
        let started = self
            .state
            .lock()
            .connections
            .remove(&baton)
            .and_then(|timing| timing.started);
        if let Some(started) = started {
            self.emit(MetricEvent::duration(
                self.metric("connectionDuration"),
                started.elapsed(),
            ));
        }
    }

    fn on_transaction_connection_request(&self, baton: Baton) {
        self.state
            .lock()
            .transactions
            .insert(baton, Timing::new(Instant::now()));
        self.emit(MetricEvent::count(self.metric("query"), 1));
    }

    fn on_transaction_connection_start(&self, baton: Baton) {
        let now = Instant::now();
        let wait = self.state.lock().transactions.get_mut(&baton).map(|timing| {
            timing.started = Some(now);
            now - timing.requested
        });
        if let Some(wait) = wait {
            self.emit(MetricEvent::duration(self.metric("transactionWait"), wait));
        }
    }

    fn on_transaction_connection_finish(&self, baton: Baton) {
        let started = self
            .state
            .lock()
            .transactions
            .remove(&baton)
            .and_then(|timing| timing.started);
        if let Some(started) = started {
            self.emit(MetricEvent::duration(
                self.metric("transactionDuration"),
                started.elapsed(),
            ));
        }
    }
}
