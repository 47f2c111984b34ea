//! Phase registry.
//!
//! Holds the ordered middleware list handed over by the assembler and
//! classifies it per phase. The list is read once per phase to compile an
//! onion and never changes afterwards.

use crate::middleware::Middleware;
use crate::onion::{Layer, Onion, Phase, Terminal};
use std::fmt;
use std::sync::Arc;

/// The ordered middleware list, classified by phase.
#[derive(Clone, Default)]
pub struct PhaseRegistry {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl PhaseRegistry {
    /// Creates a registry from middleware in registration order.
    pub fn new(middleware: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middleware }
    }

    /// Returns the middleware in registration order.
    #[must_use]
    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    /// Returns the layers that take part in phase `P`, in registration order.
    pub fn layers<P: Phase>(&self) -> Vec<Layer<P>> {
        self.middleware
            .iter()
            .filter_map(|mw| P::select(mw).map(|hook| Layer::new(mw.name(), hook)))
            .collect()
    }

    /// Returns the names of the middleware that take part in phase `P`.
    pub fn participants<P: Phase>(&self) -> Vec<&'static str> {
        self.layers::<P>().iter().map(Layer::name).collect()
    }

    /// Compiles the onion for phase `P`.
    pub fn compile<P: Phase>(&self, terminal: Terminal<P>) -> Onion<P> {
        let onion = Onion::new(self.layers::<P>(), terminal);
        tracing::debug!(
            phase = P::NAME,
            layers = ?onion.layer_names(),
            "compiled phase onion"
        );
        onion
    }

    /// Returns the number of registered middleware.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    /// Returns `true` if no middleware is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }
}

impl fmt::Debug for PhaseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.middleware.iter().map(|mw| mw.name()))
            .finish()
    }
}
