//! The onion compiler.
//!
//! An [`Onion`] is one composed asynchronous function per phase: an ordered
//! list of [`Layer`]s wrapped around a [`Terminal`]. The first layer is the
//! outermost. Each layer receives the phase arguments and a [`Next`] that
//! runs the rest of the chain.
//!
//! ```text
//! call(args)
//!   └─ layer 0 before ─ layer 1 before ─ ... ─ terminal
//!                                                 │
//!      layer 0 after  ← layer 1 after  ← ... ←────┘
//! ```
//!
//! A layer that never runs its `Next` short-circuits: inner layers and the
//! terminal never execute and the layer's own result is the onion's result.
//! `Next::run` consumes the `Next`, so a layer cannot run the inner chain
//! twice.

use crate::middleware::Middleware;
use std::fmt;
use std::sync::Arc;
use strata_core::{BoxFuture, StrataResult};

/// A lifecycle phase: its argument shape, output, and hook capability.
pub trait Phase: Sized + Send + Sync + 'static {
    /// Phase name, used in logs.
    const NAME: &'static str;

    /// Arguments each handler receives.
    type Args: Send + 'static;

    /// What the onion resolves to.
    type Output: Send + 'static;

    /// The per-phase hook a middleware opts into.
    type Hook: ?Sized + Send + Sync + 'static;

    /// Returns the middleware's hook for this phase, if it opted in.
    fn select(middleware: &Arc<dyn Middleware>) -> Option<Arc<Self::Hook>>;

    /// Invokes a hook with the phase arguments.
    fn invoke<'a>(
        hook: &'a Self::Hook,
        args: Self::Args,
        next: Next<'a, Self>,
    ) -> BoxFuture<'a, StrataResult<Self::Output>>;
}

/// The innermost function of an onion.
pub type Terminal<P> = Arc<
    dyn Fn(<P as Phase>::Args) -> BoxFuture<'static, StrataResult<<P as Phase>::Output>>
        + Send
        + Sync,
>;

/// Wraps an async function as a terminal.
pub fn terminal<P, F, Fut>(f: F) -> Terminal<P>
where
    P: Phase,
    F: Fn(P::Args) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = StrataResult<P::Output>> + Send + 'static,
{
    Arc::new(move |args| -> BoxFuture<'static, StrataResult<P::Output>> { Box::pin(f(args)) })
}

/// One middleware's hook, positioned in a phase's onion.
pub struct Layer<P: Phase> {
    name: &'static str,
    hook: Arc<P::Hook>,
}

impl<P: Phase> Layer<P> {
    /// Creates a layer.
    pub fn new(name: &'static str, hook: Arc<P::Hook>) -> Self {
        Self { name, hook }
    }

    /// Returns the name of the middleware that owns this layer.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<P: Phase> Clone for Layer<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            hook: Arc::clone(&self.hook),
        }
    }
}

impl<P: Phase> fmt::Debug for Layer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("phase", &P::NAME)
            .field("name", &self.name)
            .finish()
    }
}

/// The remainder of an onion, from some layer inward.
///
/// Handed to each hook. Run it to continue; drop it to short-circuit.
pub struct Next<'a, P: Phase> {
    inner: NextInner<'a, P>,
}

enum NextInner<'a, P: Phase> {
    /// More layers to run.
    Chain {
        layer: &'a Layer<P>,
        next: Box<Next<'a, P>>,
    },
    /// End of the chain.
    Terminal(&'a Terminal<P>),
}

impl<'a, P: Phase> Next<'a, P> {
    fn chain(layer: &'a Layer<P>, next: Self) -> Self {
        Self {
            inner: NextInner::Chain {
                layer,
                next: Box::new(next),
            },
        }
    }

    fn terminal(terminal: &'a Terminal<P>) -> Self {
        Self {
            inner: NextInner::Terminal(terminal),
        }
    }

    /// Runs the rest of the onion.
    ///
    /// Consumes `self`; the inner chain can run at most once.
    pub async fn run(self, args: P::Args) -> StrataResult<P::Output> {
        match self.inner {
            NextInner::Chain { layer, next } => {
                tracing::trace!(phase = P::NAME, middleware = layer.name, "entering layer");
                P::invoke(layer.hook.as_ref(), args, *next).await
            }
            NextInner::Terminal(terminal) => {
                tracing::trace!(phase = P::NAME, "entering terminal");
                terminal(args).await
            }
        }
    }
}

impl<P: Phase> fmt::Debug for Next<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remaining = match &self.inner {
            NextInner::Chain { layer, .. } => layer.name,
            NextInner::Terminal(_) => "terminal",
        };
        f.debug_struct("Next")
            .field("phase", &P::NAME)
            .field("next", &remaining)
            .finish()
    }
}

/// A compiled phase onion.
///
/// Holds no mutable state, so concurrent calls are independent.
pub struct Onion<P: Phase> {
    layers: Vec<Layer<P>>,
    terminal: Terminal<P>,
}

impl<P: Phase> Onion<P> {
    /// Compiles an onion from ordered layers and a terminal.
    pub fn new(layers: Vec<Layer<P>>, terminal: Terminal<P>) -> Self {
        Self { layers, terminal }
    }

    /// Invokes the onion.
    pub fn call(&self, args: P::Args) -> BoxFuture<'_, StrataResult<P::Output>> {
        let chain = self.build_chain();
        Box::pin(chain.run(args))
    }

    /// Builds the chain from the terminal outward, so the first layer ends up
    /// outermost.
    fn build_chain(&self) -> Next<'_, P> {
        let mut next = Next::terminal(&self.terminal);
        for layer in self.layers.iter().rev() {
            next = Next::chain(layer, next);
        }
        next
    }

    /// Returns layer names from outermost to innermost.
    #[must_use]
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(Layer::name).collect()
    }

    /// Returns the number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if only the terminal runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<P: Phase> fmt::Debug for Onion<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Onion")
            .field("phase", &P::NAME)
            .field("layers", &self.layer_names())
            .finish()
    }
}
