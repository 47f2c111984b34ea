//! # Strata Middleware
//!
//! Phase onions and the middleware contract for Strata.
//!
//! A middleware opts into any subset of six lifecycle phases. For each phase
//! the [`PhaseRegistry`] keeps the middleware that opted in, in registration
//! order, and compiles them around the phase's terminal into an [`Onion`]:
//!
//! ```text
//! A.before → B.before → C.before → terminal
//!                                      ↓
//! A.after  ← B.after  ← C.after  ←─────┘
//! ```
//!
//! | Phase | Arguments | Output |
//! |-------|-----------|--------|
//! | [`ServerPhase`] | server handle | `()` |
//! | [`RequestPhase`] | request | response |
//! | [`ViewPhase`] | request, route match, view context | response |
//! | [`BodyPhase`] | request head, body stream | parsed body |
//! | [`SuitePhase`] | suite handle | `()` |
//! | [`TestcasePhase`] | suite handle, testcase | testcase outcome |
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use strata_middleware::{stages::MetricsMiddleware, Middleware, PhaseRegistry, RequestPhase};
//!
//! let registry = PhaseRegistry::new(vec![
//!     Arc::new(MetricsMiddleware::default()) as Arc<dyn Middleware>,
//! ]);
//! assert_eq!(registry.participants::<RequestPhase>(), vec!["metrics"]);
//! ```

#![doc(html_root_url = "https://docs.rs/strata-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod middleware;
pub mod onion;
pub mod phases;
pub mod registry;
pub mod stages;

// Re-export main types at crate root
pub use middleware::{
    BodyHook, Middleware, RequestHook, ServerHook, SuiteHook, TestcaseHook, ViewHook,
};
pub use onion::{terminal, Layer, Next, Onion, Phase, Terminal};
pub use phases::{BodyPhase, RequestPhase, ServerPhase, SuitePhase, TestcasePhase, ViewPhase};
pub use registry::PhaseRegistry;
pub use strata_core::BoxFuture;
