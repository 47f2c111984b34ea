//! # Strata Core
//!
//! Core types and traits for the Strata lifecycle engine.
//!
//! This crate provides the foundational types shared by every phase:
//!
//! - [`RequestContext`] - Per-invocation context with a task-local ambient slot
//! - [`ServerHandle`] - Server-scoped context, shutdown signal, and extensions
//! - [`StrataError`] - Standard error type with HTTP status mapping
//! - [`Router`] / [`View`] - Routing collaborator contracts
//! - [`MetricEvent`] / [`MetricsSink`] - Metric event contract
//! - [`PoolInstrumentation`] - Resource-pool observation hooks
//! - [`SuiteHandle`] / [`Testcase`] - Test harness phase arguments

#![doc(html_root_url = "https://docs.rs/strata-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod extensions;
mod instrument;
mod metrics;
mod routing;
mod server;
mod suite;
mod types;

pub use context::{spawn_scoped, RequestContext, RequestId, RequestState, Settlement};
pub use error::{ErrorCategory, ErrorDetail, ErrorEnvelope, StrataError, StrataResult};
pub use extensions::Extensions;
pub use instrument::{Baton, NoInstrumentation, PoolInstrumentation, SharedInstrumentation};
pub use metrics::{MetricEvent, MetricKind, MetricResult, MetricsSink, NoopSink, RecordingSink};
pub use routing::{
    view_fn, BodyReader, FnView, RouteMatch, RouteTable, Router, View, ViewContext,
};
pub use server::{InFlightToken, InFlightTracker, ServerHandle, ShutdownReceiver, ShutdownSignal};
pub use suite::{SuiteHandle, Testcase, TestcaseOutcome};
pub use types::{Body, BodyStream, BoxFuture, ParsedBody, Request, RequestHead, Response, ResponseExt};
