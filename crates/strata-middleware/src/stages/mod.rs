//! Built-in middleware.
//!
//! - [`metrics`] - Request, body, and process metrics

pub mod metrics;

pub use metrics::{
    interval_from_env, AbortOnDrop, MetricsMiddleware, MetricsOptions,
    PROCESS_METRICS_INTERVAL_ENV,
};
