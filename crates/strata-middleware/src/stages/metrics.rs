//! Metrics middleware.
//!
//! Emits request, body, and process metrics through the server's
//! [`MetricsSink`](strata_core::MetricsSink).
//!
//! # Metrics Emitted
//!
//! | Phase | Event | Tags |
//! |-------|-------|------|
//! | server | `process.uptime` every `process_interval` | |
//! | server | `process.cpu` (percent) every `process_interval` | |
//! | server | `process.memory` (bytes) every `process_interval` | |
//! | request | `latency` | route |
//! | request | `response` | route, status |
//! | body | `body.latency` | route, result |
//! | body | `body.size` | route, result |
//!
//! A failed request is recorded with the error's status and the error is
//! rethrown unchanged.

use crate::middleware::{BodyHook, Middleware, RequestHook, ServerHook};
use crate::onion::Next;
use crate::phases::{BodyPhase, RequestPhase, ServerPhase};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    BodyStream, BoxFuture, MetricEvent, MetricResult, ParsedBody, Request, RequestContext,
    RequestHead, Response, ServerHandle, StrataResult,
};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Environment variable overriding metric intervals, in milliseconds.
pub const PROCESS_METRICS_INTERVAL_ENV: &str = "PROCESS_METRICS_INTERVAL";

/// Reads [`PROCESS_METRICS_INTERVAL_ENV`], ignoring zero and unparsable values.
#[must_use]
pub fn interval_from_env() -> Option<Duration> {
    std::env::var(PROCESS_METRICS_INTERVAL_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Options for [`MetricsMiddleware`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsOptions {
    /// How often the process heartbeat fires, in milliseconds.
    pub process_interval_ms: u64,
}

impl MetricsOptions {
    /// Default heartbeat interval.
    pub const DEFAULT_PROCESS_INTERVAL: Duration = Duration::from_secs(30);

    /// Defaults, with the interval taken from the environment when set.
    #[must_use]
    pub fn from_env() -> Self {
        interval_from_env().map_or_else(Self::default, |interval| Self {
            process_interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Returns the heartbeat interval.
    #[must_use]
    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms.max(1))
    }
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            process_interval_ms: 30_000,
        }
    }
}

/// Middleware that ships request, body, and process metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsMiddleware {
    options: MetricsOptions,
}

impl MetricsMiddleware {
    /// Creates the middleware with the given options.
    #[must_use]
    pub fn new(options: MetricsOptions) -> Self {
        Self { options }
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &MetricsOptions {
        &self.options
    }
}

/// Aborts a background task when dropped.
///
/// Server hooks hold one for each periodic task they spawn, so the task
/// stops when the hook returns or its future is dropped.
#[derive(Debug)]
pub struct AbortOnDrop(JoinHandle<()>);

impl AbortOnDrop {
    /// Spawns `task` on the current runtime.
    pub fn spawn<F>(task: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(task))
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// CPU and memory usage of the current process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ProcessSample {
    cpu_percent: f32,
    memory_bytes: u64,
}

struct ProcessSampler {
    system: System,
    pid: Pid,
}

impl ProcessSampler {
    fn new() -> Self {
        let mut sampler = Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        };
        // CPU usage is measured between refreshes; take the baseline now.
        sampler.sample();
        sampler
    }

    fn sample(&mut self) -> ProcessSample {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        self.system
            .process(self.pid)
            .map_or_else(ProcessSample::default, |process| ProcessSample {
                cpu_percent: process.cpu_usage(),
                memory_bytes: process.memory(),
            })
    }
}

async fn heartbeat(server: ServerHandle, period: Duration) {
    let mut sampler = ProcessSampler::new();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let sample = sampler.sample();
        server.emit(MetricEvent::duration("process.uptime", server.uptime()));
        server.emit(MetricEvent::gauge("process.cpu", f64::from(sample.cpu_percent)));
        server.emit(MetricEvent::gauge("process.memory", sample.memory_bytes as f64));
    }
}

fn emit_response_metrics(ctx: &RequestContext, status: u16) {
    let latency = ctx.latency();
    let route = ctx.view_name();
    ctx.emit(MetricEvent::duration("latency", latency).with_route(route.clone()));
    ctx.emit(
        MetricEvent::duration("response", latency)
            .with_route(route)
            .with_status(status),
    );
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn server_hook(self: Arc<Self>) -> Option<Arc<dyn ServerHook>> {
        Some(self)
    }

    fn request_hook(self: Arc<Self>) -> Option<Arc<dyn RequestHook>> {
        Some(self)
    }

    fn body_hook(self: Arc<Self>) -> Option<Arc<dyn BodyHook>> {
        Some(self)
    }
}

impl ServerHook for MetricsMiddleware {
    fn process_server<'a>(
        &'a self,
        server: ServerHandle,
        next: Next<'a, ServerPhase>,
    ) -> BoxFuture<'a, StrataResult<()>> {
        Box::pin(async move {
            let period = self.options.process_interval();
            let task = AbortOnDrop::spawn(heartbeat(server.clone(), period));
            tracing::debug!(interval = ?period, "process heartbeat started");

            let result = next.run(server).await;

            drop(task);
            tracing::debug!("process heartbeat stopped");
            result
        })
    }
}

impl RequestHook for MetricsMiddleware {
    fn process_request<'a>(
        &'a self,
        request: Request,
        next: Next<'a, RequestPhase>,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        Box::pin(async move {
            let result = next.run(request).await;
            if let Some(ctx) = RequestContext::current() {
                let status = match &result {
                    Ok(response) => response.status().as_u16(),
                    Err(err) => err.status_code().as_u16(),
                };
                emit_response_metrics(&ctx, status);
            }
            result
        })
    }
}

impl BodyHook for MetricsMiddleware {
    fn process_body<'a>(
        &'a self,
        head: RequestHead,
        stream: BodyStream,
        next: Next<'a, BodyPhase>,
    ) -> BoxFuture<'a, StrataResult<ParsedBody>> {
        Box::pin(async move {
            let size = Arc::new(AtomicU64::new(0));
            let counter = Arc::clone(&size);
            let counted: BodyStream = Box::pin(stream.inspect(move |chunk| {
                if let Ok(bytes) = chunk {
                    counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
            }));

            let started = Instant::now();
            let result = next.run((head, counted)).await;

            if let Some(ctx) = RequestContext::current() {
                let outcome = if result.is_ok() {
                    MetricResult::Success
                } else {
                    MetricResult::Failure
                };
                let route = ctx.view_name();
                ctx.emit(
                    MetricEvent::duration("body.latency", started.elapsed())
                        .with_route(route.clone())
                        .with_result(outcome),
                );
                ctx.emit(
                    MetricEvent::value("body.size", size.load(Ordering::Relaxed) as f64)
                        .with_route(route)
                        .with_result(outcome),
                );
            }
            result
        })
    }
}
