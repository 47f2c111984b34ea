//! Database middleware.

use crate::error::PoolError;
use crate::metrics::PoolMetrics;
use crate::pool::{ConnectionManager, Pool, PoolConfig};
use crate::session::{Database, SessionInfo};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    BoxFuture, MetricEvent, Request, RequestContext, Response, RouteMatch, ServerHandle,
    SharedInstrumentation, StrataResult, ViewContext,
};
use strata_middleware::stages::{interval_from_env, AbortOnDrop};
use strata_middleware::{
    Middleware, Next, RequestHook, RequestPhase, ServerHook, ServerPhase, ViewHook, ViewPhase,
};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Options for [`DatabaseMiddleware`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseOptions {
    /// Pool sizing.
    pub pool: PoolConfig,
    /// Pooled connections one request may hold at once, shared plus per-transaction.
    pub max_connections_per_request: usize,
    /// How often pool gauges are emitted, in milliseconds.
    pub metrics_interval_ms: u64,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            max_connections_per_request: 1,
            metrics_interval_ms: 1_000,
        }
    }
}

impl DatabaseOptions {
    /// Defaults, with the gauge interval taken from the environment when set.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_interval()
    }

    /// Overrides the gauge interval from the environment when set.
    #[must_use]
    pub fn with_env_interval(mut self) -> Self {
        if let Some(interval) = interval_from_env() {
            self.metrics_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        }
        self
    }

    /// Returns the gauge interval.
    #[must_use]
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1))
    }

    /// Validates the options.
    pub fn validate(&self) -> Result<(), PoolError> {
        self.pool.validate()?;
        if self.max_connections_per_request == 0 {
            return Err(PoolError::Config(
                "max_connections_per_request must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Middleware that owns the pool for the server's lifetime and gives each
/// request a session.
///
/// | Phase | Behaviour |
/// |-------|-----------|
/// | server | create and attach the pool, emit pool gauges, close on the way out |
/// | request | open a session, release it once the request settles |
/// | view | copy the view name onto the session |
pub struct DatabaseMiddleware<M: ConnectionManager> {
    manager: Arc<M>,
    options: DatabaseOptions,
    instrumentation: Option<SharedInstrumentation>,
}

impl<M: ConnectionManager> DatabaseMiddleware<M> {
    /// Creates the middleware over a connection manager.
    pub fn new(manager: M, options: DatabaseOptions) -> Self {
        Self::with_manager(Arc::new(manager), options)
    }

    /// Creates the middleware over a shared connection manager.
    pub fn with_manager(manager: Arc<M>, options: DatabaseOptions) -> Self {
        Self {
            manager,
            options,
            instrumentation: None,
        }
    }

    /// Replaces the default [`PoolMetrics`] instrumentation.
    #[must_use]
    pub fn with_instrumentation(mut self, instrumentation: SharedInstrumentation) -> Self {
        self.instrumentation = Some(instrumentation);
        self
    }

    /// Returns the options.
    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    fn instrumentation_for(&self, server: &ServerHandle) -> SharedInstrumentation {
        self.instrumentation.clone().unwrap_or_else(|| {
            Arc::new(PoolMetrics::new(server.name(), server.metrics())) as SharedInstrumentation
        })
    }
}

impl<M: ConnectionManager> fmt::Debug for DatabaseMiddleware<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseMiddleware")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

async fn pool_gauges<M: ConnectionManager>(server: ServerHandle, pool: Pool<M>, period: Duration) {
    let available = format!("{}.pg-pool-available", server.name());
    let waiting = format!("{}.pg-pool-waiting", server.name());
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        server.emit(MetricEvent::gauge(available.as_str(), pool.available() as f64));
        server.emit(MetricEvent::gauge(waiting.as_str(), pool.waiting() as f64));
    }
}

impl<M: ConnectionManager> Middleware for DatabaseMiddleware<M> {
    fn name(&self) -> &'static str {
        "database"
    }

    fn server_hook(self: Arc<Self>) -> Option<Arc<dyn ServerHook>> {
        Some(self)
    }

    fn request_hook(self: Arc<Self>) -> Option<Arc<dyn RequestHook>> {
        Some(self)
    }

    fn view_hook(self: Arc<Self>) -> Option<Arc<dyn ViewHook>> {
        Some(self)
    }
}

impl<M: ConnectionManager> ServerHook for DatabaseMiddleware<M> {
    fn process_server<'a>(
        &'a self,
        server: ServerHandle,
        next: Next<'a, ServerPhase>,
    ) -> BoxFuture<'a, StrataResult<()>> {
        Box::pin(async move {
            self.options.validate()?;
            let pool = Pool::new(Arc::clone(&self.manager), self.options.pool.clone())?;
            let database = Arc::new(Database::new(
                pool.clone(),
                self.instrumentation_for(&server),
                self.options.max_connections_per_request,
            ));
            server.extensions().insert_shared(database);

            let period = self.options.metrics_interval();
            let gauges = AbortOnDrop::spawn(pool_gauges(server.clone(), pool.clone(), period));
            tracing::info!(
                max_size = pool.max_size(),
                interval = ?period,
                "database pool attached"
            );

            let result = next.run(server.clone()).await;

            drop(gauges);
            server.extensions().remove::<Database<M>>();
            pool.close();
            tracing::info!("database pool closed");
            result
        })
    }
}

/// Releases the request's session when the request settles, however it
/// settles.
impl<M: ConnectionManager> RequestHook for DatabaseMiddleware<M> {
    fn process_request<'a>(
        &'a self,
        request: Request,
        next: Next<'a, RequestPhase>,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        Box::pin(async move {
            let Some(ctx) = RequestContext::current() else {
                return next.run(request).await;
            };
            let Some(database) = ctx
                .server()
                .and_then(|server| server.extensions().get::<Database<M>>())
            else {
                tracing::warn!("no database attached to server; request runs without a session");
                return next.run(request).await;
            };

            let session = database.open_session(&ctx);
            let result = next.run(request).await;
            session.release().await;
            result
        })
    }
}

impl<M: ConnectionManager> ViewHook for DatabaseMiddleware<M> {
    fn process_view<'a>(
        &'a self,
        request: Request,
        route: RouteMatch,
        view_context: ViewContext,
        next: Next<'a, ViewPhase>,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        Box::pin(async move {
            if let Some(info) = SessionInfo::current() {
                info.set_view_name(route.view_name.clone());
            }
            next.run((request, route, view_context)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = DatabaseOptions::default();
        assert_eq!(options.pool.max_size, 10);
        assert_eq!(options.max_connections_per_request, 1);
        assert_eq!(options.metrics_interval(), Duration::from_secs(1));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_deserialize() {
        let options: DatabaseOptions = serde_json::from_value(serde_json::json!({
            "pool": { "max_size": 4 },
            "metrics_interval_ms": 250
        }))
        .unwrap();
        assert_eq!(options.pool.max_size, 4);
        assert_eq!(options.pool.acquire_timeout_ms, Some(30_000));
        assert_eq!(options.metrics_interval(), Duration::from_millis(250));

        let unknown = serde_json::from_value::<DatabaseOptions>(serde_json::json!({
            "pool_size": 4
        }));
        assert!(unknown.is_err());
    }

    #[test]
    fn test_zero_transaction_bound_is_rejected() {
        let options = DatabaseOptions {
            max_connections_per_request: 0,
            ..DatabaseOptions::default()
        };
        assert!(matches!(options.validate(), Err(PoolError::Config(_))));
    }
}
