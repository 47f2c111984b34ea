//! Named component factories.
//!
//! Settings refer to middleware and routers by name. A
//! [`ComponentRegistry`] maps those names to factories that build the real
//! components, handing each middleware factory its settings entry so it can
//! read its options.

use crate::error::ConfigError;
use crate::settings::MiddlewareEntry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use strata_core::Router;
use strata_db::{ConnectionManager, DatabaseMiddleware, DatabaseOptions};
use strata_middleware::stages::{MetricsMiddleware, MetricsOptions};
use strata_middleware::Middleware;

/// Builds a middleware from its settings entry.
pub type MiddlewareFactory =
    Arc<dyn Fn(&MiddlewareEntry) -> Result<Arc<dyn Middleware>, ConfigError> + Send + Sync>;

/// Builds a router.
pub type RouterFactory = Arc<dyn Fn() -> Result<Arc<dyn Router>, ConfigError> + Send + Sync>;

/// Name of the built-in metrics middleware.
pub const METRICS_MIDDLEWARE: &str = "metrics";

/// Maps component names to factories.
///
/// # Example
///
/// ```
/// use strata_config::{ComponentRegistry, MiddlewareEntry};
/// use strata_core::RouteTable;
///
/// let registry = ComponentRegistry::with_builtins().router("orders", RouteTable::new);
///
/// assert!(registry.has_router("orders"));
/// assert!(registry.build_middleware(&MiddlewareEntry::new("metrics")).is_ok());
/// assert!(registry.build_middleware(&MiddlewareEntry::new("nope")).is_err());
/// ```
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    middleware: HashMap<String, MiddlewareFactory>,
    routers: HashMap<String, RouterFactory>,
}

impl ComponentRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `metrics` middleware.
    ///
    /// Without options it reads its interval from `PROCESS_METRICS_INTERVAL`.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new().middleware(METRICS_MIDDLEWARE, |entry| {
            let options = if entry.has_options() {
                entry.options_as::<MetricsOptions>()?
            } else {
                MetricsOptions::from_env()
            };
            Ok(MetricsMiddleware::new(options))
        })
    }

    /// Registers a middleware factory, replacing any with the same name.
    #[must_use]
    pub fn middleware<F, M>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&MiddlewareEntry) -> Result<M, ConfigError> + Send + Sync + 'static,
        M: Middleware,
    {
        let factory: MiddlewareFactory = Arc::new(move |entry: &MiddlewareEntry| {
            factory(entry).map(|m| Arc::new(m) as Arc<dyn Middleware>)
        });
        self.middleware.insert(name.into(), factory);
        self
    }

    /// Registers a database middleware over `manager`.
    ///
    /// The entry's options deserialize into [`DatabaseOptions`]; without
    /// options the defaults are used with the gauge interval taken from the
    /// environment. Invalid options (such as a zero pool size) fail assembly.
    #[must_use]
    pub fn database<M: ConnectionManager>(self, name: impl Into<String>, manager: M) -> Self {
        let manager = Arc::new(manager);
        self.middleware(name, move |entry| {
            let options = if entry.has_options() {
                entry.options_as::<DatabaseOptions>()?
            } else {
                DatabaseOptions::from_env()
            };
            options.validate().map_err(|e| {
                ConfigError::invalid_value(
                    format!("middleware.{}.options", entry.name),
                    e.to_string(),
                )
            })?;
            Ok(DatabaseMiddleware::with_manager(Arc::clone(&manager), options))
        })
    }

    /// Registers a router factory, replacing any with the same name.
    #[must_use]
    pub fn router<F, R>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Router,
    {
        let factory: RouterFactory =
            Arc::new(move || Ok::<_, ConfigError>(Arc::new(factory()) as Arc<dyn Router>));
        self.routers.insert(name.into(), factory);
        self
    }

    /// Returns `true` if a middleware factory is registered under `name`.
    #[must_use]
    pub fn has_middleware(&self, name: &str) -> bool {
        self.middleware.contains_key(name)
    }

    /// Returns `true` if a router factory is registered under `name`.
    #[must_use]
    pub fn has_router(&self, name: &str) -> bool {
        self.routers.contains_key(name)
    }

    /// Returns the registered middleware names, sorted.
    #[must_use]
    pub fn middleware_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.middleware.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds the middleware an entry names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownComponent`] for an unregistered name, or
    /// whatever the factory fails with.
    pub fn build_middleware(
        &self,
        entry: &MiddlewareEntry,
    ) -> Result<Arc<dyn Middleware>, ConfigError> {
        let factory = self
            .middleware
            .get(&entry.name)
            .ok_or_else(|| ConfigError::unknown_middleware(&entry.name))?;
        factory(entry)
    }

    /// Builds the router registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownComponent`] for an unregistered name.
    pub fn build_router(&self, name: &str) -> Result<Arc<dyn Router>, ConfigError> {
        let factory = self
            .routers
            .get(name)
            .ok_or_else(|| ConfigError::unknown_router(name))?;
        factory()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routers: Vec<&str> = self.routers.keys().map(String::as_str).collect();
        routers.sort_unstable();
        f.debug_struct("ComponentRegistry")
            .field("middleware", &self.middleware_names())
            .field("routers", &routers)
            .finish()
    }
}
