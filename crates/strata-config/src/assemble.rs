//! Turning settings into a runnable application.

use crate::error::ConfigError;
use crate::registry::ComponentRegistry;
use crate::settings::Settings;
use std::fmt;
use std::sync::Arc;
use strata_core::Router;
use strata_middleware::Middleware;
use strata_server::{App, AppBuilder};
use strata_telemetry::PrometheusSink;

/// Settings with every named component resolved.
pub struct Assembly {
    settings: Settings,
    middleware: Vec<Arc<dyn Middleware>>,
    router: Arc<dyn Router>,
}

/// Validates `settings` and resolves its router and middleware through
/// `registry`, in order.
///
/// # Errors
///
/// - [`ConfigError::MissingRouter`] when no router is named
/// - [`ConfigError::UnknownComponent`] when a name is not registered
/// - any error a factory returns for its options
pub fn assemble(settings: Settings, registry: &ComponentRegistry) -> Result<Assembly, ConfigError> {
    settings.validate()?;
    let router_name = settings.router.as_deref().ok_or(ConfigError::MissingRouter)?;
    let router = registry.build_router(router_name)?;

    let middleware = settings
        .middleware
        .iter()
        .map(|entry| registry.build_middleware(entry))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        name = %settings.name,
        router = router_name,
        middleware = ?middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
        "settings assembled"
    );

    Ok(Assembly {
        settings,
        middleware,
        router,
    })
}

impl Assembly {
    /// The validated settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The resolved middleware, outermost first.
    #[must_use]
    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    /// The resolved router.
    #[must_use]
    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    /// An app builder preloaded with the assembled components.
    ///
    /// Callers can still adjust it (add a shell, a body parser, more
    /// middleware) before building.
    #[must_use]
    pub fn app_builder(&self) -> AppBuilder {
        let mut builder = App::builder()
            .name(self.settings.name.clone())
            .request_id_headers(self.settings.request_id_headers.iter().cloned())
            .router_arc(Arc::clone(&self.router));
        for middleware in &self.middleware {
            builder = builder.middleware_arc(Arc::clone(middleware));
        }
        if self.settings.metrics.enabled {
            builder = builder.metrics(Arc::new(PrometheusSink::new()));
        }
        builder
    }

    /// Builds the app and attaches the settings to its server handle.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Build`] if the app fails to build.
    pub fn build(self) -> Result<App, ConfigError> {
        let app = self.app_builder().build().map_err(ConfigError::Build)?;
        app.server().extensions().insert(self.settings);
        Ok(app)
    }
}

impl fmt::Debug for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assembly")
            .field("settings", &self.settings)
            .field(
                "middleware",
                &self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
