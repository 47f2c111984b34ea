//! Layered settings and component assembly for Strata.
//!
//! Settings name their router and middleware; a [`ComponentRegistry`] maps
//! those names to factories, and [`assemble`] resolves them into an
//! [`Assembly`] ready to become an [`App`](strata_server::App).
//!
//! Settings load in layers, later layers winning: built-in defaults, a TOML
//! or JSON file, a `.env` file, `STRATA__*` environment variables, then
//! programmatic overrides.
//!
//! # Example
//!
//! ```
//! use strata_config::{assemble, ComponentRegistry, ConfigLoader};
//! use strata_core::RouteTable;
//!
//! # fn main() -> Result<(), strata_config::ConfigError> {
//! let settings = ConfigLoader::new()
//!     .with_string(
//!         r#"
//!         name = "orders"
//!         router = "orders"
//!         middleware = ["metrics"]
//!         "#,
//!         "toml",
//!     )?
//!     .load()?;
//!
//! let registry = ComponentRegistry::with_builtins().router("orders", RouteTable::new);
//! let app = assemble(settings, &registry)?.build()?;
//! assert_eq!(app.server().name(), "orders");
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/strata-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod assemble;
mod error;
mod loader;
mod registry;
mod settings;

pub use assemble::{assemble, Assembly};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use registry::{ComponentRegistry, MiddlewareFactory, RouterFactory, METRICS_MIDDLEWARE};
pub use settings::{
    LoggingSettings, MetricsSettings, MiddlewareEntry, Settings, ENVIRONMENT_ENV,
};
