//! # Strata DB
//!
//! Connection pooling and request-scoped database sessions for Strata.
//!
//! - [`Pool`] - Bounded pool over a driver-supplied [`ConnectionManager`]
//! - [`Database`] / [`Session`] - Server-scoped pool handle and per-request session
//! - [`PoolMetrics`] - Default instrumentation, emitting wait and hold durations
//! - [`DatabaseMiddleware`] - Wires all of the above into the server, request, and view phases
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use strata_core::BoxFuture;
//! use strata_db::{ConnectionManager, DatabaseMiddleware, DatabaseOptions, PoolError};
//! use strata_middleware::{Middleware, PhaseRegistry, RequestPhase, ServerPhase};
//!
//! struct Loopback;
//!
//! impl ConnectionManager for Loopback {
//!     type Connection = ();
//!
//!     fn connect(&self) -> BoxFuture<'_, Result<(), PoolError>> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//!
//! let db = DatabaseMiddleware::new(Loopback, DatabaseOptions::default());
//! let registry = PhaseRegistry::new(vec![Arc::new(db) as Arc<dyn Middleware>]);
//! assert_eq!(registry.participants::<ServerPhase>(), vec!["database"]);
//! assert_eq!(registry.participants::<RequestPhase>(), vec!["database"]);
//! ```

#![doc(html_root_url = "https://docs.rs/strata-db/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod metrics;
mod middleware;
mod pool;
mod session;

pub use error::PoolError;
pub use metrics::PoolMetrics;
pub use middleware::{DatabaseMiddleware, DatabaseOptions};
pub use pool::{ConnectionManager, Pool, PoolConfig, PooledConnection};
pub use session::{Database, Session, SessionConnection, SessionInfo, Transaction};
