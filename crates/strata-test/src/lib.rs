//! # Strata Test
//!
//! A test harness for Strata apps. Requests run in memory through the full
//! request onion; no transport or port is involved.
//!
//! - [`Suite`] builds the app as `test-{name}`, serves it in the background,
//!   and runs the suite phase before any testcase.
//! - [`Suite::run`] sends each testcase through the testcase onion and turns a
//!   captured failure into [`TestError::Testcase`].
//! - [`RequestInterceptor`] is installed outermost. A testcase can set an
//!   interceptor to rewrite or reject requests; it is reset before the next
//!   testcase.
//! - [`TestClient`] builds requests and reads responses into [`TestResponse`].
//!
//! ## Example
//!
//! ```
//! use http::{Method, StatusCode};
//! use strata_core::{view_fn, Response, ResponseExt, RouteTable};
//! use strata_server::App;
//! use strata_test::Suite;
//!
//! # tokio_test::block_on(async {
//! let routes = RouteTable::new().route(
//!     Method::GET,
//!     "/ping",
//!     "ping",
//!     view_fn(|_req, _ctx| async { Ok(Response::text(StatusCode::OK, "pong")) }),
//! );
//! let suite = Suite::start("ping", App::builder().router(routes)).await?;
//! let client = suite.client();
//!
//! suite
//!     .run("answers pong", move || async move {
//!         let response = client.get("/ping").send().await?;
//!         anyhow::ensure!(response.text()? == "pong");
//!         Ok(())
//!     })
//!     .await?;
//!
//! suite.finish().await?;
//! # Ok::<_, strata_test::TestError>(())
//! # }).unwrap();
//! ```

#![doc(html_root_url = "https://docs.rs/strata-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod interceptor;
mod response;
mod suite;

pub use client::{TestClient, TestClientRequest};
pub use error::TestError;
pub use interceptor::{Interceptor, InterceptorHandle, RequestInterceptor};
pub use response::TestResponse;
pub use suite::Suite;
