//! # Strata Server
//!
//! The lifecycle coordinator for Strata.
//!
//! [`App`] owns the server-scoped context and one compiled onion per phase.
//! A shell (an HTTP transport, a test runner) calls into it:
//!
//! - [`App::serve`] runs the server phase around a [`Shell`]
//! - [`App::handle`] / [`App::respond`] run one request
//! - [`App::read_body`] runs the body phase
//! - [`App::run_suite`] / [`App::run_testcase`] drive the test harness phases
//!
//! ## Example
//!
//! ```
//! use http::{Method, StatusCode};
//! use strata_core::{view_fn, Body, Response, ResponseExt, RouteTable};
//! use strata_server::App;
//!
//! # tokio_test::block_on(async {
//! let routes = RouteTable::new().route(
//!     Method::GET,
//!     "/hello/:name",
//!     "hello",
//!     view_fn(|_req, ctx| async move {
//!         let name = ctx.param("name").unwrap_or("world").to_string();
//!         Ok(Response::text(StatusCode::OK, format!("hello {name}")))
//!     }),
//! );
//! let app = App::builder().router(routes).build().unwrap();
//!
//! let request = http::Request::get("/hello/ada").body(Body::empty()).unwrap();
//! let response = app.handle(request).await.unwrap();
//! assert_eq!(response.status(), StatusCode::OK);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/strata-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;
mod body;
mod shell;

pub use app::{App, AppBuilder, DEFAULT_REQUEST_ID_HEADER};
pub use body::{BodyParser, DefaultBodyParser};
pub use shell::{FnShell, Shell, WaitForShutdown};
