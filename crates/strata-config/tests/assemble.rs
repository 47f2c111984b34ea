//! Settings files resolved into a running app.

use http::{Method, StatusCode};
use std::io::Write;
use std::sync::Arc;
use strata_config::{assemble, ComponentRegistry, ConfigError, ConfigLoader, Settings};
use strata_core::{
    view_fn, Body, BoxFuture, RecordingSink, Request, Response, ResponseExt, RouteTable,
    StrataResult,
};
use strata_db::{ConnectionManager, Database, PoolError};
use strata_middleware::{Middleware, Next, RequestHook, RequestPhase};

struct Header(&'static str);

impl Middleware for Header {
    fn name(&self) -> &'static str {
        "header"
    }
    fn request_hook(self: Arc<Self>) -> Option<Arc<dyn RequestHook>> {
        Some(self)
    }
}

impl RequestHook for Header {
    fn process_request<'a>(
        &'a self,
        request: Request,
        next: Next<'a, RequestPhase>,
    ) -> BoxFuture<'a, StrataResult<Response>> {
        Box::pin(async move {
            let mut response = next.run(request).await;
            if let Ok(response) = &mut response {
                response
                    .headers_mut()
                    .insert("x-tag", http::HeaderValue::from_static(self.0));
            }
            response
        })
    }
}

struct MemoryDriver;

impl ConnectionManager for MemoryDriver {
    type Connection = ();

    fn connect(&self) -> BoxFuture<'_, Result<(), PoolError>> {
        Box::pin(async { Ok(()) })
    }
}

fn registry() -> ComponentRegistry {
    ComponentRegistry::with_builtins()
        .database("database", MemoryDriver)
        .middleware("header", |entry| {
            let tag = match entry.options.get("tag").and_then(|v| v.as_str()) {
                Some("blue") => "blue",
                _ => "plain",
            };
            Ok(Header(tag))
        })
        .router("orders", || {
            RouteTable::new().route(
                Method::GET,
                "/orders",
                "order_list",
                view_fn(|_req, _ctx| async { Ok(Response::text(StatusCode::OK, "[]")) }),
            )
        })
}

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[tokio::test]
async fn test_toml_file_to_running_app() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "strata.toml",
        r#"
        name = "orders"
        router = "orders"
        request_id_headers = ["x-request-id"]
        middleware = [
            "metrics",
            { name = "header", options = { tag = "blue" } },
            { name = "database", options = { pool = { max_size = 4 } } },
        ]
        "#,
    );

    let settings = ConfigLoader::new().with_file(&path).unwrap().load().unwrap();
    let assembly = assemble(settings, &registry()).unwrap();
    let names: Vec<_> = assembly.middleware().iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["metrics", "header", "database"]);

    let sink = RecordingSink::new();
    let app = assembly
        .app_builder()
        .metrics(Arc::new(sink.clone()))
        .build()
        .unwrap();

    let serving = {
        let app = app.clone();
        tokio::spawn(async move { app.serve().await })
    };
    app.server().wait_ready().await;
    let db = app
        .server()
        .extensions()
        .get::<Database<MemoryDriver>>()
        .unwrap();
    assert_eq!(db.pool().max_size(), 4);

    let request = http::Request::get("/orders")
        .header("x-request-id", "abc-1")
        .body(Body::empty())
        .unwrap();
    let response = app.respond(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-tag"], "blue");
    assert_eq!(response.headers()["x-request-id"], "abc-1");
    assert_eq!(sink.named("latency").len(), 1);

    app.shutdown();
    serving.await.unwrap().unwrap();
}

#[test]
fn test_json_file_and_settings_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "strata.json",
        r#"{"name": "billing", "router": "orders", "is_external": false}"#,
    );

    let settings = ConfigLoader::new().with_file(&path).unwrap().load().unwrap();
    let app = assemble(settings, &registry()).unwrap().build().unwrap();
    let attached = app.server().extensions().get::<Settings>().unwrap();
    assert_eq!(attached.name, "billing");
    assert!(!attached.is_external);
}

#[test]
fn test_unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "strata.yaml", "name: orders");
    assert!(matches!(
        ConfigLoader::new().with_file(&path),
        Err(ConfigError::InvalidValue { .. })
    ));
}

#[test]
fn test_dotenv_feeds_env_layer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        ".env",
        "STRATA_DOTENV_TEST__NAME=from-dotenv\nSTRATA_DOTENV_TEST__ROUTER=orders\n",
    );

    let settings = ConfigLoader::new()
        .with_dotenv_file(&path)
        .unwrap()
        .with_env_prefix("STRATA_DOTENV_TEST")
        .load()
        .unwrap();
    assert_eq!(settings.name, "from-dotenv");
    assert_eq!(settings.router.as_deref(), Some("orders"));
}

#[test]
fn test_assembly_failures() {
    let registry = registry();

    let missing = Settings::default();
    assert!(matches!(
        assemble(missing, &registry),
        Err(ConfigError::MissingRouter)
    ));

    let unknown_router = Settings {
        router: Some("billing".into()),
        ..Settings::default()
    };
    assert!(matches!(
        assemble(unknown_router, &registry),
        Err(ConfigError::UnknownComponent { kind: "router", .. })
    ));

    let settings: Settings = toml::from_str(
        r#"
        router = "orders"
        middleware = ["metrics", "auth"]
        "#,
    )
    .unwrap();
    assert!(matches!(
        assemble(settings, &registry),
        Err(ConfigError::UnknownComponent { kind: "middleware", .. })
    ));

    let settings: Settings = toml::from_str(
        r#"
        router = "orders"
        middleware = [{ name = "database", options = { pool = { max_size = 0 } } }]
        "#,
    )
    .unwrap();
    assert!(matches!(
        assemble(settings, &registry),
        Err(ConfigError::InvalidValue { .. })
    ));
}
