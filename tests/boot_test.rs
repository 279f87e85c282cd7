//! End-to-end boot of the built-in modules

use modhost::config::{AppConfig, ConfigLoader};
use modhost::infrastructure::{BootPhase, ModuleStatus, ServiceLifetime};
use modhost::modules::health::Clock;
use modhost::modules::todo::{TodoController, TodoService, WELCOME_TITLE};
use modhost::persistence::Database;
use modhost::web::{server, Method, Request};
use modhost::{AppError, Application};
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn boot() -> Application {
    Application::boot(AppConfig::default()).expect("default boot succeeds")
}

#[test]
fn test_default_boot_reaches_running() {
    let app = boot();

    assert_eq!(app.orchestrator().phase(), BootPhase::Running);
    assert_eq!(app.orchestrator().registry().names(), vec!["health", "todo"]);
    for (_, status) in app.orchestrator().registry().statuses() {
        assert_eq!(status, ModuleStatus::Routed);
    }

    let report = app.migration_report();
    assert_eq!(report.schema.created, vec!["todos".to_string()]);
    let seeds = report.seeds.as_ref().unwrap();
    assert_eq!(seeds.succeeded, vec!["todo/welcome".to_string()]);
    assert!(seeds.failed.is_empty());
}

#[test]
fn test_module_services_are_wired_through_the_container() {
    let app = boot();
    let container = app.container();

    assert_eq!(container.lifetime_of::<Clock>(), Some(ServiceLifetime::Singleton));
    assert_eq!(
        container.lifetime_of::<TodoController>(),
        Some(ServiceLifetime::Transient)
    );
    assert!(Arc::ptr_eq(
        &container.resolve::<TodoService>(),
        &container.resolve::<TodoService>()
    ));
    assert!(container.resolve::<Database>().has_table("todos"));
}

#[test]
fn test_todo_endpoints_end_to_end() {
    let app = boot();
    let routes = app.routes();

    let listed = routes.dispatch(Request::new(Method::GET, "/api/todos"));
    assert_eq!(listed.status, 200);
    assert_eq!(listed.body["total"], 1);
    assert_eq!(listed.body["items"][0]["title"], WELCOME_TITLE);

    let created = routes.dispatch(
        Request::new(Method::POST, "/api/todos")
            .with_json(&json!({ "title": "Read the docs", "notes": "chapter 1" })),
    );
    assert_eq!(created.status, 201);
    assert_eq!(created.body["id"], 2);

    let updated = routes.dispatch(
        Request::new(Method::PUT, "/api/todos/2").with_json(&json!({ "completed": true })),
    );
    assert_eq!(updated.status, 200);
    assert_eq!(updated.body["completed"], true);
    assert_eq!(updated.body["notes"], "chapter 1");

    let page = routes.dispatch(
        Request::new(Method::GET, "/api/todos")
            .with_query_param("page", "2")
            .with_query_param("page_size", "1"),
    );
    assert_eq!(page.body["page"], 2);
    assert_eq!(page.body["total_pages"], 2);
    assert_eq!(page.body["items"][0]["id"], 2);

    assert_eq!(
        routes
            .dispatch(Request::new(Method::DELETE, "/api/todos/2"))
            .status,
        204
    );
    assert_eq!(
        routes
            .dispatch(Request::new(Method::DELETE, "/api/todos/2"))
            .status,
        404
    );
}

#[test]
fn test_config_file_drives_boot() {
    let base = TempDir::new().unwrap();
    let dir = base.path().join("modhost");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.toml");
    fs::write(
        &path,
        r#"
[database]
name = "e2e"
seed = false

[modules]
disabled = ["todo"]
"#,
    )
    .unwrap();

    let config = ConfigLoader::with_file(path).load_config().unwrap();
    let app = Application::boot(config).unwrap();

    assert_eq!(
        app.orchestrator().registry().status("todo"),
        Some(ModuleStatus::Disabled)
    );
    assert!(app.migration_report().seeds.is_none());
    assert_eq!(app.routes().len(), 1);

    let health = app.routes().dispatch(Request::new(Method::GET, "/health"));
    assert_eq!(health.body["database"], "e2e");
    assert_eq!(
        app.routes()
            .dispatch(Request::new(Method::GET, "/api/todos"))
            .status,
        404
    );
}

#[test]
fn test_boot_errors_surface_as_app_errors() {
    let mut config = AppConfig::default();
    config.modules.disabled = vec!["health".to_string()];
    // No other module depends on health.
    assert!(Application::boot(config).is_ok());

    let duplicate = modhost::infrastructure::ModuleCatalog::new()
        .with(|| Box::new(modhost::modules::health::HealthModule::new()))
        .with(|| Box::new(modhost::modules::health::HealthModule::new()));
    let err = Application::boot_with(AppConfig::default(), &duplicate).err().unwrap();
    assert!(matches!(err, AppError::Boot(_)));
}

#[tokio::test]
async fn test_http_surface_serves_route_table() {
    let app = boot();
    let filter = server::filter(app.routes());

    let response = warp::test::request()
        .method("GET")
        .path("/health")
        .reply(&filter)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["status"], "ok");

    let response = warp::test::request()
        .method("POST")
        .path("/api/todos")
        .body(r#"{"title":"via http"}"#)
        .reply(&filter)
        .await;
    assert_eq!(response.status(), 201);

    let response = warp::test::request()
        .method("GET")
        .path("/api/todos?page_size=1")
        .reply(&filter)
        .await;
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}
