//! Router-level regression tests.
//!
//! Drives the full REST surface over an in-memory store, a fake container
//! runtime and a recording proxy controller.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cubeport_api::{ApiState, LogBroadcaster, build_router};
use cubeport_engine::Engine;
use cubeport_proxy::{RecordingController, RouteWriter};
use cubeport_runtime::FakeRuntime;
use cubeport_state::{ImageCatalog, StateStore};
use serde_json::{Value, json};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    runtime: Arc<FakeRuntime>,
    proxy: Arc<RecordingController>,
    dir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let proxy = Arc::new(RecordingController::new());
    let engine = Engine::new(
        StateStore::open_in_memory().unwrap(),
        runtime.clone(),
        RouteWriter::new(dir.path().join("proxy"), 80),
        proxy.clone(),
        Arc::new(ImageCatalog::new(dir.path().join("images.json"))),
    );
    let router = build_router(ApiState {
        engine: Arc::new(engine),
        logs: LogBroadcaster::new(),
    });
    TestApp {
        router,
        runtime,
        proxy,
        dir,
    }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_demo_with_web(app: &TestApp) -> (u64, u64) {
    let (status, body) = call(
        &app.router,
        "POST",
        "/api/v1/workspaces",
        Some(json!({ "name": "demo", "desc": "demo workspace" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let ws = body["data"]["id"].as_u64().unwrap();

    let (status, body) = call(
        &app.router,
        "POST",
        &format!("/api/v1/workspaces/{ws}/cubes"),
        Some(json!({ "cubes": [{ "name": "web", "image": "nginx:latest", "ports": ["8081:80"] }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let cube = body["data"]["ids"][0].as_u64().unwrap();
    (ws, cube)
}

#[tokio::test]
async fn healthz_is_ok() {
    let app = test_app();
    let (status, body) = call(&app.router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn demo_scenario_end_to_end() {
    let app = test_app();
    let (_ws, cube) = create_demo_with_web(&app).await;

    let (status, _) = call(&app.router, "POST", &format!("/api/v1/cubes/{cube}/deploy"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app.router, "GET", &format!("/api/v1/cubes/{cube}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "running");
    let ip = body["data"]["ip_address"].as_str().unwrap().to_string();
    assert!(ip.starts_with("172.17.0."));

    let (status, body) = call(
        &app.router,
        "POST",
        &format!("/api/v1/cubes/{cube}/proxies"),
        Some(json!({ "domain": "demo.local", "port": 80 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["type"], "http");
    let proxy = body["data"]["id"].as_u64().unwrap();

    let (status, body) = call(&app.router, "POST", &format!("/api/v1/proxies/{proxy}/start"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["upstream"], format!("{ip}:80"));

    let conf = std::fs::read_to_string(app.dir.path().join("proxy/demo.local.conf")).unwrap();
    assert!(conf.contains(&format!("proxy_pass http://{ip}:80;")));
    assert_eq!(app.proxy.reloads(), 1);
}

#[tokio::test]
async fn duplicate_proxy_domain_returns_existing() {
    let app = test_app();
    let (_ws, cube) = create_demo_with_web(&app).await;
    let uri = format!("/api/v1/cubes/{cube}/proxies");
    let route = json!({ "domain": "demo.local", "port": 80 });

    let (status, first) = call(&app.router, "POST", &uri, Some(route.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, second) = call(&app.router, "POST", &uri, Some(route)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["id"], second["data"]["id"]);

    let (_, listed) = call(&app.router, "GET", &uri, None).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn workspace_overview_and_cascade_delete() {
    let app = test_app();
    let (ws, _cube) = create_demo_with_web(&app).await;

    let (status, _) = call(&app.router, "POST", &format!("/api/v1/workspaces/{ws}/deploy"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app.router, "GET", "/api/v1/workspaces", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_workspaces"], 1);
    assert_eq!(body["data"]["total_cubes"], 1);
    assert_eq!(body["data"]["total_running_cubes"], 1);
    assert_eq!(body["data"]["workspaces"][0]["desc"], "demo workspace");

    let (status, body) = call(&app.router, "DELETE", &format!("/api/v1/workspaces/{ws}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cubes"].as_array().unwrap().len(), 1);
    assert!(app.runtime.calls().contains(&"stop web".to_string()));

    let (_, body) = call(&app.router, "GET", &format!("/api/v1/workspaces/{ws}/cubes"), None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
    let (_, body) = call(&app.router, "GET", "/api/v1/workspaces", None).await;
    assert_eq!(body["data"]["total_workspaces"], 0);
}

#[tokio::test]
async fn out_of_band_removal_lists_as_unknown() {
    let app = test_app();
    let (ws, cube) = create_demo_with_web(&app).await;
    call(&app.router, "POST", &format!("/api/v1/cubes/{cube}/deploy"), None).await;
    app.runtime.remove_out_of_band("web");

    let (status, body) = call(&app.router, "GET", &format!("/api/v1/workspaces/{ws}/cubes"), None).await;
    assert_eq!(status, StatusCode::OK);
    let cubes = body["data"].as_array().unwrap();
    assert_eq!(cubes.len(), 1);
    assert_eq!(cubes[0]["name"], "web");
    assert_eq!(cubes[0]["status"], "unknown");
}

#[tokio::test]
async fn commit_appends_catalog_once() {
    let app = test_app();
    let (_ws, cube) = create_demo_with_web(&app).await;
    call(&app.router, "POST", &format!("/api/v1/cubes/{cube}/deploy"), None).await;

    let uri = format!("/api/v1/cubes/{cube}/commit");
    let target = json!({ "image": "snapshots/web", "tag": "v1" });
    let (status, body) = call(&app.router, "POST", &uri, Some(target.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["catalogued"], true);
    let (_, body) = call(&app.router, "POST", &uri, Some(target)).await;
    assert_eq!(body["data"]["catalogued"], false);

    let (status, body) = call(&app.router, "GET", "/api/v1/images", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_custom_images"], 1);
    assert_eq!(body["data"]["custom_images"][0]["image"], "snapshots/web");
}

#[tokio::test]
async fn errors_carry_envelope_and_status() {
    let app = test_app();

    let (status, body) = call(&app.router, "GET", "/api/v1/cubes/77", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("77"));

    let (status, _) = call(
        &app.router,
        "POST",
        "/api/v1/workspaces",
        Some(json!({ "name": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_ws, cube) = create_demo_with_web(&app).await;
    let (status, body) = call(
        &app.router,
        "POST",
        &format!("/api/v1/cubes/{cube}/proxies"),
        Some(json!({ "domain": "demo.local", "port": 80 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let proxy = body["data"]["id"].as_u64().unwrap();

    // Never deployed, so there is no container to route to.
    let (status, _) = call(&app.router, "POST", &format!("/api/v1/proxies/{proxy}/start"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.proxy.set_fail_reload(true);
    call(&app.router, "POST", &format!("/api/v1/cubes/{cube}/deploy"), None).await;
    let (status, body) = call(&app.router, "POST", &format!("/api/v1/proxies/{proxy}/start"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("demo.local.conf"));
}

#[tokio::test]
async fn edit_cube_then_redeploy_and_stop() {
    let app = test_app();
    let (_ws, cube) = create_demo_with_web(&app).await;

    let (status, body) = call(
        &app.router,
        "PUT",
        &format!("/api/v1/cubes/{cube}"),
        Some(json!({
            "name": "web",
            "image": "nginx:1.27",
            "ports": ["8082:80"],
            "environment_vars": ["MODE=a,b:c"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["image"], "nginx:1.27");
    assert_eq!(body["data"]["environment_vars"][0], "MODE=a,b:c");

    call(&app.router, "POST", &format!("/api/v1/cubes/{cube}/deploy"), None).await;
    let (status, _) = call(&app.router, "POST", &format!("/api/v1/cubes/{cube}/redeploy"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app.router, "POST", &format!("/api/v1/cubes/{cube}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!app.runtime.is_running("web"));
}

#[tokio::test]
async fn cors_headers_and_preflight() {
    let app = test_app();

    let preflight = Request::builder()
        .method("OPTIONS")
        .uri("/api/v1/workspaces")
        .header("origin", "http://dashboard.local")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(preflight).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    assert!(
        resp.headers()["access-control-allow-methods"]
            .to_str()
            .unwrap()
            .contains("DELETE")
    );

    let get = Request::builder()
        .uri("/api/v1/workspaces")
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(get).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    assert_eq!(
        resp.headers()["access-control-allow-headers"],
        "Content-Type, Authorization"
    );
}
