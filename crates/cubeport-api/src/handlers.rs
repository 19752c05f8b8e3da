//! REST API handlers.
//!
//! Each handler parses its path and body, calls the engine, and wraps the
//! result in the JSON envelope. Engine errors map to a status through
//! [`ErrorKind`].

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use cubeport_engine::{EngineError, ErrorKind};
use cubeport_state::{CubeId, CubeSpec, ProxyId, ProxyRoute, WorkspaceId};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_error(err: EngineError) -> axum::response::Response {
    error_response(&err.to_string(), status_for(err.kind())).into_response()
}

fn cube_done(id: CubeId, status: &str) -> serde_json::Value {
    serde_json::json!({ "cube_id": id, "status": status })
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Workspaces ─────────────────────────────────────────────────

/// Create / edit workspace body.
#[derive(serde::Deserialize)]
pub struct WorkspaceRequest {
    pub name: String,
    #[serde(default)]
    pub desc: String,
}

/// GET /api/v1/workspaces
pub async fn list_workspaces(State(state): State<ApiState>) -> impl IntoResponse {
    match state.engine.list_workspaces().await {
        Ok(overview) => ApiResponse::ok(overview).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /api/v1/workspaces
pub async fn create_workspace(
    State(state): State<ApiState>,
    Json(req): Json<WorkspaceRequest>,
) -> impl IntoResponse {
    match state.engine.create_workspace(&req.name, &req.desc) {
        Ok(workspace) => (StatusCode::CREATED, ApiResponse::ok(workspace)).into_response(),
        Err(e) => engine_error(e),
    }
}

/// PUT /api/v1/workspaces/:id
pub async fn edit_workspace(
    State(state): State<ApiState>,
    Path(id): Path<WorkspaceId>,
    Json(req): Json<WorkspaceRequest>,
) -> impl IntoResponse {
    match state.engine.edit_workspace(id, &req.name, &req.desc) {
        Ok(workspace) => ApiResponse::ok(workspace).into_response(),
        Err(e) => engine_error(e),
    }
}

/// DELETE /api/v1/workspaces/:id
pub async fn delete_workspace(
    State(state): State<ApiState>,
    Path(id): Path<WorkspaceId>,
) -> impl IntoResponse {
    match state.engine.delete_workspace(id).await {
        Ok(removal) => ApiResponse::ok(removal).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /api/v1/workspaces/:id/deploy
pub async fn deploy_workspace(
    State(state): State<ApiState>,
    Path(id): Path<WorkspaceId>,
) -> impl IntoResponse {
    match state.engine.deploy_workspace(id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /api/v1/workspaces/:id/redeploy
pub async fn redeploy_workspace(
    State(state): State<ApiState>,
    Path(id): Path<WorkspaceId>,
) -> impl IntoResponse {
    match state.engine.redeploy_workspace(id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /api/v1/workspaces/:id/stop
pub async fn stop_workspace(
    State(state): State<ApiState>,
    Path(id): Path<WorkspaceId>,
) -> impl IntoResponse {
    match state.engine.stop_workspace(id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => engine_error(e),
    }
}

// ── Cubes ──────────────────────────────────────────────────────

/// Add cubes body.
#[derive(serde::Deserialize)]
pub struct AddCubesRequest {
    pub cubes: Vec<CubeSpec>,
}

/// GET /api/v1/workspaces/:id/cubes
pub async fn list_cubes(
    State(state): State<ApiState>,
    Path(id): Path<WorkspaceId>,
) -> impl IntoResponse {
    match state.engine.list_cubes(id).await {
        Ok(cubes) => ApiResponse::ok(cubes).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /api/v1/workspaces/:id/cubes
pub async fn add_cubes(
    State(state): State<ApiState>,
    Path(id): Path<WorkspaceId>,
    Json(req): Json<AddCubesRequest>,
) -> impl IntoResponse {
    match state.engine.add_cubes(id, req.cubes) {
        Ok(ids) => (StatusCode::CREATED, ApiResponse::ok(serde_json::json!({ "ids": ids })))
            .into_response(),
        Err(e) => engine_error(e),
    }
}

/// GET /api/v1/cubes/:id
pub async fn get_cube(State(state): State<ApiState>, Path(id): Path<CubeId>) -> impl IntoResponse {
    match state.engine.get_cube(id).await {
        Ok(view) => ApiResponse::ok(view).into_response(),
        Err(e) => engine_error(e),
    }
}

/// PUT /api/v1/cubes/:id
pub async fn edit_cube(
    State(state): State<ApiState>,
    Path(id): Path<CubeId>,
    Json(spec): Json<CubeSpec>,
) -> impl IntoResponse {
    match state.engine.edit_cube(id, spec) {
        Ok(cube) => ApiResponse::ok(cube).into_response(),
        Err(e) => engine_error(e),
    }
}

/// DELETE /api/v1/cubes/:id
pub async fn delete_cube(
    State(state): State<ApiState>,
    Path(id): Path<CubeId>,
) -> impl IntoResponse {
    match state.engine.delete_cube(id).await {
        Ok(removal) => ApiResponse::ok(removal).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /api/v1/cubes/:id/deploy
pub async fn deploy_cube(
    State(state): State<ApiState>,
    Path(id): Path<CubeId>,
) -> impl IntoResponse {
    match state.engine.deploy_cube(id).await {
        Ok(()) => ApiResponse::ok(cube_done(id, "deployed")).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /api/v1/cubes/:id/redeploy
pub async fn redeploy_cube(
    State(state): State<ApiState>,
    Path(id): Path<CubeId>,
) -> impl IntoResponse {
    match state.engine.redeploy_cube(id).await {
        Ok(()) => ApiResponse::ok(cube_done(id, "redeployed")).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /api/v1/cubes/:id/stop
pub async fn stop_cube(State(state): State<ApiState>, Path(id): Path<CubeId>) -> impl IntoResponse {
    match state.engine.stop_cube(id).await {
        Ok(()) => ApiResponse::ok(cube_done(id, "stopped")).into_response(),
        Err(e) => engine_error(e),
    }
}

/// Commit body.
#[derive(serde::Deserialize)]
pub struct CommitRequest {
    pub image: String,
    pub tag: String,
}

/// POST /api/v1/cubes/:id/commit
pub async fn commit_cube(
    State(state): State<ApiState>,
    Path(id): Path<CubeId>,
    Json(req): Json<CommitRequest>,
) -> impl IntoResponse {
    match state.engine.commit_cube(id, &req.image, &req.tag).await {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e) => engine_error(e),
    }
}

// ── Proxies ────────────────────────────────────────────────────

/// GET /api/v1/cubes/:id/proxies
pub async fn list_proxies(
    State(state): State<ApiState>,
    Path(id): Path<CubeId>,
) -> impl IntoResponse {
    match state.engine.list_proxies(id) {
        Ok(proxies) => ApiResponse::ok(proxies).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /api/v1/cubes/:id/proxies
///
/// `201` for a new proxy, `200` when the domain was already routed.
pub async fn add_proxy(
    State(state): State<ApiState>,
    Path(id): Path<CubeId>,
    Json(route): Json<ProxyRoute>,
) -> impl IntoResponse {
    match state.engine.add_proxy(id, &route) {
        Ok(insert) if insert.created => {
            (StatusCode::CREATED, ApiResponse::ok(insert.proxy)).into_response()
        }
        Ok(insert) => ApiResponse::ok(insert.proxy).into_response(),
        Err(e) => engine_error(e),
    }
}

/// DELETE /api/v1/cubes/:id/proxies
pub async fn delete_proxies(
    State(state): State<ApiState>,
    Path(id): Path<CubeId>,
) -> impl IntoResponse {
    match state.engine.delete_proxies(id).await {
        Ok(proxies) => ApiResponse::ok(proxies).into_response(),
        Err(e) => engine_error(e),
    }
}

/// GET /api/v1/proxies/:id
pub async fn get_proxy(
    State(state): State<ApiState>,
    Path(id): Path<ProxyId>,
) -> impl IntoResponse {
    match state.engine.get_proxy(id) {
        Ok(proxy) => ApiResponse::ok(proxy).into_response(),
        Err(e) => engine_error(e),
    }
}

/// PUT /api/v1/proxies/:id
pub async fn edit_proxy(
    State(state): State<ApiState>,
    Path(id): Path<ProxyId>,
    Json(route): Json<ProxyRoute>,
) -> impl IntoResponse {
    match state.engine.edit_proxy(id, &route).await {
        Ok(proxy) => ApiResponse::ok(proxy).into_response(),
        Err(e) => engine_error(e),
    }
}

/// DELETE /api/v1/proxies/:id
pub async fn delete_proxy(
    State(state): State<ApiState>,
    Path(id): Path<ProxyId>,
) -> impl IntoResponse {
    match state.engine.delete_proxy(id).await {
        Ok(proxy) => ApiResponse::ok(proxy).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /api/v1/proxies/:id/start
pub async fn start_proxy(
    State(state): State<ApiState>,
    Path(id): Path<ProxyId>,
) -> impl IntoResponse {
    match state.engine.start_proxy(id).await {
        Ok(started) => ApiResponse::ok(started).into_response(),
        Err(e) => engine_error(e),
    }
}

// ── Images ─────────────────────────────────────────────────────

/// GET /api/v1/images
pub async fn list_images(State(state): State<ApiState>) -> impl IntoResponse {
    match state.engine.list_images() {
        Ok(listing) => ApiResponse::ok(listing).into_response(),
        Err(e) => engine_error(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cubeport_engine::Engine;
    use cubeport_proxy::{RecordingController, RouteWriter};
    use cubeport_runtime::FakeRuntime;
    use cubeport_state::{ImageCatalog, StateStore};

    use super::*;
    use crate::LogBroadcaster;

    fn test_state() -> (ApiState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            StateStore::open_in_memory().unwrap(),
            Arc::new(FakeRuntime::new()),
            RouteWriter::new(dir.path().join("proxy"), 80),
            Arc::new(RecordingController::new()),
            Arc::new(ImageCatalog::new(dir.path().join("images.json"))),
        );
        let state = ApiState {
            engine: Arc::new(engine),
            logs: LogBroadcaster::new(),
        };
        (state, dir)
    }

    fn web() -> CubeSpec {
        CubeSpec {
            name: "web".to_string(),
            image: "nginx:latest".to_string(),
            ports: vec!["8081:80".to_string()],
            ..CubeSpec::default()
        }
    }

    fn workspace(name: &str) -> Json<WorkspaceRequest> {
        Json(WorkspaceRequest {
            name: name.to_string(),
            desc: String::new(),
        })
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn list_workspaces_empty() {
        let (state, _dir) = test_state();
        let resp = list_workspaces(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_workspace_then_duplicate_conflicts() {
        let (state, _dir) = test_state();
        let resp = create_workspace(State(state.clone()), workspace("demo"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = create_workspace(State(state), workspace("demo"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn blank_workspace_name_is_bad_request() {
        let (state, _dir) = test_state();
        let resp = create_workspace(State(state), workspace(" ")).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_nonexistent_cube() {
        let (state, _dir) = test_state();
        let resp = get_cube(State(state), Path(42)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn add_and_deploy_cube() {
        let (state, _dir) = test_state();
        let ws = state.engine.create_workspace("demo", "").unwrap();

        let req = AddCubesRequest { cubes: vec![web()] };
        let resp = add_cubes(State(state.clone()), Path(ws.id), Json(req))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let id = state.engine.list_cubes(ws.id).await.unwrap()[0].cube.id;
        let resp = deploy_cube(State(state.clone()), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.engine.get_cube(id).await.unwrap().status, "running");
    }

    #[tokio::test]
    async fn add_proxy_reports_created_then_existing() {
        let (state, _dir) = test_state();
        let ws = state.engine.create_workspace("demo", "").unwrap();
        let id = state.engine.add_cubes(ws.id, vec![web()]).unwrap()[0];
        let route = || {
            Json(ProxyRoute {
                domain: "demo.local".to_string(),
                port: 80,
                route_type: "http".to_string(),
                is_default: false,
            })
        };

        let resp = add_proxy(State(state.clone()), Path(id), route()).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = add_proxy(State(state), Path(id), route()).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_proxy_on_undeployed_cube_is_not_found() {
        let (state, _dir) = test_state();
        let ws = state.engine.create_workspace("demo", "").unwrap();
        let id = state.engine.add_cubes(ws.id, vec![web()]).unwrap()[0];
        let route = ProxyRoute {
            domain: "demo.local".to_string(),
            port: 80,
            route_type: "http".to_string(),
            is_default: false,
        };
        let proxy = state.engine.add_proxy(id, &route).unwrap().proxy;

        let resp = start_proxy(State(state), Path(proxy.id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn commit_with_blank_tag_is_bad_request() {
        let (state, _dir) = test_state();
        let ws = state.engine.create_workspace("demo", "").unwrap();
        let id = state.engine.add_cubes(ws.id, vec![web()]).unwrap()[0];
        let req = CommitRequest {
            image: "snap".to_string(),
            tag: String::new(),
        };
        let resp = commit_cube(State(state), Path(id), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_images_empty_catalog() {
        let (state, _dir) = test_state();
        let resp = list_images(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
