//! cubeport-api: REST API for Cubeport.
//!
//! Provides axum route handlers over the reconciliation engine, plus a
//! server-sent stream of daemon log lines.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/workspaces` | Overview of all workspaces |
//! | POST | `/api/v1/workspaces` | Create a workspace |
//! | PUT | `/api/v1/workspaces/:id` | Rename / re-describe a workspace |
//! | DELETE | `/api/v1/workspaces/:id` | Delete a workspace and everything in it |
//! | GET | `/api/v1/workspaces/:id/cubes` | List cubes with live status |
//! | POST | `/api/v1/workspaces/:id/cubes` | Add cubes |
//! | POST | `/api/v1/workspaces/:id/deploy` | Deploy every cube |
//! | POST | `/api/v1/workspaces/:id/redeploy` | Restart every cube |
//! | POST | `/api/v1/workspaces/:id/stop` | Stop every cube |
//! | GET | `/api/v1/cubes/:id` | Cube with live status |
//! | PUT | `/api/v1/cubes/:id` | Replace a cube's spec |
//! | DELETE | `/api/v1/cubes/:id` | Delete a cube |
//! | POST | `/api/v1/cubes/:id/deploy` | (Re)create the container |
//! | POST | `/api/v1/cubes/:id/redeploy` | Restart the container |
//! | POST | `/api/v1/cubes/:id/stop` | Stop the container |
//! | POST | `/api/v1/cubes/:id/commit` | Snapshot the container into an image |
//! | GET | `/api/v1/cubes/:id/proxies` | List a cube's proxies |
//! | POST | `/api/v1/cubes/:id/proxies` | Add a proxy (idempotent on domain) |
//! | DELETE | `/api/v1/cubes/:id/proxies` | Delete all of a cube's proxies |
//! | GET | `/api/v1/proxies/:id` | Get a proxy |
//! | PUT | `/api/v1/proxies/:id` | Edit a proxy |
//! | DELETE | `/api/v1/proxies/:id` | Delete a proxy |
//! | POST | `/api/v1/proxies/:id/start` | Write the route and reload the proxy |
//! | GET | `/api/v1/images` | Committed image catalog |
//! | GET | `/api/v1/logs/stream` | Log lines as server-sent events |
//! | GET | `/healthz` | Liveness |
//!
//! Every response carries permissive CORS headers, and `OPTIONS` preflights
//! are answered without reaching a handler.

pub mod cors;
pub mod handlers;
pub mod logs;

use std::sync::Arc;

use axum::{Router, middleware};
use axum::routing::{get, post, put};
use cubeport_engine::Engine;

pub use logs::{BroadcastLayer, LogBroadcaster};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub logs: LogBroadcaster,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/workspaces", get(handlers::list_workspaces).post(handlers::create_workspace))
        .route("/workspaces/{id}", put(handlers::edit_workspace).delete(handlers::delete_workspace))
        .route("/workspaces/{id}/cubes", get(handlers::list_cubes).post(handlers::add_cubes))
        .route("/workspaces/{id}/deploy", post(handlers::deploy_workspace))
        .route("/workspaces/{id}/redeploy", post(handlers::redeploy_workspace))
        .route("/workspaces/{id}/stop", post(handlers::stop_workspace))
        .route(
            "/cubes/{id}",
            get(handlers::get_cube).put(handlers::edit_cube).delete(handlers::delete_cube),
        )
        .route("/cubes/{id}/deploy", post(handlers::deploy_cube))
        .route("/cubes/{id}/redeploy", post(handlers::redeploy_cube))
        .route("/cubes/{id}/stop", post(handlers::stop_cube))
        .route("/cubes/{id}/commit", post(handlers::commit_cube))
        .route(
            "/cubes/{id}/proxies",
            get(handlers::list_proxies)
                .post(handlers::add_proxy)
                .delete(handlers::delete_proxies),
        )
        .route(
            "/proxies/{id}",
            get(handlers::get_proxy).put(handlers::edit_proxy).delete(handlers::delete_proxy),
        )
        .route("/proxies/{id}/start", post(handlers::start_proxy))
        .route("/images", get(handlers::list_images))
        .route("/logs/stream", get(logs::stream_logs))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .layer(middleware::from_fn(cors::allow_any_origin))
}
