//! cubeport-engine: lifecycle reconciliation and proxy provisioning.
//!
//! Reads desired state from `cubeport-state`, drives the container runtime
//! (`cubeport-runtime`) and the reverse proxy (`cubeport-proxy`) into the
//! matching state, and reports merged stored + live views. The engine owns
//! no durable state of its own.
//!
//! # Architecture
//!
//! ```text
//! Engine
//!   ├── StateStore            (workspaces, cubes, proxies)
//!   ├── dyn ContainerRuntime  (start/stop/restart/commit/inspect)
//!   ├── RouteWriter           (<domain>.conf files)
//!   ├── dyn ProxyController   (reload)
//!   ├── ImageCatalog          (committed images)
//!   └── NameLocks             (one mutation per container name at a time)
//! ```
//!
//! # Failure policy
//!
//! - Validation and missing records fail before anything external runs.
//! - Explicit lifecycle actions and proxy provisioning surface runtime and
//!   proxy failures.
//! - Stops issued as part of a delete are best-effort and only logged.
//! - Reads never fail because one container cannot be inspected; that
//!   cube reports `unknown`.

pub mod cubes;
pub mod error;
pub mod locks;
pub mod proxies;
pub mod validate;
pub mod views;
pub mod workspaces;

use std::sync::Arc;

use cubeport_proxy::{ProxyController, RouteWriter};
use cubeport_runtime::ContainerRuntime;
use cubeport_state::{Cube, CubeId, ImageCatalog, Proxy, StateStore};
use tracing::warn;

pub use error::{EngineError, EngineResult, ErrorKind};
pub use locks::NameLocks;
pub use views::*;

/// Default value of the `service=` label put on every managed container.
pub const DEFAULT_SERVICE_LABEL: &str = "cubeport";

/// Coordinates the record store, container runtime and reverse proxy.
pub struct Engine {
    store: StateStore,
    runtime: Arc<dyn ContainerRuntime>,
    routes: RouteWriter,
    proxy: Arc<dyn ProxyController>,
    catalog: Arc<ImageCatalog>,
    locks: NameLocks,
    service_label: String,
}

impl Engine {
    pub fn new(
        store: StateStore,
        runtime: Arc<dyn ContainerRuntime>,
        routes: RouteWriter,
        proxy: Arc<dyn ProxyController>,
        catalog: Arc<ImageCatalog>,
    ) -> Self {
        Self {
            store,
            runtime,
            routes,
            proxy,
            catalog,
            locks: NameLocks::new(),
            service_label: DEFAULT_SERVICE_LABEL.to_string(),
        }
    }

    /// Override the `service=` label value used to mark managed containers.
    pub fn with_service_label(mut self, label: impl Into<String>) -> Self {
        self.service_label = label.into();
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn routes(&self) -> &RouteWriter {
        &self.routes
    }

    fn require_cube(&self, id: CubeId) -> EngineResult<Cube> {
        self.store
            .get_cube(id)?
            .ok_or_else(|| EngineError::NotFound(format!("cube {id}")))
    }

    /// Merge a cube row with its live state.
    async fn view(&self, cube: Cube) -> CubeView {
        match self.runtime.inspect(cube.name()).await {
            Ok(state) => CubeView {
                status: state.status,
                ip_address: state.ip_address.unwrap_or_default(),
                cube,
            },
            Err(e) => {
                warn!(cube = %cube.name(), error = %e, "inspect failed, reporting unknown");
                CubeView {
                    status: UNKNOWN.to_string(),
                    ip_address: UNKNOWN.to_string(),
                    cube,
                }
            }
        }
    }

    /// Best-effort stop used by deletes. Failures are logged.
    async fn stop_quietly(&self, cube: &Cube) {
        let _guard = self.locks.acquire(cube.name()).await;
        if let Err(e) = self.runtime.stop(cube.name()).await {
            warn!(cube = %cube.name(), cube_id = cube.id, error = %e, "stop before delete failed");
        }
    }

    /// Best-effort removal of route files for deleted proxies, followed by
    /// a reload if anything was removed. Returns the number of files removed.
    async fn retire_routes(&self, proxies: &[Proxy]) -> usize {
        let mut removed = 0;
        for proxy in proxies {
            match self.routes.remove_route(&proxy.route.domain) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(proxy_id = proxy.id, domain = %proxy.route.domain, error = %e, "route removal failed");
                }
            }
        }
        if removed > 0 {
            if let Err(e) = self.proxy.reload().await {
                warn!(removed, error = %e, "proxy reload after route removal failed");
            }
        }
        removed
    }
}
