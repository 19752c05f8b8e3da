//! Cube operations.
//!
//! A cube's live state is observed, never stored: `deploy` moves it from
//! absent (or anything) to running, `stop` from running to stopped,
//! `redeploy` restarts an existing container in place. `commit` snapshots
//! the container as an image without changing its state.

use std::collections::HashSet;

use cubeport_state::{
    Cube, CubeId, CubeRemoval, CubeSpec, ImageListing, ImageRecord, WorkspaceId,
};
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::validate;
use crate::views::{CommitOutcome, CubeView, Removal};
use crate::Engine;

impl Engine {
    /// Labels every managed container carries, for live counting.
    fn affiliation_labels(&self, workspace_id: WorkspaceId) -> [String; 2] {
        [
            format!("service={}", self.service_label),
            format!("workspace_id={workspace_id}"),
        ]
    }

    fn with_affiliation(&self, workspace_id: WorkspaceId, mut spec: CubeSpec) -> CubeSpec {
        for label in self.affiliation_labels(workspace_id) {
            if !spec.labels.contains(&label) {
                spec.labels.push(label);
            }
        }
        spec
    }

    /// Store new cubes under a workspace. Nothing is started.
    ///
    /// The batch is all-or-nothing: a bad, duplicated or already-taken name
    /// rejects it without writing any row.
    pub fn add_cubes(
        &self,
        workspace_id: WorkspaceId,
        specs: Vec<CubeSpec>,
    ) -> EngineResult<Vec<CubeId>> {
        if specs.is_empty() {
            return Err(EngineError::Validation("no cubes given".to_string()));
        }
        let mut names = HashSet::new();
        for spec in &specs {
            validate::cube_spec(spec)?;
            if !names.insert(spec.name.as_str()) {
                return Err(EngineError::Validation(format!(
                    "cube name '{}' appears twice in the request",
                    spec.name
                )));
            }
        }
        let specs: Vec<CubeSpec> = specs
            .into_iter()
            .map(|spec| self.with_affiliation(workspace_id, spec))
            .collect();
        let cubes = self.store.insert_cubes(workspace_id, &specs)?;
        for cube in &cubes {
            info!(cube = %cube.name(), cube_id = cube.id, workspace_id, "cube added");
        }
        Ok(cubes.into_iter().map(|cube| cube.id).collect())
    }

    /// One cube with its live status and address.
    pub async fn get_cube(&self, id: CubeId) -> EngineResult<CubeView> {
        let cube = self.require_cube(id)?;
        Ok(self.view(cube).await)
    }

    /// Every cube of a workspace with live status, in creation order.
    /// Containers that cannot be inspected report `unknown`.
    pub async fn list_cubes(&self, workspace_id: WorkspaceId) -> EngineResult<Vec<CubeView>> {
        let cubes = self.store.list_cubes_in_workspace(workspace_id)?;
        Ok(join_all(cubes.into_iter().map(|cube| self.view(cube))).await)
    }

    /// Replace a cube's stored specification. The running container is
    /// untouched until the next deploy.
    pub fn edit_cube(&self, id: CubeId, spec: CubeSpec) -> EngineResult<Cube> {
        validate::cube_spec(&spec)?;
        let current = self.require_cube(id)?;
        let spec = self.with_affiliation(current.workspace_id, spec);
        let cube = self.store.update_cube(id, &spec)?;
        info!(cube = %cube.name(), cube_id = id, "cube edited");
        Ok(cube)
    }

    /// Stop the container (best-effort), then delete the row and its proxies.
    pub async fn delete_cube(&self, id: CubeId) -> EngineResult<Removal> {
        let cube = self.require_cube(id)?;
        self.stop_quietly(&cube).await;

        let CubeRemoval { cube, proxies } = self.store.delete_cube(id)?;
        let routes_removed = self.retire_routes(&proxies).await;
        info!(cube = %cube.name(), cube_id = id, proxies = proxies.len(), "cube deleted");
        Ok(Removal {
            cubes: vec![cube],
            proxies,
            routes_removed,
        })
    }

    /// Create and run the container, replacing any same-named one.
    pub async fn deploy_cube(&self, id: CubeId) -> EngineResult<()> {
        let cube = self.require_cube(id)?;
        self.deploy(&cube).await
    }

    /// Restart the existing container in place.
    pub async fn redeploy_cube(&self, id: CubeId) -> EngineResult<()> {
        let cube = self.require_cube(id)?;
        self.redeploy(&cube).await
    }

    pub async fn stop_cube(&self, id: CubeId) -> EngineResult<()> {
        let cube = self.require_cube(id)?;
        self.stop(&cube).await
    }

    /// Snapshot the container as `image:tag` and record it in the catalog.
    pub async fn commit_cube(&self, id: CubeId, image: &str, tag: &str) -> EngineResult<CommitOutcome> {
        validate::commit_target(image, tag)?;
        let cube = self.require_cube(id)?;
        {
            let _guard = self.locks.acquire(cube.name()).await;
            self.runtime
                .commit(cube.name(), image, tag)
                .await
                .map_err(|e| EngineError::runtime(cube.name(), e))?;
        }
        let catalogued = self.catalog.append(ImageRecord::committed(image, tag))?;
        info!(cube = %cube.name(), image, tag, catalogued, "cube committed");
        Ok(CommitOutcome {
            image: image.to_string(),
            tag: tag.to_string(),
            catalogued,
        })
    }

    /// Images produced by commits.
    pub fn list_images(&self) -> EngineResult<ImageListing> {
        Ok(self.catalog.list()?)
    }

    // ── Per-container actions shared with workspace fan-out ───────

    pub(crate) async fn deploy(&self, cube: &Cube) -> EngineResult<()> {
        let _guard = self.locks.acquire(cube.name()).await;
        self.runtime
            .start(&cube.spec)
            .await
            .map_err(|e| EngineError::runtime(cube.name(), e))?;
        info!(cube = %cube.name(), cube_id = cube.id, "cube deployed");
        Ok(())
    }

    pub(crate) async fn redeploy(&self, cube: &Cube) -> EngineResult<()> {
        let _guard = self.locks.acquire(cube.name()).await;
        self.runtime
            .restart(cube.name())
            .await
            .map_err(|e| EngineError::runtime(cube.name(), e))?;
        info!(cube = %cube.name(), cube_id = cube.id, "cube redeployed");
        Ok(())
    }

    pub(crate) async fn stop(&self, cube: &Cube) -> EngineResult<()> {
        let _guard = self.locks.acquire(cube.name()).await;
        if let Err(e) = self.runtime.stop(cube.name()).await {
            warn!(cube = %cube.name(), error = %e, "stop failed");
            return Err(EngineError::runtime(cube.name(), e));
        }
        info!(cube = %cube.name(), cube_id = cube.id, "cube stopped");
        Ok(())
    }
}
