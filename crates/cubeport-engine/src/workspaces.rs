//! Workspace operations and workspace-wide lifecycle fan-out.

use cubeport_state::{Cube, Workspace, WorkspaceId};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::validate;
use crate::views::{FanOutReport, Removal, WorkspaceOverview, WorkspaceSummary};
use crate::Engine;

#[derive(Debug, Clone, Copy)]
enum Action {
    Deploy,
    Redeploy,
    Stop,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Deploy => "deploy",
            Action::Redeploy => "redeploy",
            Action::Stop => "stop",
        }
    }
}

impl Engine {
    pub fn create_workspace(&self, name: &str, description: &str) -> EngineResult<Workspace> {
        validate::workspace_name(name)?;
        let workspace = self.store.create_workspace(name.trim(), description)?;
        info!(workspace_id = workspace.id, name = %workspace.name, "workspace created");
        Ok(workspace)
    }

    pub fn get_workspace(&self, id: WorkspaceId) -> EngineResult<Workspace> {
        self.store
            .get_workspace(id)?
            .ok_or_else(|| EngineError::NotFound(format!("workspace {id}")))
    }

    /// All workspaces with stored and live counts.
    ///
    /// Live counts come from container labels; if the runtime cannot be
    /// queried they are reported as absent rather than failing the list.
    pub async fn list_workspaces(&self) -> EngineResult<WorkspaceOverview> {
        let workspaces = self.store.list_workspaces()?;
        let mut summaries = Vec::with_capacity(workspaces.len());
        for workspace in workspaces {
            let cube_count = self.store.count_cubes_in_workspace(workspace.id)?;
            let id = workspace.id.to_string();
            let running = match self.runtime.count_by_label("workspace_id", &id).await {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!(workspace_id = workspace.id, error = %e, "running count unavailable");
                    None
                }
            };
            summaries.push(WorkspaceSummary::new(workspace, cube_count, running));
        }

        let total_running_cubes = match self
            .runtime
            .count_by_label("service", &self.service_label)
            .await
        {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "total running count unavailable");
                None
            }
        };

        Ok(WorkspaceOverview {
            total_workspaces: self.store.count_workspaces()?,
            total_cubes: self.store.count_cubes_total()?,
            total_running_cubes,
            workspaces: summaries,
        })
    }

    pub fn edit_workspace(
        &self,
        id: WorkspaceId,
        name: &str,
        description: &str,
    ) -> EngineResult<Workspace> {
        validate::workspace_name(name)?;
        let workspace = self.store.edit_workspace(id, name.trim(), description)?;
        info!(workspace_id = id, name = %workspace.name, "workspace edited");
        Ok(workspace)
    }

    /// Stop every member container (best-effort), then remove the
    /// workspace, its cubes and their proxies in one store transaction.
    pub async fn delete_workspace(&self, id: WorkspaceId) -> EngineResult<Removal> {
        self.get_workspace(id)?;
        for cube in self.store.list_cubes_in_workspace(id)? {
            self.stop_quietly(&cube).await;
        }

        let removal = self.store.delete_workspace(id)?;
        let routes_removed = self.retire_routes(&removal.proxies).await;
        info!(
            workspace_id = id,
            name = %removal.workspace.name,
            cubes = removal.cubes.len(),
            "workspace deleted"
        );
        Ok(Removal {
            cubes: removal.cubes,
            proxies: removal.proxies,
            routes_removed,
        })
    }

    /// Deploy every cube, in creation order. Stops at the first failure.
    pub async fn deploy_workspace(&self, id: WorkspaceId) -> EngineResult<FanOutReport> {
        self.fan_out(id, Action::Deploy).await
    }

    /// Restart every cube, in creation order. Stops at the first failure.
    pub async fn redeploy_workspace(&self, id: WorkspaceId) -> EngineResult<FanOutReport> {
        self.fan_out(id, Action::Redeploy).await
    }

    /// Stop every cube, in creation order. Stops at the first failure.
    pub async fn stop_workspace(&self, id: WorkspaceId) -> EngineResult<FanOutReport> {
        self.fan_out(id, Action::Stop).await
    }

    async fn fan_out(&self, id: WorkspaceId, action: Action) -> EngineResult<FanOutReport> {
        self.get_workspace(id)?;
        let cubes = self.store.list_cubes_in_workspace(id)?;

        let mut done = Vec::with_capacity(cubes.len());
        for cube in &cubes {
            if let Err(source) = self.apply(cube, action).await {
                warn!(
                    workspace_id = id,
                    cube = %cube.name(),
                    action = action.as_str(),
                    completed = done.len(),
                    "workspace action aborted"
                );
                return Err(EngineError::WorkspaceAborted {
                    workspace_id: id,
                    cube: cube.name().to_string(),
                    completed: done.len(),
                    source: Box::new(source),
                });
            }
            done.push(cube.name().to_string());
        }

        info!(workspace_id = id, action = action.as_str(), cubes = done.len(), "workspace action complete");
        Ok(FanOutReport {
            workspace_id: id,
            action: action.as_str(),
            cubes: done,
        })
    }

    async fn apply(&self, cube: &Cube, action: Action) -> EngineResult<()> {
        match action {
            Action::Deploy => self.deploy(cube).await,
            Action::Redeploy => self.redeploy(cube).await,
            Action::Stop => self.stop(cube).await,
        }
    }
}
