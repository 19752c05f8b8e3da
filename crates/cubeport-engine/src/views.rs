//! Merged (stored + live) views returned by engine operations.

use std::path::PathBuf;

use cubeport_state::{Cube, Proxy, ProxyId, Workspace, WorkspaceId};
use serde::Serialize;

/// Reported for status and address when the runtime cannot be queried.
pub const UNKNOWN: &str = "unknown";

/// A cube row with its live status and address.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CubeView {
    #[serde(flatten)]
    pub cube: Cube,
    pub status: String,
    /// Empty when the container has no address, `unknown` when it could
    /// not be inspected.
    pub ip_address: String,
}

/// One workspace in the overview listing.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkspaceSummary {
    pub id: WorkspaceId,
    pub name: String,
    pub desc: String,
    /// Stored counter.
    pub total_containers: u64,
    /// Cube rows actually present.
    pub cube_count: u64,
    /// Live count; `None` when the runtime could not be queried.
    pub running_containers: Option<u64>,
    pub created_at: u64,
}

impl WorkspaceSummary {
    pub(crate) fn new(workspace: Workspace, cube_count: u64, running: Option<u64>) -> Self {
        Self {
            id: workspace.id,
            name: workspace.name,
            desc: workspace.description,
            total_containers: workspace.total_containers,
            cube_count,
            running_containers: running,
            created_at: workspace.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkspaceOverview {
    pub total_workspaces: u64,
    pub total_cubes: u64,
    /// `None` when the runtime could not be queried.
    pub total_running_cubes: Option<u64>,
    pub workspaces: Vec<WorkspaceSummary>,
}

/// Result of a workspace-wide lifecycle action.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FanOutReport {
    pub workspace_id: WorkspaceId,
    pub action: &'static str,
    /// Cube names acted on, in order.
    pub cubes: Vec<String>,
}

/// Result of provisioning a proxy into the live proxy.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProxyStart {
    pub proxy_id: ProxyId,
    pub domain: String,
    pub upstream: String,
    pub route_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommitOutcome {
    pub image: String,
    pub tag: String,
    /// False when the catalog already listed this image and tag.
    pub catalogued: bool,
}

/// Rows removed by a delete, plus route files that went with them.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Removal {
    pub cubes: Vec<Cube>,
    pub proxies: Vec<Proxy>,
    pub routes_removed: usize,
}
