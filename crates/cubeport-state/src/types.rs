//! Domain types for the Cubeport state store.
//!
//! These types describe the desired state of workspaces, cubes and proxy
//! routes. All types are serializable to/from JSON for storage in redb
//! tables and are reused as API payloads, so wire names follow the
//! established JSON field names (`desc`, `type`, `default`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a workspace.
pub type WorkspaceId = u64;

/// Identifier of a cube.
pub type CubeId = u64;

/// Identifier of a proxy route.
pub type ProxyId = u64;

// ── Workspace ──────────────────────────────────────────────────────

/// A named group of cubes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    #[serde(rename = "desc", default)]
    pub description: String,
    /// Cached number of member cubes, adjusted on insert/delete.
    pub total_containers: u64,
    /// Unix timestamp (seconds) when the workspace was created.
    pub created_at: u64,
}

/// Everything removed by a workspace delete, in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceRemoval {
    pub workspace: Workspace,
    pub cubes: Vec<Cube>,
    pub proxies: Vec<Proxy>,
}

// ── Cube ───────────────────────────────────────────────────────────

/// CPU and memory caps passed through to the container runtime verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Decimal CPU share, e.g. `"1.0"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    /// Human-readable memory limit, e.g. `"512m"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Desired configuration of one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CubeSpec {
    pub name: String,
    pub image: String,
    /// `host:container` port mappings, in order.
    #[serde(default)]
    pub ports: Vec<String>,
    /// `KEY=value` assignments, in order.
    #[serde(default)]
    pub environment_vars: Vec<String>,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    /// Host path to container path. Host paths may contain the
    /// `[DEFAULT]` placeholder, resolved when the container is started.
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    /// Free-form `key=value` labels, in order.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A persisted cube row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cube {
    pub id: CubeId,
    pub workspace_id: WorkspaceId,
    #[serde(flatten)]
    pub spec: CubeSpec,
    pub created_at: u64,
}

impl Cube {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// A cube delete together with the proxy routes that went with it.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeRemoval {
    pub cube: Cube,
    pub proxies: Vec<Proxy>,
}

// ── Proxy ──────────────────────────────────────────────────────────

fn default_route_type() -> String {
    "http".to_string()
}

/// Routing parameters of a proxy, as supplied by callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyRoute {
    pub domain: String,
    pub port: u16,
    #[serde(rename = "type", default = "default_route_type")]
    pub route_type: String,
    /// Primary route of its cube. At most one per cube.
    #[serde(rename = "default", default)]
    pub is_default: bool,
}

/// A persisted proxy row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proxy {
    pub id: ProxyId,
    pub cube_id: CubeId,
    #[serde(flatten)]
    pub route: ProxyRoute,
    pub created_at: u64,
}

/// Outcome of an idempotent proxy insert.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyInsert {
    pub proxy: Proxy,
    /// False when a proxy for the same domain already existed.
    pub created: bool,
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
