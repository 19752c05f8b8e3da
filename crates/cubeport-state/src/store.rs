//! StateStore: redb-backed record store for Cubeport.
//!
//! Provides typed operations over workspaces, cubes, and proxy routes.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).
//!
//! Each public method opens exactly one transaction. Methods that check
//! existence or uniqueness before writing do the check inside the same
//! write transaction, so concurrent callers cannot interleave between the
//! check and the write.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, Table, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type EntityTable<'txn> = Table<'txn, u64, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
        txn.open_table(CUBES).map_err(map_err!(Table))?;
        txn.open_table(PROXIES).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn begin_write(&self) -> StateResult<WriteTransaction> {
        self.db.begin_write().map_err(map_err!(Transaction))
    }

    // ── Workspaces ─────────────────────────────────────────────────

    /// Create a workspace. Fails with `Conflict` if the name is taken.
    pub fn create_workspace(&self, name: &str, description: &str) -> StateResult<Workspace> {
        let txn = self.begin_write()?;
        let workspace;
        {
            let mut table = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            let existing: Vec<Workspace> = scan(&table)?;
            if existing.iter().any(|w| w.name == name) {
                return Err(StateError::Conflict(format!(
                    "workspace name '{name}' already exists"
                )));
            }
            workspace = Workspace {
                id: next_id(&txn, "workspaces")?,
                name: name.to_string(),
                description: description.to_string(),
                total_containers: 0,
                created_at: epoch_secs(),
            };
            put(&mut table, workspace.id, &workspace)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(workspace_id = workspace.id, name, "workspace created");
        Ok(workspace)
    }

    /// List all workspaces in creation order.
    pub fn list_workspaces(&self) -> StateResult<Vec<Workspace>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
        scan(&table)
    }

    /// Get a workspace by id.
    pub fn get_workspace(&self, id: WorkspaceId) -> StateResult<Option<Workspace>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
        load(&table, id)
    }

    /// Rename and/or re-describe a workspace.
    pub fn edit_workspace(
        &self,
        id: WorkspaceId,
        name: &str,
        description: &str,
    ) -> StateResult<Workspace> {
        let txn = self.begin_write()?;
        let workspace;
        {
            let mut table = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            let all: Vec<Workspace> = scan(&table)?;
            if all.iter().any(|w| w.name == name && w.id != id) {
                return Err(StateError::Conflict(format!(
                    "workspace name '{name}' already exists"
                )));
            }
            let mut current = all
                .into_iter()
                .find(|w| w.id == id)
                .ok_or_else(|| StateError::NotFound(format!("workspace {id}")))?;
            current.name = name.to_string();
            current.description = description.to_string();
            put(&mut table, id, &current)?;
            workspace = current;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(workspace_id = id, name, "workspace updated");
        Ok(workspace)
    }

    /// Delete a workspace together with its cubes and their proxies.
    pub fn delete_workspace(&self, id: WorkspaceId) -> StateResult<WorkspaceRemoval> {
        let txn = self.begin_write()?;
        let removal;
        {
            let mut workspaces = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            let mut cubes = txn.open_table(CUBES).map_err(map_err!(Table))?;
            let mut proxies = txn.open_table(PROXIES).map_err(map_err!(Table))?;

            let workspace: Workspace = load(&workspaces, id)?
                .ok_or_else(|| StateError::NotFound(format!("workspace {id}")))?;
            let removed_cubes = remove_cubes_where(&mut cubes, |c| c.workspace_id == id)?;
            let cube_ids: HashSet<CubeId> = removed_cubes.iter().map(|c| c.id).collect();
            let removed_proxies = remove_proxies_where(&mut proxies, |p| {
                cube_ids.contains(&p.cube_id)
            })?;
            workspaces.remove(id).map_err(map_err!(Write))?;

            removal = WorkspaceRemoval {
                workspace,
                cubes: removed_cubes,
                proxies: removed_proxies,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            workspace_id = id,
            cubes = removal.cubes.len(),
            proxies = removal.proxies.len(),
            "workspace deleted"
        );
        Ok(removal)
    }

    /// Number of workspaces.
    pub fn count_workspaces(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    /// Increment the cached container counter of the named workspace.
    pub fn inc_container_count(&self, workspace_name: &str) -> StateResult<u64> {
        self.adjust_count_by_name(workspace_name, 1)
    }

    /// Decrement the cached container counter of the named workspace.
    /// Saturates at zero.
    pub fn dec_container_count(&self, workspace_name: &str) -> StateResult<u64> {
        self.adjust_count_by_name(workspace_name, -1)
    }

    fn adjust_count_by_name(&self, workspace_name: &str, delta: i64) -> StateResult<u64> {
        let txn = self.begin_write()?;
        let count;
        {
            let mut table = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            let workspace = scan::<Workspace>(&table)?
                .into_iter()
                .find(|w| w.name == workspace_name)
                .ok_or_else(|| StateError::NotFound(format!("workspace '{workspace_name}'")))?;
            count = adjust_count(&mut table, workspace, delta)?.total_containers;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Cubes ──────────────────────────────────────────────────────

    /// Insert a cube under an existing workspace and bump its counter.
    ///
    /// Fails with `NotFound` if the workspace is absent and with `Conflict`
    /// if any cube already uses the same name.
    pub fn insert_cube(&self, workspace_id: WorkspaceId, spec: &CubeSpec) -> StateResult<Cube> {
        let mut inserted = self.insert_cubes(workspace_id, std::slice::from_ref(spec))?;
        inserted
            .pop()
            .ok_or_else(|| StateError::Write("cube batch produced no row".to_string()))
    }

    /// Insert a batch of cubes in one transaction.
    ///
    /// Either every cube is stored and the counter grows by the batch size,
    /// or nothing changes.
    pub fn insert_cubes(
        &self,
        workspace_id: WorkspaceId,
        specs: &[CubeSpec],
    ) -> StateResult<Vec<Cube>> {
        let txn = self.begin_write()?;
        let mut inserted = Vec::with_capacity(specs.len());
        {
            let mut workspaces = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            let mut cubes = txn.open_table(CUBES).map_err(map_err!(Table))?;

            let workspace: Workspace = load(&workspaces, workspace_id)?
                .ok_or_else(|| StateError::NotFound(format!("workspace {workspace_id}")))?;

            for spec in specs {
                // Earlier rows of this batch are already visible to the scan.
                ensure_cube_name_free(&cubes, &spec.name, None)?;
                let cube = Cube {
                    id: next_id(&txn, "cubes")?,
                    workspace_id,
                    spec: spec.clone(),
                    created_at: epoch_secs(),
                };
                put(&mut cubes, cube.id, &cube)?;
                inserted.push(cube);
            }
            adjust_count(&mut workspaces, workspace, inserted.len() as i64)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        for cube in &inserted {
            debug!(cube_id = cube.id, workspace_id, cube = %cube.spec.name, "cube stored");
        }
        Ok(inserted)
    }

    /// Get a cube by id.
    pub fn get_cube(&self, id: CubeId) -> StateResult<Option<Cube>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CUBES).map_err(map_err!(Table))?;
        load(&table, id)
    }

    /// Replace a cube's specification. Owner and creation time are kept.
    pub fn update_cube(&self, id: CubeId, spec: &CubeSpec) -> StateResult<Cube> {
        let txn = self.begin_write()?;
        let cube;
        {
            let mut cubes = txn.open_table(CUBES).map_err(map_err!(Table))?;
            let mut current: Cube =
                load(&cubes, id)?.ok_or_else(|| StateError::NotFound(format!("cube {id}")))?;
            ensure_cube_name_free(&cubes, &spec.name, Some(id))?;
            current.spec = spec.clone();
            put(&mut cubes, id, &current)?;
            cube = current;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cube_id = id, "cube updated");
        Ok(cube)
    }

    /// Delete a cube, its proxies, and decrement its workspace counter.
    pub fn delete_cube(&self, id: CubeId) -> StateResult<CubeRemoval> {
        let txn = self.begin_write()?;
        let removal;
        {
            let mut workspaces = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            let mut cubes = txn.open_table(CUBES).map_err(map_err!(Table))?;
            let mut proxies = txn.open_table(PROXIES).map_err(map_err!(Table))?;

            let cube: Cube =
                load(&cubes, id)?.ok_or_else(|| StateError::NotFound(format!("cube {id}")))?;
            cubes.remove(id).map_err(map_err!(Write))?;
            let removed_proxies = remove_proxies_where(&mut proxies, |p| p.cube_id == id)?;
            if let Some(workspace) = load::<Workspace>(&workspaces, cube.workspace_id)? {
                adjust_count(&mut workspaces, workspace, -1)?;
            }
            removal = CubeRemoval {
                cube,
                proxies: removed_proxies,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cube_id = id, proxies = removal.proxies.len(), "cube deleted");
        Ok(removal)
    }

    /// List the cubes of a workspace in creation order.
    pub fn list_cubes_in_workspace(&self, workspace_id: WorkspaceId) -> StateResult<Vec<Cube>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CUBES).map_err(map_err!(Table))?;
        let cubes: Vec<Cube> = scan(&table)?;
        Ok(cubes
            .into_iter()
            .filter(|c| c.workspace_id == workspace_id)
            .collect())
    }

    /// Number of cube rows owned by a workspace.
    pub fn count_cubes_in_workspace(&self, workspace_id: WorkspaceId) -> StateResult<u64> {
        Ok(self.list_cubes_in_workspace(workspace_id)?.len() as u64)
    }

    /// Number of cube rows across all workspaces.
    pub fn count_cubes_total(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CUBES).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    /// Delete every cube of a workspace (and their proxies). The workspace
    /// row itself is kept, with its counter reduced accordingly.
    pub fn delete_cubes_in_workspace(&self, workspace_id: WorkspaceId) -> StateResult<Vec<Cube>> {
        let txn = self.begin_write()?;
        let removed;
        {
            let mut workspaces = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            let mut cubes = txn.open_table(CUBES).map_err(map_err!(Table))?;
            let mut proxies = txn.open_table(PROXIES).map_err(map_err!(Table))?;

            removed = remove_cubes_where(&mut cubes, |c| c.workspace_id == workspace_id)?;
            let cube_ids: HashSet<CubeId> = removed.iter().map(|c| c.id).collect();
            remove_proxies_where(&mut proxies, |p| cube_ids.contains(&p.cube_id))?;
            if let Some(workspace) = load::<Workspace>(&workspaces, workspace_id)? {
                adjust_count(&mut workspaces, workspace, -(removed.len() as i64))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(workspace_id, count = removed.len(), "workspace cubes deleted");
        Ok(removed)
    }

    // ── Proxies ────────────────────────────────────────────────────

    /// Add a proxy route to a cube, idempotent on domain.
    ///
    /// If any proxy already claims `route.domain`, that proxy is returned
    /// unchanged with `created == false`. A new default route clears the
    /// default flag on the cube's other proxies.
    pub fn add_proxy(&self, cube_id: CubeId, route: &ProxyRoute) -> StateResult<ProxyInsert> {
        let txn = self.begin_write()?;
        let outcome;
        {
            let cubes = txn.open_table(CUBES).map_err(map_err!(Table))?;
            let mut proxies = txn.open_table(PROXIES).map_err(map_err!(Table))?;

            if load::<Cube>(&cubes, cube_id)?.is_none() {
                return Err(StateError::NotFound(format!("cube {cube_id}")));
            }
            let all: Vec<Proxy> = scan(&proxies)?;
            if let Some(existing) = all.iter().find(|p| p.route.domain == route.domain) {
                outcome = ProxyInsert {
                    proxy: existing.clone(),
                    created: false,
                };
            } else {
                if route.is_default {
                    clear_defaults(&mut proxies, &all, cube_id, None)?;
                }
                let proxy = Proxy {
                    id: next_id(&txn, "proxies")?,
                    cube_id,
                    route: route.clone(),
                    created_at: epoch_secs(),
                };
                put(&mut proxies, proxy.id, &proxy)?;
                outcome = ProxyInsert {
                    proxy,
                    created: true,
                };
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            proxy_id = outcome.proxy.id,
            cube_id,
            domain = %route.domain,
            created = outcome.created,
            "proxy stored"
        );
        Ok(outcome)
    }

    /// Get a proxy by id.
    pub fn get_proxy(&self, id: ProxyId) -> StateResult<Option<Proxy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROXIES).map_err(map_err!(Table))?;
        load(&table, id)
    }

    /// Replace a proxy's routing parameters. Moving onto a domain held by
    /// another proxy is a `Conflict`.
    pub fn edit_proxy(&self, id: ProxyId, route: &ProxyRoute) -> StateResult<Proxy> {
        let txn = self.begin_write()?;
        let proxy;
        {
            let mut proxies = txn.open_table(PROXIES).map_err(map_err!(Table))?;
            let all: Vec<Proxy> = scan(&proxies)?;
            let mut current = all
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| StateError::NotFound(format!("proxy {id}")))?;
            if all
                .iter()
                .any(|p| p.id != id && p.route.domain == route.domain)
            {
                return Err(StateError::Conflict(format!(
                    "domain '{}' is already routed",
                    route.domain
                )));
            }
            if route.is_default {
                clear_defaults(&mut proxies, &all, current.cube_id, Some(id))?;
            }
            current.route = route.clone();
            put(&mut proxies, id, &current)?;
            proxy = current;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(proxy_id = id, domain = %route.domain, "proxy updated");
        Ok(proxy)
    }

    /// Delete a proxy by id, returning the removed row.
    pub fn delete_proxy(&self, id: ProxyId) -> StateResult<Proxy> {
        let txn = self.begin_write()?;
        let proxy;
        {
            let mut proxies = txn.open_table(PROXIES).map_err(map_err!(Table))?;
            proxy = load::<Proxy>(&proxies, id)?
                .ok_or_else(|| StateError::NotFound(format!("proxy {id}")))?;
            proxies.remove(id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(proxy_id = id, "proxy deleted");
        Ok(proxy)
    }

    /// List the proxies of a cube in creation order.
    pub fn list_proxies_for_cube(&self, cube_id: CubeId) -> StateResult<Vec<Proxy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROXIES).map_err(map_err!(Table))?;
        let proxies: Vec<Proxy> = scan(&table)?;
        Ok(proxies.into_iter().filter(|p| p.cube_id == cube_id).collect())
    }

    /// Delete every proxy of a cube, returning the removed rows.
    pub fn delete_proxies_for_cube(&self, cube_id: CubeId) -> StateResult<Vec<Proxy>> {
        let txn = self.begin_write()?;
        let removed;
        {
            let mut proxies = txn.open_table(PROXIES).map_err(map_err!(Table))?;
            removed = remove_proxies_where(&mut proxies, |p| p.cube_id == cube_id)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cube_id, count = removed.len(), "cube proxies deleted");
        Ok(removed)
    }

    /// Look up the proxy that claims a domain.
    pub fn find_proxy_by_domain(&self, domain: &str) -> StateResult<Option<Proxy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROXIES).map_err(map_err!(Table))?;
        let proxies: Vec<Proxy> = scan(&table)?;
        Ok(proxies.into_iter().find(|p| p.route.domain == domain))
    }
}

// ── Table helpers ──────────────────────────────────────────────────

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn put<T: Serialize>(table: &mut EntityTable<'_>, id: u64, value: &T) -> StateResult<()> {
    let bytes = encode(value)?;
    table
        .insert(id, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn load<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: u64,
) -> StateResult<Option<T>> {
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Decode every row of an entity table in key (creation) order.
fn scan<T: DeserializeOwned>(table: &impl ReadableTable<u64, &'static [u8]>) -> StateResult<Vec<T>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(decode(value.value())?);
    }
    Ok(results)
}

/// Allocate the next id of a sequence inside the caller's transaction.
fn next_id(txn: &WriteTransaction, sequence: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(sequence, next).map_err(map_err!(Write))?;
    Ok(next)
}

fn adjust_count(
    table: &mut EntityTable<'_>,
    mut workspace: Workspace,
    delta: i64,
) -> StateResult<Workspace> {
    workspace.total_containers = if delta >= 0 {
        workspace.total_containers.saturating_add(delta.unsigned_abs())
    } else {
        workspace.total_containers.saturating_sub(delta.unsigned_abs())
    };
    put(table, workspace.id, &workspace)?;
    Ok(workspace)
}

fn ensure_cube_name_free(
    cubes: &impl ReadableTable<u64, &'static [u8]>,
    name: &str,
    except: Option<CubeId>,
) -> StateResult<()> {
    let all: Vec<Cube> = scan(cubes)?;
    if all
        .iter()
        .any(|c| c.spec.name == name && Some(c.id) != except)
    {
        return Err(StateError::Conflict(format!(
            "cube name '{name}' already exists"
        )));
    }
    Ok(())
}

fn remove_cubes_where(
    cubes: &mut EntityTable<'_>,
    predicate: impl Fn(&Cube) -> bool,
) -> StateResult<Vec<Cube>> {
    let doomed: Vec<Cube> = scan::<Cube>(&*cubes)?
        .into_iter()
        .filter(|c| predicate(c))
        .collect();
    for cube in &doomed {
        cubes.remove(cube.id).map_err(map_err!(Write))?;
    }
    Ok(doomed)
}

fn remove_proxies_where(
    proxies: &mut EntityTable<'_>,
    predicate: impl Fn(&Proxy) -> bool,
) -> StateResult<Vec<Proxy>> {
    let doomed: Vec<Proxy> = scan::<Proxy>(&*proxies)?
        .into_iter()
        .filter(|p| predicate(p))
        .collect();
    for proxy in &doomed {
        proxies.remove(proxy.id).map_err(map_err!(Write))?;
    }
    Ok(doomed)
}

/// Drop the default flag from every proxy of `cube_id` except `keep`.
fn clear_defaults(
    proxies: &mut EntityTable<'_>,
    all: &[Proxy],
    cube_id: CubeId,
    keep: Option<ProxyId>,
) -> StateResult<()> {
    for proxy in all
        .iter()
        .filter(|p| p.cube_id == cube_id && p.route.is_default && Some(p.id) != keep)
    {
        let mut cleared = proxy.clone();
        cleared.route.is_default = false;
        put(proxies, cleared.id, &cleared)?;
    }
    Ok(())
}
