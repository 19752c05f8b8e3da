//! Proxy route operations.
//!
//! Adding a proxy only records it. `start_proxy` provisions it: resolve the
//! cube's live address, write the route file, then reload the proxy. If the
//! reload fails the route file stays on disk; it is picked up by the next
//! successful reload or wiped by the next proxy bootstrap.

use cubeport_state::{CubeId, Proxy, ProxyId, ProxyInsert, ProxyRoute};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::validate;
use crate::views::ProxyStart;
use crate::Engine;

impl Engine {
    fn require_proxy(&self, id: ProxyId) -> EngineResult<Proxy> {
        self.store
            .get_proxy(id)?
            .ok_or_else(|| EngineError::NotFound(format!("proxy {id}")))
    }

    /// Record a route for a cube. Idempotent on domain: if the domain is
    /// already routed, the existing proxy is returned with `created == false`.
    pub fn add_proxy(&self, cube_id: CubeId, route: &ProxyRoute) -> EngineResult<ProxyInsert> {
        let route = validate::proxy_route(route)?;
        let outcome = self.store.add_proxy(cube_id, &route)?;
        if outcome.created {
            info!(proxy_id = outcome.proxy.id, cube_id, domain = %route.domain, "proxy added");
        } else if outcome.proxy.cube_id != cube_id {
            warn!(
                domain = %route.domain,
                owner = outcome.proxy.cube_id,
                cube_id,
                "domain already routed to another cube"
            );
        }
        Ok(outcome)
    }

    pub fn get_proxy(&self, id: ProxyId) -> EngineResult<Proxy> {
        self.require_proxy(id)
    }

    pub fn list_proxies(&self, cube_id: CubeId) -> EngineResult<Vec<Proxy>> {
        self.require_cube(cube_id)?;
        Ok(self.store.list_proxies_for_cube(cube_id)?)
    }

    /// Replace a proxy's routing. A domain change retires the old route file.
    pub async fn edit_proxy(&self, id: ProxyId, route: &ProxyRoute) -> EngineResult<Proxy> {
        let route = validate::proxy_route(route)?;
        let previous = self.require_proxy(id)?;
        let proxy = self.store.edit_proxy(id, &route)?;
        if previous.route.domain != proxy.route.domain {
            self.retire_routes(std::slice::from_ref(&previous)).await;
        }
        info!(proxy_id = id, domain = %proxy.route.domain, "proxy edited");
        Ok(proxy)
    }

    pub async fn delete_proxy(&self, id: ProxyId) -> EngineResult<Proxy> {
        let proxy = self.store.delete_proxy(id)?;
        self.retire_routes(std::slice::from_ref(&proxy)).await;
        info!(proxy_id = id, domain = %proxy.route.domain, "proxy deleted");
        Ok(proxy)
    }

    /// Delete every proxy of a cube.
    pub async fn delete_proxies(&self, cube_id: CubeId) -> EngineResult<Vec<Proxy>> {
        self.require_cube(cube_id)?;
        let proxies = self.store.delete_proxies_for_cube(cube_id)?;
        self.retire_routes(&proxies).await;
        info!(cube_id, count = proxies.len(), "cube proxies deleted");
        Ok(proxies)
    }

    /// Provision a proxy into the live reverse proxy.
    pub async fn start_proxy(&self, id: ProxyId) -> EngineResult<ProxyStart> {
        let proxy = self.require_proxy(id)?;
        let cube = self.require_cube(proxy.cube_id)?;

        let state = self
            .runtime
            .inspect(cube.name())
            .await
            .map_err(|e| EngineError::runtime(cube.name(), e))?;
        let ip = state
            .ip_address
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| EngineError::NoLiveAddress {
                cube: cube.name().to_string(),
            })?;

        let domain = proxy.route.domain.as_str();
        let port = proxy.route.port;
        let route_file = self.routes.write_route(domain, &ip, port)?;
        if let Err(source) = self.proxy.reload().await {
            warn!(proxy_id = id, %domain, path = %route_file.display(), error = %source, "reload failed after route write");
            return Err(EngineError::ReloadFailed {
                path: route_file,
                source,
            });
        }

        let upstream = format!("{ip}:{port}");
        info!(proxy_id = id, %domain, %upstream, "proxy started");
        Ok(ProxyStart {
            proxy_id: id,
            domain: domain.to_string(),
            upstream,
            route_file,
        })
    }
}
