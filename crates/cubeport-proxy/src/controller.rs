//! Proxy process control.
//!
//! The proxy runs as an nginx container whose `conf.d` is the route
//! directory. Bootstrapping always starts from a clean slate: any previous
//! proxy container is force-removed and the route directory is emptied,
//! since routes point at container addresses that do not survive a
//! restart of this service.

use std::future::Future;
use std::pin::Pin;

use cubeport_runtime::{DockerCli, RuntimeError};
use tracing::{debug, info};

use crate::config::RouteWriter;
use crate::error::{ProxyError, ProxyResult};

/// Boxed future returned by [`ProxyController`] methods.
pub type ProxyFuture<'a, T> = Pin<Box<dyn Future<Output = ProxyResult<T>> + Send + 'a>>;

/// Starts the proxy process and applies route changes to it.
pub trait ProxyController: Send + Sync {
    /// (Re)create the proxy with an empty route set.
    fn bootstrap(&self) -> ProxyFuture<'_, ()>;

    /// Apply the current route files. Fails if the proxy is not running.
    fn reload(&self) -> ProxyFuture<'_, ()>;
}

/// Settings for the nginx proxy container.
#[derive(Debug, Clone)]
pub struct NginxSettings {
    pub container_name: String,
    pub image: String,
    /// Host port published for HTTP traffic.
    pub public_port: u16,
    /// Port nginx listens on inside the container.
    pub listen_port: u16,
}

impl Default for NginxSettings {
    fn default() -> Self {
        Self {
            container_name: "cubeport-proxy".to_string(),
            image: "nginx".to_string(),
            public_port: 80,
            listen_port: 80,
        }
    }
}

/// Runs nginx in a docker container via the CLI.
#[derive(Debug, Clone)]
pub struct NginxController {
    cli: DockerCli,
    routes: RouteWriter,
    settings: NginxSettings,
}

impl NginxController {
    pub fn new(cli: DockerCli, routes: RouteWriter, settings: NginxSettings) -> Self {
        Self {
            cli,
            routes,
            settings,
        }
    }

    /// `docker run` arguments for the proxy container, mounting `conf_dir`.
    pub fn run_args(&self, conf_dir: &str) -> Vec<String> {
        let s = &self.settings;
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            s.container_name.clone(),
            "-v".to_string(),
            format!("{conf_dir}:/etc/nginx/conf.d:ro"),
            "-p".to_string(),
            format!("{}:{}", s.public_port, s.listen_port),
            s.image.clone(),
        ]
    }

    async fn bootstrap_inner(&self) -> ProxyResult<()> {
        let name = self.settings.container_name.as_str();
        match self.cli.run("rm", name, &["rm", "-f", name]).await {
            Ok(_) => debug!(container = name, "previous proxy container removed"),
            Err(RuntimeError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let cleared = self.routes.clear()?;
        self.routes.ensure_dir()?;
        let conf_dir = self
            .routes
            .dir()
            .canonicalize()
            .map_err(|e| ProxyError::io(self.routes.dir(), e))?;

        let args = self.run_args(&conf_dir.to_string_lossy());
        self.cli.run("run", name, &args).await?;
        info!(
            container = name,
            conf_dir = %conf_dir.display(),
            public_port = self.settings.public_port,
            stale_routes = cleared,
            "proxy started"
        );
        Ok(())
    }

    async fn reload_inner(&self) -> ProxyResult<()> {
        let name = self.settings.container_name.as_str();
        self.cli
            .run("reload", name, &["exec", name, "nginx", "-s", "reload"])
            .await?;
        info!(container = name, "proxy reloaded");
        Ok(())
    }
}

impl ProxyController for NginxController {
    fn bootstrap(&self) -> ProxyFuture<'_, ()> {
        Box::pin(self.bootstrap_inner())
    }

    fn reload(&self) -> ProxyFuture<'_, ()> {
        Box::pin(self.reload_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn run_args_mount_routes_read_only() {
        let controller = NginxController::new(
            DockerCli::default(),
            RouteWriter::new("/srv/proxy", 80),
            NginxSettings {
                public_port: 8080,
                ..NginxSettings::default()
            },
        );
        assert_eq!(
            controller.run_args("/srv/proxy"),
            [
                "run",
                "-d",
                "--name",
                "cubeport-proxy",
                "-v",
                "/srv/proxy:/etc/nginx/conf.d:ro",
                "-p",
                "8080:80",
                "nginx",
            ]
        );
    }

    #[tokio::test]
    async fn reload_without_engine_fails() {
        let dir = tempfile::tempdir().unwrap();
        let controller = NginxController::new(
            DockerCli::new("/nonexistent/cubeport-docker", Duration::from_secs(1)),
            RouteWriter::new(dir.path(), 80),
            NginxSettings::default(),
        );
        let err = controller.reload().await.unwrap_err();
        assert!(matches!(err, ProxyError::Runtime(RuntimeError::Spawn { .. })));
    }
}
