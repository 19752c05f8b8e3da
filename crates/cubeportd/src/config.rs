//! cubeportd.toml configuration.
//!
//! Every field has a default, so an empty (or absent) file is a valid
//! configuration. Relative paths resolve against `paths.data_dir`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use cubeport_proxy::NginxSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub docker: DockerConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    /// Directory holding one `<domain>.conf` per provisioned route.
    pub proxy_config_dir: PathBuf,
    /// Substituted for `[DEFAULT]` in volume host paths.
    pub volumes_root: PathBuf,
    pub catalog_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/cubeport"),
            proxy_config_dir: PathBuf::from("proxy"),
            volumes_root: PathBuf::from("volumes"),
            catalog_path: PathBuf::from("images.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub binary: String,
    pub command_timeout_secs: u64,
    /// Value of the `service=` label on managed containers.
    pub service_label: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            command_timeout_secs: cubeport_runtime::DEFAULT_COMMAND_TIMEOUT.as_secs(),
            service_label: cubeport_engine::DEFAULT_SERVICE_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub container_name: String,
    pub image: String,
    pub public_port: u16,
    pub listen_port: u16,
    /// Skip bootstrapping the proxy container at startup.
    pub enabled: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let nginx = NginxSettings::default();
        Self {
            container_name: nginx.container_name,
            image: nginx.image,
            public_port: nginx.public_port,
            listen_port: nginx.listen_port,
            enabled: true,
        }
    }
}

/// Command-line values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub proxy_config_dir: Option<PathBuf>,
    pub volumes_root: Option<PathBuf>,
    pub catalog_path: Option<PathBuf>,
    pub command_timeout_secs: Option<u64>,
}

impl DaemonConfig {
    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(dir) = overrides.data_dir {
            self.paths.data_dir = dir;
        }
        if let Some(dir) = overrides.proxy_config_dir {
            self.paths.proxy_config_dir = dir;
        }
        if let Some(dir) = overrides.volumes_root {
            self.paths.volumes_root = dir;
        }
        if let Some(path) = overrides.catalog_path {
            self.paths.catalog_path = path;
        }
        if let Some(secs) = overrides.command_timeout_secs {
            self.docker.command_timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.docker.command_timeout_secs > 0,
            "docker.command_timeout_secs must be positive"
        );
        anyhow::ensure!(!self.docker.binary.trim().is_empty(), "docker.binary must be set");
        anyhow::ensure!(
            !self.docker.service_label.trim().is_empty(),
            "docker.service_label must be set"
        );
        anyhow::ensure!(self.proxy.listen_port > 0, "proxy.listen_port must be positive");
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.paths.data_dir.join(path)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.paths.data_dir.join("cubeport.redb")
    }

    pub fn proxy_config_dir(&self) -> PathBuf {
        self.resolve(&self.paths.proxy_config_dir)
    }

    pub fn volumes_root(&self) -> PathBuf {
        self.resolve(&self.paths.volumes_root)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.resolve(&self.paths.catalog_path)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.docker.command_timeout_secs)
    }

    pub fn nginx_settings(&self) -> NginxSettings {
        NginxSettings {
            container_name: self.proxy.container_name.clone(),
            image: self.proxy.image.clone(),
            public_port: self.proxy.public_port,
            listen_port: self.proxy.listen_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.docker.binary, "docker");
        assert_eq!(config.proxy.container_name, "cubeport-proxy");
        assert!(config.proxy.enabled);
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[server]
port = 9000

[paths]
data_dir = "/srv/cubeport"
volumes_root = "/mnt/volumes"

[proxy]
public_port = 8088
enabled = false
"#;
        let config: DaemonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.proxy.public_port, 8088);
        assert!(!config.proxy.enabled);
        assert_eq!(config.proxy.image, "nginx");
        assert_eq!(config.docker.command_timeout_secs, 30);

        assert_eq!(config.db_path(), PathBuf::from("/srv/cubeport/cubeport.redb"));
        assert_eq!(config.proxy_config_dir(), PathBuf::from("/srv/cubeport/proxy"));
        assert_eq!(config.volumes_root(), PathBuf::from("/mnt/volumes"));
        assert_eq!(config.catalog_path(), PathBuf::from("/srv/cubeport/images.json"));
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config = DaemonConfig::default();
        config.apply(Overrides {
            port: Some(7000),
            data_dir: Some(PathBuf::from("/tmp/cp")),
            command_timeout_secs: Some(5),
            ..Overrides::default()
        });
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.proxy_config_dir(), PathBuf::from("/tmp/cp/proxy"));
    }

    #[test]
    fn load_reads_file_and_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.toml");
        std::fs::write(&good, "[docker]\nbinary = \"podman\"\n").unwrap();
        assert_eq!(DaemonConfig::load(Some(&good)).unwrap().docker.binary, "podman");

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[server]\nport = \"x\"\n").unwrap();
        let err = DaemonConfig::load(Some(&bad)).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));

        assert_eq!(DaemonConfig::load(None).unwrap(), DaemonConfig::default());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = DaemonConfig::default();
        config.docker.command_timeout_secs = 0;
        assert!(config.validate().is_err());
        assert!(DaemonConfig::default().validate().is_ok());
    }
}
