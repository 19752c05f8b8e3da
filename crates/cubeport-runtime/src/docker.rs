//! Docker CLI implementation of [`ContainerRuntime`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cubeport_state::CubeSpec;
use serde::Deserialize;
use tracing::{debug, info};

use crate::cli::DockerCli;
use crate::error::{RuntimeError, RuntimeResult};
use crate::{ContainerRuntime, ContainerState, RuntimeFuture};

/// Placeholder in a volume host path that resolves to the volume root.
pub const VOLUME_ROOT_PLACEHOLDER: &str = "[DEFAULT]";

/// Runs cubes as docker containers named after the cube.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    cli: DockerCli,
    volumes_root: PathBuf,
}

impl DockerRuntime {
    pub fn new(cli: DockerCli, volumes_root: impl Into<PathBuf>) -> Self {
        Self {
            cli,
            volumes_root: volumes_root.into(),
        }
    }

    /// Whether a container with exactly this name exists in any state.
    async fn exists(&self, name: &str) -> RuntimeResult<bool> {
        let filter = format!("name={name}");
        let out = self
            .cli
            .run(
                "ps",
                name,
                &["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"],
            )
            .await?;
        // The name filter matches substrings; require an exact line.
        Ok(out.lines().any(|line| line.trim() == name))
    }

    async fn start_inner(&self, spec: &CubeSpec) -> RuntimeResult<()> {
        let name = spec.name.as_str();
        if self.exists(name).await? {
            self.cli.run("stop", name, &["stop", name]).await?;
            self.cli.run("rm", name, &["rm", name]).await?;
            info!(cube = name, "existing container stopped and removed");
        }

        let args = run_args(spec, &self.volumes_root);
        let id = self.cli.run("run", name, &args).await?;
        info!(cube = name, container_id = %id.trim(), "container started");
        Ok(())
    }

    async fn inspect_inner(&self, name: &str) -> RuntimeResult<ContainerState> {
        let out = self
            .cli
            .run("inspect", name, &["inspect", "--type", "container", name])
            .await?;
        let state = parse_inspect(&out)?;
        debug!(cube = name, status = %state.status, ip = ?state.ip_address, "container inspected");
        Ok(state)
    }
}

impl ContainerRuntime for DockerRuntime {
    fn start<'a>(&'a self, spec: &'a CubeSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(self.start_inner(spec))
    }

    fn stop<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            // docker stop succeeds on an exited container; refuse it here.
            let state = self.inspect_inner(name).await?;
            if !state.is_running() {
                return Err(RuntimeError::Command {
                    operation: "stop",
                    target: name.to_string(),
                    output: format!("container {name} is {}", state.status),
                });
            }
            self.cli.run("stop", name, &["stop", name]).await?;
            info!(cube = name, "container stopped");
            Ok(())
        })
    }

    fn restart<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.cli.run("restart", name, &["restart", name]).await?;
            info!(cube = name, "container restarted");
            Ok(())
        })
    }

    fn commit<'a>(
        &'a self,
        name: &'a str,
        image: &'a str,
        tag: &'a str,
    ) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let reference = format!("{image}:{tag}");
            self.cli
                .run("commit", name, &["commit", name, reference.as_str()])
                .await?;
            info!(cube = name, image = %reference, "container committed");
            Ok(())
        })
    }

    fn inspect<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ContainerState> {
        Box::pin(self.inspect_inner(name))
    }

    fn count_by_label<'a>(&'a self, key: &'a str, value: &'a str) -> RuntimeFuture<'a, u64> {
        Box::pin(async move {
            let filter = format!("label={key}={value}");
            let out = self
                .cli
                .run(
                    "ps",
                    &filter,
                    &["ps", "--filter", filter.as_str(), "--format", "{{.ID}}"],
                )
                .await?;
            Ok(out.lines().filter(|l| !l.trim().is_empty()).count() as u64)
        })
    }
}

/// Resolve the volume-root placeholder in a host path.
pub fn resolve_host_path(host: &str, volumes_root: &Path) -> String {
    host.replacen(
        VOLUME_ROOT_PLACEHOLDER,
        &volumes_root.to_string_lossy(),
        1,
    )
}

/// Build the `docker run` argument list for a cube.
pub fn run_args(spec: &CubeSpec, volumes_root: &Path) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    for port in &spec.ports {
        args.extend(["-p".to_string(), port.clone()]);
    }
    for env in &spec.environment_vars {
        args.extend(["-e".to_string(), env.clone()]);
    }
    for (host, container) in &spec.volumes {
        let host = resolve_host_path(host, volumes_root);
        args.extend(["-v".to_string(), format!("{host}:{container}")]);
    }
    for label in &spec.labels {
        args.extend(["-l".to_string(), label.clone()]);
    }
    if let Some(cpus) = spec.resource_limits.cpus.as_deref().filter(|c| !c.is_empty()) {
        args.extend(["--cpus".to_string(), cpus.to_string()]);
    }
    if let Some(memory) = spec
        .resource_limits
        .memory
        .as_deref()
        .filter(|m| !m.is_empty())
    {
        args.extend(["--memory".to_string(), memory.to_string()]);
    }
    args.push(spec.image.clone());
    args
}

// ── docker inspect output ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    state: InspectState,
    #[serde(default)]
    network_settings: Option<NetworkSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: Option<String>,
    #[serde(default)]
    networks: Option<BTreeMap<String, EndpointSettings>>,
}

#[derive(Debug, Deserialize)]
struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: Option<String>,
}

/// Parse `docker inspect` JSON into a [`ContainerState`].
pub fn parse_inspect(json: &str) -> RuntimeResult<ContainerState> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(json).map_err(|e| RuntimeError::Parse(e.to_string()))?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| RuntimeError::Parse("empty inspect result".to_string()))?;

    let ip_address = entry.network_settings.and_then(|settings| {
        let from_networks = settings
            .networks
            .unwrap_or_default()
            .into_values()
            .filter_map(|endpoint| endpoint.ip_address)
            .find(|ip| !ip.is_empty());
        from_networks.or(settings.ip_address.filter(|ip| !ip.is_empty()))
    });

    Ok(ContainerState {
        status: entry.state.status,
        ip_address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubeport_state::ResourceLimits;

    fn web_spec() -> CubeSpec {
        CubeSpec {
            name: "web".to_string(),
            image: "nginx:latest".to_string(),
            ports: vec!["8081:80".to_string(), "8443:443".to_string()],
            environment_vars: vec!["FOO=bar".to_string()],
            resource_limits: ResourceLimits {
                cpus: Some("1.0".to_string()),
                memory: Some("512m".to_string()),
            },
            volumes: BTreeMap::from([
                ("[DEFAULT]/web".to_string(), "/usr/share/nginx/html".to_string()),
                ("/etc/certs".to_string(), "/certs".to_string()),
            ]),
            labels: vec!["service=cubeport".to_string(), "workspace_id=1".to_string()],
        }
    }

    #[test]
    fn run_args_cover_every_field_in_order() {
        let args = run_args(&web_spec(), Path::new("/srv/volumes"));
        assert_eq!(
            args,
            [
                "run", "-d", "--name", "web",
                "-p", "8081:80", "-p", "8443:443",
                "-e", "FOO=bar",
                "-v", "/srv/volumes/web:/usr/share/nginx/html",
                "-v", "/etc/certs:/certs",
                "-l", "service=cubeport", "-l", "workspace_id=1",
                "--cpus", "1.0", "--memory", "512m",
                "nginx:latest",
            ]
        );
    }

    #[test]
    fn run_args_skip_empty_limits() {
        let spec = CubeSpec {
            name: "bare".to_string(),
            image: "alpine".to_string(),
            resource_limits: ResourceLimits {
                cpus: Some(String::new()),
                memory: None,
            },
            ..CubeSpec::default()
        };
        assert_eq!(
            run_args(&spec, Path::new("/v")),
            ["run", "-d", "--name", "bare", "alpine"]
        );
    }

    #[test]
    fn placeholder_resolves_once() {
        assert_eq!(
            resolve_host_path("[DEFAULT]/a/[DEFAULT]", Path::new("/root")),
            "/root/a/[DEFAULT]"
        );
        assert_eq!(resolve_host_path("/plain", Path::new("/root")), "/plain");
    }

    #[test]
    fn parse_inspect_prefers_network_address() {
        let json = r#"[{
            "State": {"Status": "running"},
            "NetworkSettings": {
                "IPAddress": "",
                "Networks": {"bridge": {"IPAddress": "172.17.0.2"}}
            }
        }]"#;
        let state = parse_inspect(json).unwrap();
        assert!(state.is_running());
        assert_eq!(state.ip_address.as_deref(), Some("172.17.0.2"));
    }

    #[test]
    fn parse_inspect_stopped_container_has_no_address() {
        let json = r#"[{
            "State": {"Status": "exited"},
            "NetworkSettings": {"IPAddress": "", "Networks": {"bridge": {"IPAddress": ""}}}
        }]"#;
        let state = parse_inspect(json).unwrap();
        assert_eq!(state.status, "exited");
        assert_eq!(state.ip_address, None);
    }

    #[test]
    fn parse_inspect_tolerates_null_networks() {
        let json = r#"[{"State": {"Status": "created"}, "NetworkSettings": {"Networks": null}}]"#;
        assert_eq!(parse_inspect(json).unwrap().ip_address, None);
    }

    #[test]
    fn parse_inspect_rejects_empty_array() {
        assert!(matches!(parse_inspect("[]"), Err(RuntimeError::Parse(_))));
    }

    // ── Scripted docker binary ─────────────────────────────────────

    const RUNNING: &str = r#"[{"State":{"Status":"running"},"NetworkSettings":{"IPAddress":"172.17.0.2"}}]"#;
    const EXITED: &str = r#"[{"State":{"Status":"exited"},"NetworkSettings":{"IPAddress":""}}]"#;

    /// Install a shell script standing in for docker. It appends its argv to
    /// `calls.log`, then dispatches on the subcommand through `arms`.
    #[cfg(unix)]
    fn scripted_docker(dir: &tempfile::TempDir, arms: &str) -> DockerRuntime {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.path().join("docker");
        let body = format!(
            "#!/bin/sh\nDIR='{}'\nprintf '%s\\n' \"$*\" >> \"$DIR/calls.log\"\ncase \"$1\" in\n{arms}\nesac\n",
            dir.path().display()
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = DockerCli::new(script.to_string_lossy(), std::time::Duration::from_secs(10));
        DockerRuntime::new(cli, dir.path().join("volumes"))
    }

    /// Subcommands the script received, in order.
    fn subcommands(dir: &tempfile::TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_replaces_existing_container_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let rt = scripted_docker(&dir, "ps) echo web ;;\nrun) echo c0ffee ;;");

        rt.start(&web_spec()).await.unwrap();
        assert_eq!(subcommands(&dir), ["ps", "stop", "rm", "run"]);

        let log = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert!(log.starts_with("ps -a --filter name=web --format {{.Names}}\n"));
        assert!(log.contains("stop web\nrm web\nrun -d --name web "));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_ignores_names_that_only_share_a_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let rt = scripted_docker(&dir, "ps) printf 'web2\\nold-web\\n' ;;");

        rt.start(&web_spec()).await.unwrap();
        assert_eq!(subcommands(&dir), ["ps", "run"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_stop_or_remove_aborts_start() {
        let dir = tempfile::tempdir().unwrap();
        let rt = scripted_docker(&dir, "ps) echo web ;;\nstop) echo 'cannot stop' >&2; exit 1 ;;");
        let err = rt.start(&web_spec()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Command { operation: "stop", .. }));
        assert_eq!(subcommands(&dir), ["ps", "stop"]);

        let dir = tempfile::tempdir().unwrap();
        let rt = scripted_docker(&dir, "ps) echo web ;;\nrm) echo 'in use' >&2; exit 1 ;;");
        let err = rt.start(&web_spec()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Command { operation: "rm", .. }));
        assert_eq!(subcommands(&dir), ["ps", "stop", "rm"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn repeated_starts_leave_one_container() {
        let dir = tempfile::tempdir().unwrap();
        // A name registry in a file: run adds, rm deletes, ps lists.
        let arms = concat!(
            "ps) cat \"$DIR/names\" 2>/dev/null || true ;;\n",
            "rm) grep -vx \"$2\" \"$DIR/names\" > \"$DIR/names.tmp\"; mv \"$DIR/names.tmp\" \"$DIR/names\" ;;\n",
            "run) echo \"$4\" >> \"$DIR/names\"; echo c0ffee ;;",
        );
        let rt = scripted_docker(&dir, arms);

        rt.start(&web_spec()).await.unwrap();
        rt.start(&web_spec()).await.unwrap();

        let names = std::fs::read_to_string(dir.path().join("names")).unwrap();
        assert_eq!(names.lines().collect::<Vec<_>>(), ["web"]);
        assert_eq!(subcommands(&dir), ["ps", "run", "ps", "stop", "rm", "run"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_refuses_container_that_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let rt = scripted_docker(&dir, &format!("inspect) echo '{EXITED}' ;;"));

        let err = rt.stop("web").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Command { operation: "stop", .. }));
        assert!(err.to_string().contains("exited"));
        assert_eq!(subcommands(&dir), ["inspect"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_running_container_and_missing_one() {
        let dir = tempfile::tempdir().unwrap();
        let rt = scripted_docker(&dir, &format!("inspect) echo '{RUNNING}' ;;"));
        rt.stop("web").await.unwrap();
        assert_eq!(subcommands(&dir), ["inspect", "stop"]);

        let dir = tempfile::tempdir().unwrap();
        let rt = scripted_docker(
            &dir,
            "inspect) echo 'Error: No such object: web' >&2; exit 1 ;;",
        );
        assert!(matches!(rt.stop("web").await, Err(RuntimeError::NotFound(_))));
        assert_eq!(subcommands(&dir), ["inspect"]);
    }
}
