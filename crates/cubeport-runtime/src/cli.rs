//! Bounded invocation of the docker command-line client.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};

/// Default bound on a single CLI invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs docker CLI commands with a per-call timeout.
///
/// A child that outlives the timeout is killed when its future is dropped.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker", DEFAULT_COMMAND_TIMEOUT)
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `docker <args>` and return its stdout.
    ///
    /// `operation` and `target` only label errors and log lines. A non-zero
    /// exit mentioning a missing container maps to `NotFound(target)`;
    /// any other non-zero exit is a `Command` error carrying the output.
    pub async fn run<S: AsRef<str>>(
        &self,
        operation: &'static str,
        target: &str,
        args: &[S],
    ) -> RuntimeResult<String> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        debug!(binary = %self.binary, ?args, "running container CLI");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(RuntimeError::Spawn {
                    binary: self.binary.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(RuntimeError::Timeout {
                    operation,
                    target: target.to_string(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let combined = combine_output(&stdout, &String::from_utf8_lossy(&output.stderr));
        if mentions_missing_container(&combined) {
            return Err(RuntimeError::NotFound(target.to_string()));
        }
        Err(RuntimeError::Command {
            operation,
            target: target.to_string(),
            output: combined,
        })
    }
}

fn combine_output(stdout: &str, stderr: &str) -> String {
    match (stdout.trim(), stderr.trim()) {
        ("", err) => err.to_string(),
        (out, "") => out.to_string(),
        (out, err) => format!("{err}\n{out}"),
    }
}

fn mentions_missing_container(output: &str) -> bool {
    output.contains("No such container") || output.contains("No such object")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_prefers_stderr_first() {
        assert_eq!(combine_output("", " boom \n"), "boom");
        assert_eq!(combine_output("id\n", ""), "id");
        assert_eq!(combine_output("partial", "boom"), "boom\npartial");
    }

    #[test]
    fn detects_missing_container_messages() {
        assert!(mentions_missing_container(
            "Error response from daemon: No such container: web"
        ));
        assert!(mentions_missing_container("Error: No such object: web"));
        assert!(!mentions_missing_container("is not running"));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let cli = DockerCli::new("/nonexistent/cubeport-docker", Duration::from_secs(5));
        let err = cli.run("ps", "-", &["ps"]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let cli = DockerCli::new("sleep", Duration::from_millis(100));
        let err = cli.run("sleep", "5", &["5"]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { operation: "sleep", .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_carries_output() {
        let cli = DockerCli::new("sh", Duration::from_secs(5));
        let err = cli
            .run("check", "web", &["-c", "echo bad thing >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            RuntimeError::Command { output, target, .. } => {
                assert_eq!(output, "bad thing");
                assert_eq!(target, "web");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
