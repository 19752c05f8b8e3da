//! In-memory [`ContainerRuntime`] for tests.
//!
//! Models the parts of docker semantics the engine relies on: names are
//! unique, a restarted or started container gets an address on the
//! default bridge (`172.17.0.x`), a stopped one loses it, and labels are
//! matchable. Failures can be injected per operation and name.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use cubeport_state::CubeSpec;

use crate::error::{RuntimeError, RuntimeResult};
use crate::{ContainerRuntime, ContainerState, RuntimeFuture};

#[derive(Debug, Clone)]
struct FakeContainer {
    running: bool,
    ip: Option<String>,
    labels: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    containers: BTreeMap<String, FakeContainer>,
    next_host: u8,
    failures: HashSet<(String, String)>,
    calls: Vec<String>,
    commits: Vec<String>,
}

impl Inner {
    fn next_ip(&mut self) -> String {
        self.next_host = self.next_host.wrapping_add(1).max(2);
        format!("172.17.0.{}", self.next_host)
    }

    fn record(&mut self, operation: &str, name: &str) -> RuntimeResult<()> {
        self.calls.push(format!("{operation} {name}"));
        if self
            .failures
            .contains(&(operation.to_string(), name.to_string()))
        {
            return Err(RuntimeError::Command {
                operation: "fake",
                target: name.to_string(),
                output: format!("injected {operation} failure"),
            });
        }
        Ok(())
    }
}

/// Thread-safe fake container engine.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every future `operation` (`start`, `stop`, `restart`, `commit`,
    /// `inspect`) on `name` fail with a command error.
    pub fn fail(&self, operation: &str, name: &str) {
        self.lock()
            .failures
            .insert((operation.to_string(), name.to_string()));
    }

    /// Remove a container behind the engine's back.
    pub fn remove_out_of_band(&self, name: &str) {
        self.lock().containers.remove(name);
    }

    /// Every operation attempted, as `"<operation> <name>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Every committed `image:tag`.
    pub fn commits(&self) -> Vec<String> {
        self.lock().commits.clone()
    }

    /// Number of containers in any state.
    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock()
            .containers
            .get(name)
            .is_some_and(|c| c.running)
    }
}

impl ContainerRuntime for FakeRuntime {
    fn start<'a>(&'a self, spec: &'a CubeSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.record("start", &spec.name)?;
            inner.containers.remove(&spec.name);
            let ip = inner.next_ip();
            inner.containers.insert(
                spec.name.clone(),
                FakeContainer {
                    running: true,
                    ip: Some(ip),
                    labels: spec.labels.clone(),
                },
            );
            Ok(())
        })
    }

    fn stop<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.record("stop", name)?;
            let container = inner
                .containers
                .get_mut(name)
                .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
            if !container.running {
                return Err(RuntimeError::Command {
                    operation: "stop",
                    target: name.to_string(),
                    output: format!("container {name} is not running"),
                });
            }
            container.running = false;
            container.ip = None;
            Ok(())
        })
    }

    fn restart<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.record("restart", name)?;
            if !inner.containers.contains_key(name) {
                return Err(RuntimeError::NotFound(name.to_string()));
            }
            let fresh_ip = inner.next_ip();
            if let Some(container) = inner.containers.get_mut(name) {
                container.running = true;
                container.ip.get_or_insert(fresh_ip);
            }
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
            let mut inner = self.lock();
            inner.record("commit", name)?;
            if !inner.containers.contains_key(name) {
                return Err(RuntimeError::NotFound(name.to_string()));
            }
            inner.commits.push(format!("{image}:{tag}"));
            Ok(())
        })
    }

    fn inspect<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ContainerState> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.record("inspect", name)?;
            let container = inner
                .containers
                .get(name)
                .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
            Ok(ContainerState {
                status: if container.running { "running" } else { "exited" }.to_string(),
                ip_address: container.ip.clone(),
            })
        })
    }

    fn count_by_label<'a>(&'a self, key: &'a str, value: &'a str) -> RuntimeFuture<'a, u64> {
        Box::pin(async move {
            let label = format!("{key}={value}");
            let inner = self.lock();
            Ok(inner
                .containers
                .values()
                .filter(|c| c.running && c.labels.contains(&label))
                .count() as u64)
        })
    }
}
