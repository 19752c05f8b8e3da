//! cubeport-runtime: container runtime adapter.
//!
//! Translates cube specifications into container engine commands and
//! reports live container state. The engine is reached through the
//! [`ContainerRuntime`] trait so callers can swap the docker CLI for an
//! in-memory fake (`testing` feature).
//!
//! # Architecture
//!
//! ```text
//! ContainerRuntime (trait, object-safe)
//!   ├── DockerRuntime  → DockerCli (tokio::process, per-call timeout)
//!   └── FakeRuntime    (in-memory, `testing` feature)
//! ```
//!
//! Containers are addressed by cube name. Live status and address are
//! never cached here; every `inspect` asks the engine.

pub mod cli;
pub mod docker;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;

use std::future::Future;
use std::pin::Pin;

use cubeport_state::CubeSpec;
use serde::{Deserialize, Serialize};

pub use cli::{DEFAULT_COMMAND_TIMEOUT, DockerCli};
pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
#[cfg(any(test, feature = "testing"))]
pub use fake::FakeRuntime;

/// Boxed future returned by [`ContainerRuntime`] methods.
pub type RuntimeFuture<'a, T> = Pin<Box<dyn Future<Output = RuntimeResult<T>> + Send + 'a>>;

/// Live state of one container as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    /// Engine status string, e.g. `running`, `exited`, `created`.
    pub status: String,
    /// First non-empty address across attached networks.
    pub ip_address: Option<String>,
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// Drives a container engine.
pub trait ContainerRuntime: Send + Sync {
    /// Create and run a container for `spec`, replacing any existing
    /// container with the same name.
    fn start<'a>(&'a self, spec: &'a CubeSpec) -> RuntimeFuture<'a, ()>;

    /// Stop a running container.
    fn stop<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()>;

    /// Restart an existing container in place.
    fn restart<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()>;

    /// Snapshot a container's filesystem as `image:tag`.
    fn commit<'a>(&'a self, name: &'a str, image: &'a str, tag: &'a str)
    -> RuntimeFuture<'a, ()>;

    /// Query live status and address.
    fn inspect<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ContainerState>;

    /// Count running containers carrying label `key=value`.
    fn count_by_label<'a>(&'a self, key: &'a str, value: &'a str) -> RuntimeFuture<'a, u64>;
}
