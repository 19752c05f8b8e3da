//! Engine error types.

use std::path::PathBuf;

use cubeport_proxy::ProxyError;
use cubeport_runtime::RuntimeError;
use cubeport_state::StateError;
use thiserror::Error;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cube '{cube}' has no live address; deploy it first")]
    NoLiveAddress { cube: String },

    #[error("cube '{cube}': {source}")]
    Runtime {
        cube: String,
        #[source]
        source: RuntimeError,
    },

    #[error("cube '{cube}': {source}")]
    Timeout {
        cube: String,
        #[source]
        source: RuntimeError,
    },

    #[error("proxy: {0}")]
    Proxy(#[from] ProxyError),

    #[error("route written to {} but proxy reload failed: {source}", .path.display())]
    ReloadFailed {
        path: PathBuf,
        #[source]
        source: ProxyError,
    },

    #[error("workspace {workspace_id} stopped at cube '{cube}' after {completed} succeeded: {source}")]
    WorkspaceAborted {
        workspace_id: u64,
        cube: String,
        completed: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("state store: {0}")]
    State(StateError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse classification used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Timeout,
    Internal,
}

impl EngineError {
    /// Attach a cube name to a runtime failure.
    pub fn runtime(cube: &str, source: RuntimeError) -> Self {
        match source {
            RuntimeError::NotFound(name) => Self::NotFound(format!("container '{name}'")),
            source @ RuntimeError::Timeout { .. } => Self::Timeout {
                cube: cube.to_string(),
                source,
            },
            source => Self::Runtime {
                cube: cube.to_string(),
                source,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) | Self::NoLiveAddress { .. } => ErrorKind::Conflict,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Proxy(e) | Self::ReloadFailed { source: e, .. } => proxy_kind(e),
            Self::WorkspaceAborted { source, .. } => source.kind(),
            Self::Runtime { .. } | Self::State(_) => ErrorKind::Internal,
        }
    }
}

fn proxy_kind(err: &ProxyError) -> ErrorKind {
    match err {
        ProxyError::InvalidDomain { .. } => ErrorKind::Validation,
        ProxyError::Runtime(RuntimeError::Timeout { .. }) => ErrorKind::Timeout,
        _ => ErrorKind::Internal,
    }
}

impl From<StateError> for EngineError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => Self::NotFound(what),
            StateError::Conflict(what) => Self::Conflict(what),
            other => Self::State(other),
        }
    }
}
