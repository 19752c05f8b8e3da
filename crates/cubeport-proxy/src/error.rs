//! Error types for proxy provisioning.

use std::path::PathBuf;

use cubeport_runtime::RuntimeError;
use thiserror::Error;

/// Result type alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: &'static str },

    #[error("invalid upstream address '{0}'")]
    InvalidUpstream(String),

    #[error("route file {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("proxy container: {0}")]
    Runtime(#[from] RuntimeError),
}

impl ProxyError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
