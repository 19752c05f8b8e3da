//! nginx route generation.
//!
//! Each provisioned domain owns exactly one file, `<domain>.conf`, in the
//! route directory. Files are written to a sibling temp name that nginx's
//! `*.conf` include does not match, then renamed into place, so a reload
//! never observes a half-written block.

use std::fs;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ProxyError, ProxyResult};

const ROUTE_EXTENSION: &str = "conf";

/// Check that a domain is safe to use as a file name and a config token.
pub fn validate_domain(domain: &str) -> ProxyResult<()> {
    let fail = |reason| {
        Err(ProxyError::InvalidDomain {
            domain: domain.to_string(),
            reason,
        })
    };
    if domain.is_empty() {
        return fail("empty");
    }
    if domain.len() > 253 {
        return fail("longer than 253 characters");
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return fail("leading or trailing dot");
    }
    if domain.contains("..") {
        return fail("empty label");
    }
    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return fail("only letters, digits, '-', '_' and '.' are allowed");
    }
    Ok(())
}

/// Render the nginx server block that routes `domain` to `ip:port`.
pub fn render_server_block(domain: &str, ip: &str, port: u16, listen_port: u16) -> String {
    format!(
        "server {{
    listen {listen_port};
    server_name {domain};

    location / {{
        proxy_pass http://{ip}:{port};
        proxy_http_version 1.1;
        proxy_set_header Host $http_host;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection upgrade;
        proxy_set_header Accept-Encoding gzip;
    }}
}}
"
    )
}

/// Owns the route directory mounted into the proxy container.
#[derive(Debug, Clone)]
pub struct RouteWriter {
    dir: PathBuf,
    listen_port: u16,
}

impl RouteWriter {
    /// `listen_port` is the port nginx listens on inside its container.
    pub fn new(dir: impl Into<PathBuf>, listen_port: u16) -> Self {
        Self {
            dir: dir.into(),
            listen_port,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the route file for `domain`.
    pub fn route_path(&self, domain: &str) -> ProxyResult<PathBuf> {
        validate_domain(domain)?;
        Ok(self.dir.join(format!("{domain}.{ROUTE_EXTENSION}")))
    }

    /// Write (or replace) the route for `domain` and return its path.
    pub fn write_route(&self, domain: &str, ip: &str, port: u16) -> ProxyResult<PathBuf> {
        let path = self.route_path(domain)?;
        if ip.parse::<IpAddr>().is_err() {
            return Err(ProxyError::InvalidUpstream(ip.to_string()));
        }
        self.ensure_dir()?;

        let block = render_server_block(domain, ip, port, self.listen_port);
        let tmp = self.dir.join(format!("{domain}.{ROUTE_EXTENSION}.tmp"));
        fs::write(&tmp, block).map_err(|e| ProxyError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| ProxyError::io(&path, e))?;

        info!(%domain, upstream = %format!("{ip}:{port}"), path = %path.display(), "route written");
        Ok(path)
    }

    /// Remove the route for `domain`. Returns whether a file existed.
    pub fn remove_route(&self, domain: &str) -> ProxyResult<bool> {
        let path = self.route_path(domain)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(%domain, "route removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ProxyError::io(path, e)),
        }
    }

    /// Create the route directory if needed.
    pub fn ensure_dir(&self) -> ProxyResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| ProxyError::io(&self.dir, e))
    }

    /// Delete everything in the route directory. A missing directory is
    /// already clear. Returns the number of entries removed.
    pub fn clear(&self) -> ProxyResult<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ProxyError::io(&self.dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| ProxyError::io(&self.dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| ProxyError::io(&path, e))?;
            let result = if file_type.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|e| ProxyError::io(&path, e))?;
            removed += 1;
        }
        debug!(dir = %self.dir.display(), removed, "route directory cleared");
        Ok(removed)
    }

    /// Domains that currently have a route file, sorted.
    pub fn list_routes(&self) -> ProxyResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ProxyError::io(&self.dir, e)),
        };

        let mut domains = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ProxyError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ROUTE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                domains.push(stem.to_string());
            }
        }
        domains.sort();
        Ok(domains)
    }
}
