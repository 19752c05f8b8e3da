//! Cubeport reverse proxy: nginx route generation and process control.
//!
//! Maps a public domain onto a live container address by writing one nginx
//! `server` block per domain into a directory that the proxy container
//! mounts as `/etc/nginx/conf.d`, then asking nginx to reload.
//!
//! # Components
//!
//! - **`config`**: Renders server blocks and manages `<domain>.conf` files
//! - **`controller`**: Bootstraps and reloads the proxy container

pub mod config;
pub mod controller;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;

pub use config::{RouteWriter, render_server_block, validate_domain};
pub use controller::{NginxController, NginxSettings, ProxyController, ProxyFuture};
pub use error::{ProxyError, ProxyResult};
#[cfg(any(test, feature = "testing"))]
pub use fake::RecordingController;
