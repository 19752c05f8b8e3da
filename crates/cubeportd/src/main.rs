//! cubeportd: the Cubeport daemon.
//!
//! Single binary that assembles:
//! - Record store (redb)
//! - Docker runtime adapter
//! - nginx route writer + proxy controller
//! - Reconciliation engine
//! - REST API + live log stream
//!
//! # Usage
//!
//! ```text
//! cubeportd serve --config /etc/cubeport/cubeportd.toml --port 8080
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cubeport_api::{ApiState, LogBroadcaster};
use cubeport_engine::Engine;
use cubeport_proxy::{NginxController, ProxyController, RouteWriter};
use cubeport_runtime::{DockerCli, DockerRuntime};
use cubeport_state::{ImageCatalog, StateStore};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{DaemonConfig, Overrides};

#[derive(Parser)]
#[command(name = "cubeportd", about = "Cubeport daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap the proxy and serve the API.
    Serve {
        /// TOML configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the record store and relative paths.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Directory for generated proxy route files.
        #[arg(long)]
        proxy_config_dir: Option<PathBuf>,

        /// Host directory substituted for `[DEFAULT]` in volume mounts.
        #[arg(long)]
        volumes_root: Option<PathBuf>,

        /// Committed-image catalog file.
        #[arg(long)]
        catalog_path: Option<PathBuf>,

        /// Upper bound on any single docker invocation, in seconds.
        #[arg(long)]
        command_timeout_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logs = LogBroadcaster::new();

    // Initialize tracing: stdout plus the live log stream.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cubeportd=debug,cubeport=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(logs.layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            proxy_config_dir,
            volumes_root,
            catalog_path,
            command_timeout_secs,
        } => {
            let mut daemon_config = DaemonConfig::load(config.as_deref())?;
            daemon_config.apply(Overrides {
                port,
                data_dir,
                proxy_config_dir,
                volumes_root,
                catalog_path,
                command_timeout_secs,
            });
            daemon_config.validate()?;
            run_serve(daemon_config, logs).await
        }
    }
}

async fn run_serve(config: DaemonConfig, logs: LogBroadcaster) -> anyhow::Result<()> {
    info!("Cubeport daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.paths.data_dir)?;

    // ── Initialize subsystems ──────────────────────────────────

    // Record store.
    let db_path = config.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "record store opened");

    // Docker runtime.
    let cli = DockerCli::new(config.docker.binary.clone(), config.command_timeout());
    let volumes_root = config.volumes_root();
    let runtime = Arc::new(DockerRuntime::new(cli.clone(), volumes_root.clone()));
    info!(binary = %config.docker.binary, volumes_root = ?volumes_root, "docker runtime initialized");

    // Proxy.
    let routes = RouteWriter::new(config.proxy_config_dir(), config.proxy.listen_port);
    let proxy = Arc::new(NginxController::new(
        cli,
        routes.clone(),
        config.nginx_settings(),
    ));
    if config.proxy.enabled {
        if let Err(e) = proxy.bootstrap().await {
            error!(error = %e, container = %config.proxy.container_name, "proxy bootstrap failed");
            return Err(e.into());
        }
        info!(
            container = %config.proxy.container_name,
            public_port = config.proxy.public_port,
            "proxy bootstrapped"
        );
    } else {
        routes.ensure_dir()?;
        info!("proxy bootstrap disabled");
    }

    // Image catalog.
    let catalog = Arc::new(ImageCatalog::new(config.catalog_path()));

    // Engine.
    let engine = Engine::new(store, runtime, routes, proxy, catalog)
        .with_service_label(config.docker.service_label.clone());
    info!("engine initialized");

    // ── Start API server ───────────────────────────────────────

    let router = cubeport_api::build_router(ApiState {
        engine: Arc::new(engine),
        logs,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Cubeport daemon stopped");
    Ok(())
}
