//! fleetd — the FleetGrid daemon.
//!
//! Single binary that assembles the fleet control plane:
//! - State store (redb)
//! - Cloud backends (OpenStack, Google Compute Engine)
//! - Member controller + swarm coordinator
//! - REST API, including the instance check-in callback
//!
//! # Usage
//!
//! ```text
//! fleetd --config /etc/fleetgrid/fleetd.toml serve --port 8480
//! fleetd --config /etc/fleetgrid/fleetd.toml check-config
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use fleetgrid_api::{ApiState, build_router};
use fleetgrid_cloud::BackendRegistry;
use fleetgrid_state::StateStore;

use crate::config::FleetConfig;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleetgrid=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid daemon")]
struct Cli {
    /// Path to fleetd.toml. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Serve {
        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `server.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Parse and validate the configuration, then print it.
    CheckConfig,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FleetConfig> {
    let config = match path {
        Some(path) => FleetConfig::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => FleetConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Serve { port, data_dir } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            run_serve(config).await
        }
        Command::CheckConfig => {
            let lifecycle = config.lifecycle_config();
            let backends = BackendRegistry::from_config(&config.clouds)?;
            println!("{}", config.to_toml_string()?);
            println!("# callback base url: {}", lifecycle.callback_base_url);
            println!("# configured clouds: {:?}", backends.configured());
            Ok(())
        }
    }
}

async fn run_serve(config: FleetConfig) -> anyhow::Result<()> {
    info!("FleetGrid daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)
        .with_context(|| format!("creating {}", config.server.data_dir.display()))?;
    let db_path = config.server.data_dir.join("fleetgrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let backends = BackendRegistry::from_config(&config.clouds)?;

    let lifecycle = config.lifecycle_config();
    info!(
        callback = %lifecycle.callback_base_url,
        max_parallel = lifecycle.max_parallel,
        timeout = ?lifecycle.backend_timeout,
        "lifecycle controller initialized"
    );

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState::new(store, backends, lifecycle));
    let ip = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let addr = SocketAddr::new(ip, config.server.port);

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("FleetGrid daemon stopped");
    Ok(())
}
