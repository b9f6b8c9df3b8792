//! infergridd — the InferGrid daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb)
//! - Service registry + heartbeat sweep
//! - Admission controller + spend reconciliation
//! - Routing engine, vendor keys, HTTP provider
//! - Autoscaler + scale loop
//! - Gateway (axum)
//!
//! # Usage
//!
//! ```text
//! infergridd serve --config /etc/infergrid/infergrid.toml --port 8080
//! infergridd default-config > infergrid.toml
//! ```

mod control_plane;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use infergrid_core::PlatformConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::control_plane::ControlPlane;

const DEFAULT_FILTER: &str = "info,infergridd=debug,infergrid=debug";

#[derive(Parser)]
#[command(name = "infergridd", about = "InferGrid control plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane and serve the gateway.
    Serve {
        /// Path to infergrid.toml. Built-in defaults apply without one.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on. Overrides `[server] port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state. Overrides `[server] data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },

    /// Print the built-in configuration as TOML.
    DefaultConfig,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            log_json,
        } => {
            init_tracing(log_json);
            let mut platform = match &config {
                Some(path) => PlatformConfig::from_file(path)?,
                None => PlatformConfig::default(),
            };
            if let Some(port) = port {
                platform.server.port = port;
            }
            if let Some(dir) = data_dir {
                platform.server.data_dir = dir;
            }
            info!(config = ?config, port = platform.server.port, "InferGrid daemon starting");
            ControlPlane::open(platform)?.run().await
        }
        Command::DefaultConfig => {
            print!("{}", PlatformConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}
