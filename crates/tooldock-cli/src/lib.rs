//! Command line interface for the tooldock server

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tooldock_core::Catalog;
use tooldock_engine::{parse_limit, Engine, EngineConfig};
use tooldock_paths::Roots;
use tooldock_server::{AppState, Broker};

mod tracing_setup;

pub use tracing_setup::setup_tracing;

/// Environment variable carrying the download limit when no CLI flag is
/// given
const DOWNLOAD_LIMIT_ENV: &str = "DOWNLOAD_LIMIT_BPS";

#[derive(Parser)]
#[command(name = "tooldock", about = "Remote-tool acquisition and lifecycle server", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP + SSE server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8333")]
        addr: SocketAddr,

        /// Path of the catalog JSON file
        #[arg(long, default_value = "tools.json")]
        catalog: PathBuf,

        /// Writable storage root
        #[arg(long, default_value = ".tooldock")]
        storage_dir: PathBuf,

        /// Read-only storage roots, searched before the writable one
        /// (repeatable, in precedence order)
        #[arg(long)]
        readonly_dir: Vec<PathBuf>,

        /// Writable-exec root used when the storage root is mounted noexec
        #[arg(long)]
        tmp_exec_dir: Option<PathBuf>,

        /// Download limit in bytes/sec ("_" and "," separators accepted,
        /// 0 disables); overrides DOWNLOAD_LIMIT_BPS
        #[arg(long)]
        download_limit: Option<String>,
    },

    /// Remove installed versions that are no longer in the catalog
    Sweep {
        /// Path of the catalog JSON file
        #[arg(long, default_value = "tools.json")]
        catalog: PathBuf,

        /// Writable storage root
        #[arg(long, default_value = ".tooldock")]
        storage_dir: PathBuf,
    },

    /// Print the grouped tool listing as JSON
    List {
        /// Path of the catalog JSON file
        #[arg(long, default_value = "tools.json")]
        catalog: PathBuf,

        /// Writable storage root
        #[arg(long, default_value = ".tooldock")]
        storage_dir: PathBuf,

        /// Read-only storage roots (repeatable)
        #[arg(long)]
        readonly_dir: Vec<PathBuf>,
    },
}

/// Resolve the effective download limit: CLI flag wins over the
/// environment, absence means unlimited
fn effective_limit(flag: Option<&str>) -> Result<u64> {
    if let Some(flag) = flag {
        return parse_limit(flag)
            .with_context(|| format!("invalid --download-limit value: {}", flag));
    }
    match std::env::var(DOWNLOAD_LIMIT_ENV) {
        Ok(value) => parse_limit(&value)
            .with_context(|| format!("invalid {} value: {}", DOWNLOAD_LIMIT_ENV, value)),
        Err(_) => Ok(0),
    }
}

fn build_engine(
    catalog_path: &PathBuf,
    storage_dir: PathBuf,
    readonly_dirs: Vec<PathBuf>,
    tmp_exec_dir: Option<PathBuf>,
    limit_bps: u64,
    broker: Arc<Broker>,
) -> Result<Engine> {
    let catalog = Catalog::from_file(catalog_path)
        .with_context(|| format!("failed to load catalog {}", catalog_path.display()))?;
    let roots = Roots::new(storage_dir, readonly_dirs, tmp_exec_dir);
    Ok(Engine::new(EngineConfig {
        catalog,
        roots,
        download_limit_bps: limit_bps,
        sink: broker,
    })?)
}

/// Main entry point for the tooldock CLI
pub async fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            addr,
            catalog,
            storage_dir,
            readonly_dir,
            tmp_exec_dir,
            download_limit,
        } => {
            let limit = effective_limit(download_limit.as_deref())?;
            let broker = Arc::new(Broker::new());
            let engine = build_engine(
                &catalog,
                storage_dir,
                readonly_dir,
                tmp_exec_dir,
                limit,
                broker.clone(),
            )?;
            engine.start_background_sweep();

            let state = Arc::new(AppState::new(engine, broker));
            tooldock_server::serve(state, addr).await?;
            Ok(())
        }

        Command::Sweep {
            catalog,
            storage_dir,
        } => {
            let engine = build_engine(
                &catalog,
                storage_dir,
                Vec::new(),
                None,
                0,
                Arc::new(Broker::new()),
            )?;
            engine.delete_unknown()?;
            Ok(())
        }

        Command::List {
            catalog,
            storage_dir,
            readonly_dir,
        } => {
            let engine = build_engine(
                &catalog,
                storage_dir,
                readonly_dir,
                None,
                0,
                Arc::new(Broker::new()),
            )?;
            println!("{}", serde_json::to_string_pretty(&engine.list_tools())?);
            Ok(())
        }
    }
}
