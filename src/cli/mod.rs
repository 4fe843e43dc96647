//! Thin `clap` entrypoint (§1 ambient CLI surface): `serve` runs the full pipeline,
//! `mcp` runs the MCP tool surface, `init` and `doctor` are operational helpers.
//! Neither the HTTP/WS routing nor the MCP wire framing live here — this module only
//! resolves a `Config` and hands it to `server::serve` / `mcp::run_mcp_server`.

mod doctor;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::constants;

#[derive(Parser, Debug)]
#[command(name = "kbase")]
#[command(author, version = env!("CARGO_PKG_VERSION_FULL"), about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    pub loglevel: String,

    /// Suppress informational console output (errors still print)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a kbase.yaml config file (defaults to built-in defaults + env overrides)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline: indexer, sync engine, filesystem observer, HTTP API.
    Serve {
        /// Managed root directory (defaults to the current directory)
        path: Option<PathBuf>,

        /// HTTP port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the MCP tool surface over stdio.
    Mcp {
        /// Managed root directory (defaults to the current directory)
        path: Option<PathBuf>,
    },

    /// Create a managed root and its on-disk databases, without starting a server.
    Init {
        /// Directory to initialize (defaults to the current directory)
        path: Option<PathBuf>,
    },

    /// Sanity-check an existing installation.
    Doctor {
        /// Managed root to check (defaults to the current directory)
        path: Option<PathBuf>,
    },
}

fn load_config(config_path: Option<&Path>, root_override: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::load(config_path)?;
    if let Some(root) = root_override {
        config.root_path = root;
    }
    Ok(config)
}

fn db_dir_for(config: &Config) -> PathBuf {
    let root = config
        .root_path
        .canonicalize()
        .unwrap_or_else(|_| config.root_path.clone());
    root.join(constants::DB_DIR_NAME)
}

pub async fn run(cancel_token: CancellationToken) -> Result<()> {
    let cli = Cli::parse();

    if cli.quiet {
        crate::output::set_quiet(true);
    }
    let log_level =
        crate::logger::LogLevel::from_str(&cli.loglevel).unwrap_or(crate::logger::LogLevel::Info);

    match cli.command {
        Commands::Serve { path, port } => {
            let mut config = load_config(cli.config.as_deref(), path)?;
            if let Some(port) = port {
                config.http_port = port;
            }
            // init_logger is the first and only call that sets the global subscriber
            // for long-running commands — main.rs deliberately skips it for these.
            if let Err(e) = crate::logger::init_logger(&db_dir_for(&config), log_level, cli.quiet)
            {
                eprintln!("Warning: failed to initialize file logger: {e}");
            }
            crate::server::serve(config, cancel_token).await
        }
        Commands::Mcp { path } => {
            let config = load_config(cli.config.as_deref(), path)?;
            // stdout is the MCP wire — logging must never touch it, only stderr/file.
            if let Err(e) = crate::logger::init_logger(&db_dir_for(&config), log_level, true) {
                eprintln!("Warning: failed to initialize file logger: {e}");
            }
            crate::mcp::run_mcp_server(config, cancel_token).await
        }
        Commands::Init { path } => doctor::init(load_config(cli.config.as_deref(), path)?).await,
        Commands::Doctor { path } => doctor::run(load_config(cli.config.as_deref(), path)?).await,
    }
}
