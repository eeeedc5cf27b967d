//! aipg CLI - install, start and inspect local AI backend services.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

/// aipg - manage the local AI backends of the playground
#[derive(Parser)]
#[command(name = "aipg")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base directory holding environments and service directories
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Register preview-only backends
    #[arg(long, global = true)]
    preview: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered services and their status
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Install a service, showing setup progress
    Setup {
        /// Service name, e.g. ai-backend
        service: String,
    },

    /// Start one service and keep it running until Ctrl-C
    Start {
        /// Service name
        service: String,
        /// Device id to run on
        #[arg(long)]
        device: Option<String>,
    },

    /// Start every installed service and keep them running until Ctrl-C
    Boot,

    /// Detect the compute devices a service would run on
    Devices {
        /// Service name
        service: String,
    },

    /// Remove a service installation
    Uninstall {
        /// Service name
        service: String,
    },

    /// Show directories and configuration
    Info,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let options = commands::Options {
        base_dir: cli.base_dir,
        preview: cli.preview,
    };

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| miette::miette!("Failed to start async runtime: {}", e))?;

    match cli.command {
        Commands::List { json } => runtime.block_on(commands::list::run(&options, json)),
        Commands::Setup { service } => runtime.block_on(commands::setup::run(&options, &service)),
        Commands::Start { service, device } => {
            runtime.block_on(commands::start::run(&options, &service, device.as_deref()))
        }
        Commands::Boot => runtime.block_on(commands::start::boot(&options)),
        Commands::Devices { service } => {
            runtime.block_on(commands::devices::run(&options, &service))
        }
        Commands::Uninstall { service } => {
            runtime.block_on(commands::uninstall::run(&options, &service))
        }
        Commands::Info => commands::info::run(&options),
    }
}
