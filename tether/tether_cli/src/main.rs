use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tether_concurrency::ToolkitConfig;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{config, leak, lock, pool};

/// Tether Command Line Interface
///
/// Drives the concurrency toolkit: compares lock disciplines, checks bounded
/// runs for leaks, measures pooled decoding and shows the loaded settings.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// TOML configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr (RUST_LOG takes precedence)
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare exclusive and shared locking under a reader/writer workload
    #[clap(name = "lock-bench")]
    LockBench(lock::LockBenchArgs),

    /// Abandon many slow tasks and check that every one of them exits
    #[clap(name = "leak-check")]
    LeakCheck(leak::LeakCheckArgs),

    /// Compare pooled and freshly allocated record decoding
    #[clap(name = "pool-bench")]
    PoolBench(pool::PoolBenchArgs),

    /// Print the effective toolkit configuration as TOML
    #[clap(name = "show-config")]
    ShowConfig,

    /// Resolve server settings from the environment once and print them
    #[clap(name = "server-config")]
    ServerConfig(config::ServerConfigArgs),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Also forwards `log` records from the library
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ToolkitConfig> {
    match path {
        Some(path) => ToolkitConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(ToolkitConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let toolkit = load_config(cli.config.as_ref())?;
    log::debug!("Loaded configuration: {:?}", toolkit);

    match cli.command {
        Commands::LockBench(args) => lock::execute(&args, &toolkit),
        Commands::LeakCheck(args) => leak::execute(&args, &toolkit),
        Commands::PoolBench(args) => pool::execute(&args, &toolkit),
        Commands::ShowConfig => config::show(&toolkit),
        Commands::ServerConfig(args) => config::execute_server(&args),
    }
}
