//! eos-bridge CLI
//!
//! Provisions topics, cleans up consumer groups and runs the exactly-once
//! passthrough worker against the configured Kafka cluster.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{ConfigCommand, GroupsCommand, RunArgs, TopicsCommand};
use eos_bridge_config::{BridgeSettings, ObservabilitySettings};
use error::CliResult;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "eos-bridge",
    version,
    about = "Exactly-once Kafka read-process-write bridge",
    long_about = "Moves records between Kafka topics inside transactions.\n\n\
                  Output records and the consumed input offsets commit together,\n\
                  so every input is reflected in the output exactly once."
)]
struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "EOS_BRIDGE_CONFIG",
        value_name = "FILE",
        help = "Path to a YAML configuration file"
    )]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Topic provisioning
    #[command(name = "topics", about = "Ensure, describe and delete topics")]
    Topics {
        #[command(subcommand)]
        command: TopicsCommand,
    },

    /// Consumer group management
    #[command(name = "groups", about = "Manage consumer groups")]
    Groups {
        #[command(subcommand)]
        command: GroupsCommand,
    },

    /// Run the passthrough worker
    #[command(name = "run", about = "Copy input topics to an output topic exactly once")]
    Run(RunArgs),

    /// Configuration inspection
    #[command(name = "config", about = "Inspect configuration settings")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let settings = BridgeSettings::load(cli.config.clone())?;
    init_tracing(&settings.observability, cli.verbose);

    match cli.command {
        Commands::Topics { command } => command.execute(&settings).await,
        Commands::Groups { command } => command.execute(&settings).await,
        Commands::Run(args) => args.execute(&settings).await,
        Commands::Config { command } => command.execute(&settings).await,
    }
}

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over the configured level; `--verbose` wins over both.
fn init_tracing(observability: &ObservabilitySettings, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("eos_bridge=debug,eos_bridge_cli=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&observability.log_level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logging {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
