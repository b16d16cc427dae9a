//! `pulseforge` -- operator CLI for the enhancement pipeline.
//!
//! Subcommands:
//!
//! - `pulseforge run` -- drive the pipeline over a JSONL file (or stdin)
//!   of change events, printing ingested records and a dead-letter summary.
//! - `pulseforge score` -- score one pulse and print the breakdown.
//! - `pulseforge decide` -- run the admission decision for one pulse.
//! - `pulseforge config` -- print the resolved pipeline configuration.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// pulseforge enhancement pipeline CLI.
#[derive(Parser)]
#[command(name = "pulseforge", about = "pulse enhancement pipeline CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over a file or stream of change events.
    Run(commands::run::RunArgs),

    /// Score a single pulse and print the breakdown.
    Score(commands::score::ScoreArgs),

    /// Run the admission decision for a single pulse.
    Decide(commands::decide::DecideArgs),

    /// Print the resolved pipeline configuration.
    Config(commands::config_cmd::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Score(args) => commands::score::run(args),
        Commands::Decide(args) => commands::decide::run(args).await,
        Commands::Config(args) => commands::config_cmd::run(args),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
