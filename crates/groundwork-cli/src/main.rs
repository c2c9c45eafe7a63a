mod dispatch;
mod prompt;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::dispatch::run_cli;

const LOG_ENV: &str = "GROUNDWORK_LOG";

#[derive(Parser, Debug)]
#[command(name = "groundwork")]
#[command(about = "Keeps a repository's managed scaffold in step with its templates", long_about = None)]
struct Cli {
    /// Repository root. Defaults to $GROUNDWORK_ROOT, then the working directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Answer yes to every confirmation.
    #[arg(short = 'y', long, global = true)]
    yes: bool,
    /// Unadorned output without status badges.
    #[arg(long, global = true)]
    plain: bool,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the managed surface into a repository without one.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Explain every managed path that differs from the templates.
    Status,
    /// Show the migrations an upgrade would run.
    Plan,
    Upgrade {
        /// Overwrite locally changed template files.
        #[arg(long)]
        force: bool,
    },
    Rollback {
        snapshot_id: String,
    },
    Snapshots,
    Baseline {
        #[command(subcommand)]
        command: BaselineCommands,
    },
    Versions,
}

#[derive(Subcommand, Debug)]
enum BaselineCommands {
    /// Write a baseline for a repository that never recorded one.
    Backfill,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run_cli(cli)
}

fn init_tracing(verbose: u8) {
    let directive = log_directive(verbose, std::env::var(LOG_ENV).ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// `-v` wins over the environment; the default keeps stderr quiet.
fn log_directive(verbose: u8, env_value: Option<String>) -> String {
    match verbose {
        0 => env_value
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "warn".to_string()),
        1 => "info".to_string(),
        _ => "debug".to_string(),
    }
}
