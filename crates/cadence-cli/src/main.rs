//! Cadence command-line host.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod project;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence integration scheduler", long_about = None)]
struct Cli {
    /// Log filter, e.g. "debug" or "cadence_scheduler=trace". Overrides RUST_LOG.
    #[arg(long, global = true, env = "CADENCE_LOG")]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured project until interrupted
    Run {
        /// Path to the configuration file
        #[arg(default_value = "cadence.kdl")]
        config: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "cadence.kdl")]
        config: PathBuf,
        /// Print the parsed configuration as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which projects build through which queue
    Queues {
        /// Path to the configuration file
        #[arg(default_value = "cadence.kdl")]
        config: PathBuf,
    },
}

fn init_tracing(log_level: Option<&str>, json: bool) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

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
    init_tracing(cli.log_level.as_deref(), cli.json_logs);

    match cli.command {
        Commands::Run { config } => {
            commands::run::run(&config).await?;
        }
        Commands::Validate { config, json } => {
            commands::validate(&config, json)?;
        }
        Commands::Queues { config } => {
            commands::queues(&config)?;
        }
    }

    Ok(())
}
