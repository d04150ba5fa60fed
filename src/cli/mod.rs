//! Command-line interface for the refinery.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::{LogConfig, LoggerImpl};

#[derive(Parser, Debug)]
#[command(name = "refinery")]
#[command(about = "Refinery - priority merge queue for worker branches", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .refinery/config.yaml + local.yaml)
    #[arg(short, long, global = true, env = "REFINERY_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the processing daemon in the foreground
    Daemon(commands::daemon::DaemonArgs),

    /// Show the merge queue in processing order
    Queue,

    /// Submit a worker branch to the merge queue
    Submit(commands::queue::SubmitArgs),

    /// Reject a merge request
    Reject(commands::queue::RejectArgs),

    /// Show daemon and queue status
    Status,

    /// Ask a running daemon to stop
    Stop,

    /// Ask a running daemon to run a cycle now
    Wake,

    /// Process outcome messages addressed to the supervisor
    Supervise(commands::supervise::SuperviseArgs),

    /// Print the effective configuration
    Config,
}

/// Load configuration, start logging and run the selected command.
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))
        .context("Failed to initialize logging")?;
    let json = cli.json;

    match cli.command {
        Commands::Daemon(args) => commands::daemon::execute(args, config, json).await,
        Commands::Queue => commands::queue::show_queue(config, json).await,
        Commands::Submit(args) => commands::queue::submit(args, config, json).await,
        Commands::Reject(args) => commands::queue::reject(args, config, json).await,
        Commands::Status => commands::control::status(config, json).await,
        Commands::Stop => commands::control::stop(&config, json),
        Commands::Wake => commands::control::wake(&config, json),
        Commands::Supervise(args) => commands::supervise::execute(args, config, json).await,
        Commands::Config => commands::config::show(config, json),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Report a command failure and exit non-zero.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        let payload = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": chain.get(1..).unwrap_or_default(),
        });
        println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
