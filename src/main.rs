use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feature_tracker::config::{LogFormat, TrackerConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "feature-tracker")]
#[command(version, about = "Feature tracking service for autonomous coding sessions")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory holding features.db (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Feature API port. Overrides tracker.toml and FEATURE_API_PORT.
    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the feature API until Ctrl-C
    Serve,
    /// Import feature_list.json into the database without starting the API
    Migrate,
    /// Show passing/total counts from a running API
    Stats,
    /// Show the next pending feature
    Next,
    /// List features
    List {
        /// Only passing (true) or failing (false) features
        #[arg(long)]
        passes: Option<bool>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Mark a feature as passing
    Mark {
        id: i64,
        /// Mark as failing instead
        #[arg(long)]
        failing: bool,
    },
    /// Print the progress summary and notify the webhook if configured
    Progress,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show,
    /// Check tracker.toml for problems
    Validate,
    /// Write a tracker.toml with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = TrackerConfig::with_cli_args(project_dir, cli.port, cli.verbose, cli.log_format)?;
    feature_tracker::logging::init(&config.log_filter(), config.log_format())?;

    match &cli.command {
        Commands::Serve => cmd::cmd_serve(&config).await?,
        Commands::Migrate => cmd::cmd_migrate(&config).await?,
        Commands::Stats => cmd::cmd_stats(&config).await?,
        Commands::Next => cmd::cmd_next(&config).await?,
        Commands::List {
            passes,
            category,
            limit,
            offset,
        } => cmd::cmd_list(&config, *passes, category.clone(), *limit, *offset).await?,
        Commands::Mark { id, failing } => cmd::cmd_mark(&config, *id, !*failing).await?,
        Commands::Progress => cmd::cmd_progress(&config).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
