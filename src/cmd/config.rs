//! Configuration view and validation commands (`feature-tracker config`).

use anyhow::{Result, bail};

use feature_tracker::config::{CONFIG_FILE_NAME, TrackerConfig, TrackerToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: &TrackerConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.project_dir.join(CONFIG_FILE_NAME);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Feature Tracker Configuration");
            println!("=============================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("Config file: (none, using defaults)");
            }
            println!();

            println!("[server]");
            println!("  host = \"{}\"", config.toml.server.host);
            match config.port() {
                Ok(port) => println!("  port = {}", port),
                Err(e) => println!("  port = {}", console::style(format!("{:#}", e)).red()),
            }
            println!("  shutdown_grace_secs = {}", config.toml.server.shutdown_grace_secs);
            println!();

            println!("[storage]");
            println!("  database = \"{}\"", config.db_path().display());
            println!("  legacy_file = \"{}\"", config.legacy_path().display());
            println!();

            println!("[progress]");
            match config.webhook_url() {
                Some(url) => println!("  webhook_url = \"{}\"", url),
                None => println!("  webhook_url = (not set)"),
            }
            println!("  cache_file = \"{}\"", config.cache_path().display());
            println!();

            println!("[logging]");
            println!("  filter = \"{}\"", config.log_filter());
            println!("  format = \"{}\"", config.log_format());
        }
        Some(ConfigCommands::Validate) => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("{} Configuration is valid", console::style("✓").green());
            } else {
                for problem in &problems {
                    println!("  {} {}", console::style("✗").red(), problem);
                }
                bail!("{} configuration problem(s) found", problems.len());
            }
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists. Use --force to overwrite.",
                    config_path.display()
                );
            }
            std::fs::create_dir_all(&config.project_dir)?;
            TrackerToml::default().save(&config_path)?;
            println!("Wrote {}", config_path.display());
        }
    }

    Ok(())
}
