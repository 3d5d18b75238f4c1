//! Feature API server command (`feature-tracker serve`).

use anyhow::{Context, Result};

use feature_tracker::config::TrackerConfig;
use feature_tracker::features::migration::MigrationOutcome;
use feature_tracker::features::{FeatureServer, ServiceState};

pub async fn cmd_serve(config: &TrackerConfig) -> Result<()> {
    let mut server = FeatureServer::new(config.server_config()?);
    let addr = server.start().await?;

    if let Some(outcome) = server.migration_outcome() {
        print_migration(outcome);
    }
    println!(
        "{} Feature API listening on http://{}",
        console::style("✓").green(),
        addr
    );
    println!("{}", console::style("Press Ctrl-C to stop.").dim());

    let mut state = server.subscribe();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
        }
        _ = state.wait_for(|s| *s == ServiceState::Stopped) => {
            // Served until the listener died on its own.
        }
    }

    println!("Stopping feature API...");
    server.stop().await?;
    println!("Stopped.");
    Ok(())
}

pub(crate) fn print_migration(outcome: &MigrationOutcome) {
    match outcome {
        MigrationOutcome::NoLegacyFile => {}
        MigrationOutcome::AlreadyMigrated => println!(
            "{} Database already populated; legacy feature list left in place",
            console::style("⚠").yellow()
        ),
        MigrationOutcome::Imported {
            count,
            archived_to: Some(path),
        } => println!(
            "{} Imported {} legacy features (archived to {})",
            console::style("✓").green(),
            count,
            path.display()
        ),
        MigrationOutcome::Imported {
            count,
            archived_to: None,
        } => println!(
            "{} Imported {} legacy features, but the legacy file could not be archived",
            console::style("⚠").yellow(),
            count
        ),
    }
}
