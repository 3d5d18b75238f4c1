//! One-shot legacy import (`feature-tracker migrate`).

use anyhow::{Context, Result};

use feature_tracker::config::TrackerConfig;
use feature_tracker::features::db::FeatureDb;
use feature_tracker::features::migration::{self, MigrationOutcome};

pub async fn cmd_migrate(config: &TrackerConfig) -> Result<()> {
    let db_path = config.db_path();
    let legacy_path = config.legacy_path();

    let (outcome, total) = tokio::task::spawn_blocking(move || -> Result<_> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = FeatureDb::new(&db_path)?;
        let outcome = migration::migrate_legacy_features(&db, &legacy_path)?;
        let total = db.count()?;
        db.close()?;
        Ok((outcome, total))
    })
    .await
    .context("Migration task panicked")??;

    if outcome == MigrationOutcome::NoLegacyFile {
        println!(
            "No {} found in {}",
            config.toml.storage.legacy_file,
            config.project_dir.display()
        );
    } else {
        super::serve::print_migration(&outcome);
    }
    println!("Database: {} ({} features)", config.db_path().display(), total);
    Ok(())
}
