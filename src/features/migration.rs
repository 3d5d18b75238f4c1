//! One-time import of the legacy `feature_list.json` into the feature store.
//!
//! The guard is deliberately coarse: a non-empty store means "already
//! imported". A crash after the batch commits but before the file is
//! archived therefore leaves the file behind on the next start, and that
//! start skips the import. Lingering files are preferred over duplicate rows.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::db::FeatureDb;
use super::models::NewFeature;
use crate::errors::{Result, TrackerError};

pub const LEGACY_FILE_NAME: &str = "feature_list.json";

/// Longest name derived from a description when the legacy entry has none.
const DERIVED_NAME_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    NoLegacyFile,
    /// The store already holds rows; the legacy file was left untouched.
    AlreadyMigrated,
    Imported {
        count: usize,
        /// `None` when the rows committed but the rename failed.
        archived_to: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
struct LegacyFeature {
    #[serde(default)]
    category: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default)]
    passes: bool,
}

impl LegacyFeature {
    fn into_new_feature(self) -> NewFeature {
        let name = match self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => derive_name(&self.description),
        };
        NewFeature {
            category: self.category,
            name,
            description: self.description,
            steps: self.steps,
            // File order is the priority order; any legacy `priority` is ignored.
            priority: None,
            passes: self.passes,
        }
    }
}

fn derive_name(description: &str) -> String {
    let first_line = description.lines().next().unwrap_or("").trim();
    first_line.chars().take(DERIVED_NAME_MAX_CHARS).collect()
}

/// Parse the legacy document, preserving entry order. Accepts a bare array
/// or an object with a `features` array.
pub fn parse_legacy(content: &str) -> std::result::Result<Vec<NewFeature>, String> {
    let doc: serde_json::Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let entries = match doc {
        serde_json::Value::Array(_) => doc,
        serde_json::Value::Object(mut map) => map
            .remove("features")
            .ok_or_else(|| "expected a JSON array or an object with a `features` array".to_string())?,
        _ => return Err("expected a JSON array of features".to_string()),
    };
    let legacy: Vec<LegacyFeature> =
        serde_json::from_value(entries).map_err(|e| e.to_string())?;
    Ok(legacy.into_iter().map(LegacyFeature::into_new_feature).collect())
}

pub fn archive_path(legacy_path: &Path, now: DateTime<Utc>) -> PathBuf {
    let file_name = legacy_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| LEGACY_FILE_NAME.to_string());
    legacy_path.with_file_name(format!(
        "{}.migrated.{}",
        file_name,
        now.format("%Y%m%dT%H%M%SZ")
    ))
}

pub fn migrate_legacy_features(db: &FeatureDb, legacy_path: &Path) -> Result<MigrationOutcome> {
    migrate_legacy_features_at(db, legacy_path, Utc::now())
}

/// Run the import with an explicit archive timestamp.
pub fn migrate_legacy_features_at(
    db: &FeatureDb,
    legacy_path: &Path,
    now: DateTime<Utc>,
) -> Result<MigrationOutcome> {
    if !legacy_path.exists() {
        return Ok(MigrationOutcome::NoLegacyFile);
    }

    if !db.is_empty()? {
        info!(
            path = %legacy_path.display(),
            "Feature store already populated; leaving legacy file in place"
        );
        return Ok(MigrationOutcome::AlreadyMigrated);
    }

    let fail = |reason: String| TrackerError::Migration {
        path: legacy_path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(legacy_path).map_err(|e| fail(e.to_string()))?;
    let features = parse_legacy(&content).map_err(fail)?;
    db.create_features(&features)
        .map_err(|e| fail(e.to_string()))?;

    let target = archive_path(legacy_path, now);
    let archived_to = match std::fs::rename(legacy_path, &target) {
        Ok(()) => Some(target),
        Err(e) => {
            warn!(
                path = %legacy_path.display(),
                error = %e,
                "Imported legacy features but could not archive the file; it will be ignored on later starts"
            );
            None
        }
    };

    info!(
        count = features.len(),
        archived_to = ?archived_to,
        "Migrated legacy feature list"
    );
    Ok(MigrationOutcome::Imported {
        count: features.len(),
        archived_to,
    })
}
