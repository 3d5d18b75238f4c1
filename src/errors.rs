//! Typed error hierarchy for the feature tracker.
//!
//! Five domain conditions map directly onto caller-visible outcomes:
//! - `Validation`: malformed, missing or forbidden fields (HTTP 422)
//! - `NotFound`: unknown id or nothing pending (HTTP 404)
//! - `Migration`: legacy import failed; store untouched, retry next start
//! - `Startup`: the listener could not come up
//! - `ShutdownTimeout`: graceful drain exceeded its budget
//!
//! The remaining variants wrap infrastructure failures and surface as 500s.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        /// Names of the offending fields, in the order they were detected.
        fields: Vec<String>,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Migration of {path} failed: {reason}")]
    Migration { path: PathBuf, reason: String },

    #[error("Failed to start feature API on {addr}: {reason}")]
    Startup { addr: String, reason: String },

    #[error("Shutdown did not finish within {grace:?}; remaining connections were terminated")]
    ShutdownTimeout { grace: Duration },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Feature store is closed")]
    StoreClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrackerError {
    /// Validation failure attributed to a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: vec![field.into()],
        }
    }

    pub fn feature_not_found(id: i64) -> Self {
        Self::NotFound(format!("Feature {}", id))
    }

    /// Whether this is an ordinary absence rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Field names carried by a validation failure; empty for other variants.
    pub fn fields(&self) -> &[String] {
        match self {
            Self::Validation { fields, .. } => fields,
            _ => &[],
        }
    }
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
