use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::models::*;
use crate::errors::{Result, TrackerError};

/// Async-safe handle to the feature store.
///
/// Wraps `FeatureDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. The mutex also serializes writers
/// against each other and against readers of the single connection.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Option<FeatureDb>>>,
}

impl DbHandle {
    pub fn new(db: FeatureDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(Some(db))),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&FeatureDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| TrackerError::LockPoisoned)?;
            let db = guard.as_ref().ok_or(TrackerError::StoreClosed)?;
            f(db)
        })
        .await
        .context("DB task panicked")?
    }

    /// Close the underlying connection. Later calls fail with `StoreClosed`.
    /// Closing an already-closed handle is a no-op.
    pub async fn close(&self) -> Result<()> {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let taken = db.lock().map_err(|_| TrackerError::LockPoisoned)?.take();
            match taken {
                Some(db) => db.close(),
                None => Ok(()),
            }
        })
        .await
        .context("DB close task panicked")?
    }
}

const FEATURE_COLUMNS: &str = "id, priority, category, name, description, steps, passes";

pub struct FeatureDb {
    conn: Connection,
}

impl FeatureDb {
    /// Open (or create) the SQLite store at the given path and ensure the schema.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open feature database {}", path.display()))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.busy_timeout(Duration::from_secs(5))?;
        self.run_migrations()
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS features (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                priority INTEGER NOT NULL,
                category TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                steps TEXT NOT NULL DEFAULT '[]',
                passes INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_features_pending
                ON features(passes, priority, id);
            CREATE INDEX IF NOT EXISTS idx_features_category ON features(category);
            ",
        )?;
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| TrackerError::Database(e))
    }

    // ── Writes ────────────────────────────────────────────────────────

    pub fn create_feature(&self, feature: &NewFeature) -> Result<Feature> {
        feature.validate()?;

        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self.conn.unchecked_transaction()?;
        let id = insert_feature(&tx, feature)?;
        tx.commit()?;
        self.get_feature(id)
    }

    /// Insert a whole batch in one transaction. Every element is validated
    /// before the transaction opens; any failure leaves the table untouched.
    pub fn create_features(&self, features: &[NewFeature]) -> Result<Vec<i64>> {
        for (i, feature) in features.iter().enumerate() {
            feature.validate_with_prefix(&format!("features[{}].", i))?;
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(features.len());
        for feature in features {
            ids.push(insert_feature(&tx, feature)?);
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Set only the `passes` flag.
    pub fn update_passes(&self, id: i64, passes: bool) -> Result<Feature> {
        let changed = self.conn.execute(
            "UPDATE features SET passes = ?1 WHERE id = ?2",
            params![passes, id],
        )?;
        if changed == 0 {
            return Err(TrackerError::feature_not_found(id));
        }
        self.get_feature(id)
    }

    pub fn delete_feature(&self, id: i64) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM features WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(TrackerError::feature_not_found(id));
        }
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub fn find_feature(&self, id: i64) -> Result<Option<Feature>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM features WHERE id = ?1", FEATURE_COLUMNS),
                params![id],
                map_row,
            )
            .optional()?;
        row.map(FeatureRow::into_feature).transpose()
    }

    pub fn get_feature(&self, id: i64) -> Result<Feature> {
        self.find_feature(id)?
            .ok_or_else(|| TrackerError::feature_not_found(id))
    }

    pub fn list_features(&self, filter: &FeatureFilter, limit: i64, offset: i64) -> Result<FeaturePage> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(passes) = filter.passes {
            values.push(Value::Integer(passes as i64));
            clauses.push(format!("passes = ?{}", values.len()));
        }
        if let Some(ref category) = filter.category {
            values.push(Value::Text(category.clone()));
            clauses.push(format!("category = ?{}", values.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM features{}", where_sql),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let limit_idx = values.len() + 1;
        values.push(Value::Integer(limit));
        values.push(Value::Integer(offset));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM features{} ORDER BY priority ASC, id ASC LIMIT ?{} OFFSET ?{}",
            FEATURE_COLUMNS,
            where_sql,
            limit_idx,
            limit_idx + 1
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), map_row)?;
        let mut features = Vec::new();
        for row in rows {
            features.push(row?.into_feature()?);
        }

        let has_more = offset + (features.len() as i64) < total;
        Ok(FeaturePage {
            features,
            total,
            limit,
            offset,
            has_more,
        })
    }

    /// The most urgent feature not yet passing.
    pub fn next_pending(&self) -> Result<Feature> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM features WHERE passes = 0 ORDER BY priority ASC, id ASC LIMIT 1",
                    FEATURE_COLUMNS
                ),
                [],
                map_row,
            )
            .optional()?;
        match row {
            Some(row) => row.into_feature(),
            None => Err(TrackerError::NotFound("Pending feature".to_string())),
        }
    }

    pub fn stats(&self) -> Result<FeatureStats> {
        let (total, passing): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(passes), 0) FROM features",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(FeatureStats::from_counts(passing, total))
    }

    pub fn count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM features", [], |row| row.get(0))?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        let exists: bool = self
            .conn
            .query_row("SELECT EXISTS(SELECT 1 FROM features)", [], |row| row.get(0))?;
        Ok(!exists)
    }
}

/// Insert one validated feature, defaulting its priority to max + 1.
fn insert_feature(conn: &Connection, feature: &NewFeature) -> Result<i64> {
    let priority = match feature.priority {
        Some(p) => p,
        None => conn.query_row(
            "SELECT COALESCE(MAX(priority), 0) + 1 FROM features",
            [],
            |row| row.get(0),
        )?,
    };
    let steps = serde_json::to_string(&feature.steps).context("Failed to encode steps")?;
    conn.execute(
        "INSERT INTO features (priority, category, name, description, steps, passes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            priority,
            feature.category,
            feature.name,
            feature.description,
            steps,
            feature.passes
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<FeatureRow> {
    Ok(FeatureRow {
        id: row.get(0)?,
        priority: row.get(1)?,
        category: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        steps: row.get(5)?,
        passes: row.get(6)?,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────
