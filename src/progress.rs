//! Progress summary and webhook notifications.
//!
//! After each worker session the host asks the running feature API for
//! stats. When a webhook is configured and more features pass than last
//! time, a `test_progress` event listing the newly passing features is
//! posted. The last reported state lives in `.progress_cache` in the
//! project directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::features::client::FeatureClient;
use crate::features::models::{Feature, FeatureFilter, FeatureStats, MAX_PAGE_LIMIT};

pub const CACHE_FILE_NAME: &str = ".progress_cache";
pub const PROGRESS_EVENT: &str = "test_progress";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// What was last reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressCache {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub passing_ids: Vec<i64>,
}

impl ProgressCache {
    /// `None` if the file is missing; an unreadable file counts as empty.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(cache) => Some(cache),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unreadable progress cache");
                Some(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string(self).context("Failed to serialize progress cache")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write progress cache: {}", path.display()))
    }
}

/// Payload posted to the webhook (wrapped in a one-element array).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub event: String,
    pub passing: i64,
    pub total: i64,
    pub percentage: f64,
    pub previous_passing: i64,
    pub tests_completed_this_session: i64,
    pub completed_tests: Vec<String>,
    pub project: String,
    pub timestamp: String,
}

/// `[category] description` for every passing feature not in `previous`.
pub fn newly_completed(passing: &[Feature], previous: &HashSet<i64>) -> Vec<String> {
    passing
        .iter()
        .filter(|f| !previous.contains(&f.id))
        .map(|f| {
            let desc = if f.description.is_empty() {
                format!("Feature #{}", f.id)
            } else {
                f.description.clone()
            };
            if f.category.is_empty() {
                desc
            } else {
                format!("[{}] {}", f.category, desc)
            }
        })
        .collect()
}

pub fn build_event(
    stats: &FeatureStats,
    previous: &ProgressCache,
    completed_tests: Vec<String>,
    project: &str,
    now: DateTime<Utc>,
) -> ProgressEvent {
    ProgressEvent {
        event: PROGRESS_EVENT.to_string(),
        passing: stats.passing,
        total: stats.total,
        percentage: stats.percentage,
        previous_passing: previous.count,
        tests_completed_this_session: stats.passing - previous.count,
        completed_tests,
        project: project.to_string(),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

/// One line for the console.
pub fn summary_line(stats: &FeatureStats) -> String {
    if stats.total > 0 {
        format!(
            "Progress: {}/{} tests passing ({:.1}%)",
            stats.passing, stats.total, stats.percentage
        )
    } else {
        "Progress: No features in database yet".to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    NotConfigured,
    /// Passing count did not increase since the cached value.
    NoProgress,
    Sent { completed: usize },
    /// The event was built but delivery failed; the cache still advanced.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub stats: FeatureStats,
    pub webhook: WebhookOutcome,
}

pub struct ProgressReporter {
    client: FeatureClient,
    http: reqwest::Client,
    webhook_url: Option<String>,
    cache_path: PathBuf,
    project: String,
}

impl ProgressReporter {
    pub fn new(
        client: FeatureClient,
        webhook_url: Option<String>,
        project_dir: &Path,
        cache_path: PathBuf,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("Failed to build webhook client")?;
        let project = project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            client,
            http,
            webhook_url,
            cache_path,
            project,
        })
    }

    /// Fetch stats and notify the webhook if progress was made.
    pub async fn report(&self) -> Result<ProgressReport> {
        let stats = self
            .client
            .stats()
            .await
            .context("Feature API unavailable for progress report")?;

        let webhook = if stats.total == 0 {
            WebhookOutcome::NoProgress
        } else {
            match &self.webhook_url {
                Some(url) => self.notify(url, &stats).await?,
                None => WebhookOutcome::NotConfigured,
            }
        };
        Ok(ProgressReport { stats, webhook })
    }

    async fn notify(&self, url: &str, stats: &FeatureStats) -> Result<WebhookOutcome> {
        let cached = ProgressCache::load(&self.cache_path);
        let previous = cached.clone().unwrap_or_default();

        if stats.passing <= previous.count {
            if cached.is_none() {
                // First run: record the baseline without notifying.
                let passing = self.passing_features().await.unwrap_or_default();
                ProgressCache {
                    count: stats.passing,
                    passing_ids: passing.iter().map(|f| f.id).collect(),
                }
                .save(&self.cache_path)?;
            }
            return Ok(WebhookOutcome::NoProgress);
        }

        let passing = match self.passing_features().await {
            Ok(features) => features,
            Err(e) => {
                warn!(error = %e, "Could not list passing features for webhook");
                Vec::new()
            }
        };
        let previous_ids: HashSet<i64> = previous.passing_ids.iter().copied().collect();
        let completed = newly_completed(&passing, &previous_ids);
        let event = build_event(stats, &previous, completed, &self.project, Utc::now());
        let completed_count = event.completed_tests.len();

        let outcome = match self.send(url, &event).await {
            Ok(()) => {
                info!(passing = stats.passing, completed = completed_count, "Progress webhook sent");
                WebhookOutcome::Sent {
                    completed: completed_count,
                }
            }
            Err(e) => {
                warn!(error = %e, "Progress webhook notification failed");
                WebhookOutcome::Failed(e.to_string())
            }
        };

        ProgressCache {
            count: stats.passing,
            passing_ids: passing.iter().map(|f| f.id).collect(),
        }
        .save(&self.cache_path)?;

        Ok(outcome)
    }

    async fn passing_features(&self) -> Result<Vec<Feature>> {
        let page = self
            .client
            .list(&FeatureFilter::passing(true), Some(MAX_PAGE_LIMIT), None)
            .await?;
        Ok(page.features)
    }

    async fn send(&self, url: &str, event: &ProgressEvent) -> Result<()> {
        // The receiving workflow expects an array of events.
        self.http
            .post(url)
            .json(&[event])
            .send()
            .await
            .context("Failed to send progress webhook")?
            .error_for_status()
            .context("Progress webhook returned error status")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::models::NewFeature;
    use crate::features::server::{FeatureServer, ServerConfig};
    use axum::{Json, Router, extract::State, routing::post};
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn feature(id: i64, category: &str, description: &str) -> Feature {
        Feature {
            id,
            priority: id,
            category: category.to_string(),
            name: format!("f{}", id),
            description: description.to_string(),
            steps: vec!["s".to_string()],
            passes: true,
        }
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(
            summary_line(&FeatureStats::from_counts(1, 3)),
            "Progress: 1/3 tests passing (33.3%)"
        );
        assert_eq!(
            summary_line(&FeatureStats::from_counts(0, 0)),
            "Progress: No features in database yet"
        );
    }

    #[test]
    fn test_cache_load_and_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CACHE_FILE_NAME);
        assert!(ProgressCache::load(&path).is_none());

        let cache = ProgressCache {
            count: 2,
            passing_ids: vec![1, 4],
        };
        cache.save(&path).unwrap();
        assert_eq!(ProgressCache::load(&path), Some(cache));

        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(ProgressCache::load(&path), Some(ProgressCache::default()));
    }

    #[test]
    fn test_newly_completed_skips_known_ids() {
        let passing = vec![
            feature(1, "functional", "Home page loads"),
            feature(2, "", "Login works"),
            feature(3, "style", ""),
        ];
        let previous: HashSet<i64> = [1].into_iter().collect();
        assert_eq!(
            newly_completed(&passing, &previous),
            vec!["Login works".to_string(), "[style] Feature #3".to_string()]
        );
    }

    #[test]
    fn test_build_event() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let previous = ProgressCache {
            count: 1,
            passing_ids: vec![1],
        };
        let event = build_event(
            &FeatureStats::from_counts(3, 4),
            &previous,
            vec!["[a] b".to_string(), "[c] d".to_string()],
            "demo",
            now,
        );
        assert_eq!(event.event, "test_progress");
        assert_eq!(event.percentage, 75.0);
        assert_eq!(event.previous_passing, 1);
        assert_eq!(event.tests_completed_this_session, 2);
        assert_eq!(event.project, "demo");
        assert_eq!(event.timestamp, "2025-01-02T03:04:05.000Z");
    }

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn start_webhook_sink() -> Option<(String, Received)> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.ok()?;
        let addr = listener.local_addr().ok()?;
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/hook",
                post(
                    |State(sink): State<Received>, Json(body): Json<serde_json::Value>| async move {
                        sink.lock().unwrap().push(body);
                        "ok"
                    },
                ),
            )
            .with_state(received.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Some((format!("http://{}/hook", addr), received))
    }

    #[tokio::test]
    async fn test_report_notifies_only_on_progress() {
        let dir = TempDir::new().unwrap();
        let mut server = FeatureServer::new(ServerConfig {
            port: 0,
            ..ServerConfig::for_project(dir.path())
        });
        let addr = match server.start().await {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Skipping progress webhook test (could not bind): {:?}", e);
                return;
            }
        };
        let Some((hook_url, received)) = start_webhook_sink().await else {
            server.stop().await.unwrap();
            return;
        };

        let client = FeatureClient::new(format!("http://{}", addr)).unwrap();
        client
            .create_bulk(&[
                NewFeature::new("functional", "one", "Home page loads", &["a"]),
                NewFeature::new("style", "two", "Dark mode", &["b"]),
            ])
            .await
            .unwrap();

        let cache_path = dir.path().join(CACHE_FILE_NAME);
        let reporter =
            ProgressReporter::new(client.clone(), Some(hook_url), dir.path(), cache_path.clone())
                .unwrap();

        // Nothing passing and no cache: baseline recorded, no event.
        let report = reporter.report().await.unwrap();
        assert_eq!(report.webhook, WebhookOutcome::NoProgress);
        assert_eq!(ProgressCache::load(&cache_path).unwrap().count, 0);

        client.mark(2, true).await.unwrap();
        let report = reporter.report().await.unwrap();
        assert_eq!(report.webhook, WebhookOutcome::Sent { completed: 1 });
        assert_eq!(
            ProgressCache::load(&cache_path).unwrap(),
            ProgressCache {
                count: 1,
                passing_ids: vec![2]
            }
        );

        // Same count again: no second event.
        let report = reporter.report().await.unwrap();
        assert_eq!(report.webhook, WebhookOutcome::NoProgress);

        let events = received.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        let event = &events[0][0];
        assert_eq!(event["event"], "test_progress");
        assert_eq!(event["passing"], 1);
        assert_eq!(event["total"], 2);
        assert_eq!(event["completed_tests"][0], "[style] Dark mode");

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_report_without_webhook() {
        let dir = TempDir::new().unwrap();
        let mut server = FeatureServer::new(ServerConfig {
            port: 0,
            ..ServerConfig::for_project(dir.path())
        });
        let Ok(addr) = server.start().await else {
            return;
        };
        let client = FeatureClient::new(format!("http://{}", addr)).unwrap();
        client
            .create(&NewFeature::new("functional", "one", "desc", &["a"]))
            .await
            .unwrap();

        let reporter =
            ProgressReporter::new(client, None, dir.path(), dir.path().join(CACHE_FILE_NAME))
                .unwrap();
        let report = reporter.report().await.unwrap();
        assert_eq!(report.stats.total, 1);
        assert_eq!(report.webhook, WebhookOutcome::NotConfigured);
        assert!(!dir.path().join(CACHE_FILE_NAME).exists());

        server.stop().await.unwrap();
    }
}
