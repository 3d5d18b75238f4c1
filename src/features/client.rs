//! Typed HTTP client for a running feature API.

use std::time::Duration;

use anyhow::{Context, bail};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::models::{BulkCreated, Feature, FeatureFilter, FeaturePage, FeatureStats, Health, NewFeature};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FeatureClient {
    http: reqwest::Client,
    base_url: String,
}

impl FeatureClient {
    /// `base_url` like `http://127.0.0.1:8765`, without a trailing path.
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn for_port(port: u16) -> anyhow::Result<Self> {
        Self::new(format!("http://127.0.0.1:{}", port))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> anyhow::Result<Health> {
        let resp = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .with_context(|| format!("Feature API at {} is not reachable", self.base_url))?;
        decode(resp, "health").await
    }

    pub async fn stats(&self) -> anyhow::Result<FeatureStats> {
        let resp = self
            .http
            .get(self.url("/features/stats"))
            .send()
            .await
            .context("Failed to send stats request")?;
        decode(resp, "stats").await
    }

    /// The next feature to verify, or `None` when nothing is pending.
    pub async fn next_pending(&self) -> anyhow::Result<Option<Feature>> {
        let resp = self
            .http
            .get(self.url("/features/next"))
            .send()
            .await
            .context("Failed to send next-feature request")?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(resp, "next feature").await.map(Some)
    }

    pub async fn list(
        &self,
        filter: &FeatureFilter,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> anyhow::Result<FeaturePage> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(passes) = filter.passes {
            query.push(("passes", passes.to_string()));
        }
        if let Some(category) = &filter.category {
            query.push(("category", category.clone()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let resp = self
            .http
            .get(self.url("/features"))
            .query(&query)
            .send()
            .await
            .context("Failed to send list request")?;
        decode(resp, "feature list").await
    }

    pub async fn get(&self, id: i64) -> anyhow::Result<Feature> {
        let resp = self
            .http
            .get(self.url(&format!("/features/{}", id)))
            .send()
            .await
            .context("Failed to send get request")?;
        decode(resp, "feature").await
    }

    pub async fn create(&self, feature: &NewFeature) -> anyhow::Result<Feature> {
        let resp = self
            .http
            .post(self.url("/features"))
            .json(feature)
            .send()
            .await
            .context("Failed to send create request")?;
        decode(resp, "created feature").await
    }

    /// Create all features in one transaction. Returns how many were created.
    pub async fn create_bulk(&self, features: &[NewFeature]) -> anyhow::Result<usize> {
        let resp = self
            .http
            .post(self.url("/features/bulk"))
            .json(&json!({ "features": features }))
            .send()
            .await
            .context("Failed to send bulk create request")?;
        let created: BulkCreated = decode(resp, "bulk create").await?;
        Ok(created.created)
    }

    /// Set the pass/fail flag, the only mutable field.
    pub async fn mark(&self, id: i64, passes: bool) -> anyhow::Result<Feature> {
        let resp = self
            .http
            .patch(self.url(&format!("/features/{}", id)))
            .json(&json!({ "passes": passes }))
            .send()
            .await
            .context("Failed to send update request")?;
        decode(resp, "updated feature").await
    }

    pub async fn delete(&self, id: i64) -> anyhow::Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/features/{}", id)))
            .send()
            .await
            .context("Failed to send delete request")?;
        check_status(resp).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into an error carrying the server's message.
async fn check_status(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) if body.fields.is_empty() => bail!("{}: {}", status, body.error),
        Ok(body) => bail!("{}: {} (fields: {})", status, body.error, body.fields.join(", ")),
        Err(_) => bail!("{}: {}", status, text),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    what: &str,
) -> anyhow::Result<T> {
    check_status(resp)
        .await?
        .json::<T>()
        .await
        .with_context(|| format!("Failed to parse {} response", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::server::{FeatureServer, ServerConfig};
    use tempfile::TempDir;

    async fn start_server(dir: &TempDir) -> Option<(FeatureServer, FeatureClient)> {
        let mut server = FeatureServer::new(ServerConfig {
            port: 0,
            ..ServerConfig::for_project(dir.path())
        });
        match server.start().await {
            Ok(addr) => {
                let client = FeatureClient::new(format!("http://{}", addr)).unwrap();
                Some((server, client))
            }
            Err(e) => {
                eprintln!("Skipping client test (could not bind): {:?}", e);
                None
            }
        }
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client = FeatureClient::new("http://127.0.0.1:8765/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8765");
        assert_eq!(client.url("/health"), "http://127.0.0.1:8765/health");
        assert_eq!(
            FeatureClient::for_port(9000).unwrap().base_url(),
            "http://127.0.0.1:9000"
        );
    }

    #[tokio::test]
    async fn test_worker_flow_over_http() {
        let dir = TempDir::new().unwrap();
        let Some((mut server, client)) = start_server(&dir).await else {
            return;
        };

        assert_eq!(client.health().await.unwrap().database, "connected");
        assert!(client.next_pending().await.unwrap().is_none());

        let created = client
            .create_bulk(&[
                NewFeature::new("functional", "one", "first", &["a"]),
                NewFeature::new("functional", "two", "second", &["b"]),
                NewFeature::new("style", "three", "third", &["c"]),
            ])
            .await
            .unwrap();
        assert_eq!(created, 3);

        client.mark(2, true).await.unwrap();
        assert_eq!(client.next_pending().await.unwrap().unwrap().id, 1);
        let stats = client.stats().await.unwrap();
        assert_eq!((stats.passing, stats.total, stats.percentage), (1, 3, 33.3));

        client.delete(1).await.unwrap();
        assert_eq!(client.next_pending().await.unwrap().unwrap().id, 3);
        assert_eq!(client.stats().await.unwrap().percentage, 50.0);

        let passing = client
            .list(&FeatureFilter::passing(true), None, None)
            .await
            .unwrap();
        assert_eq!(passing.total, 1);
        assert_eq!(passing.features[0].name, "two");

        let style = client
            .list(
                &FeatureFilter {
                    passes: None,
                    category: Some("style".to_string()),
                },
                Some(10),
                Some(0),
            )
            .await
            .unwrap();
        assert_eq!(style.features.len(), 1);
        assert_eq!(style.limit, 10);

        server.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_clients_never_see_partial_batches() {
        const SEED: i64 = 4;
        const BATCH: i64 = 5;
        const WRITERS: i64 = 8;

        let dir = TempDir::new().unwrap();
        let Some((mut server, client)) = start_server(&dir).await else {
            return;
        };
        let seed: Vec<NewFeature> = (0..SEED)
            .map(|i| NewFeature::new("seed", &format!("seed {}", i), "seeded", &["s"]))
            .collect();
        assert_eq!(client.create_bulk(&seed).await.unwrap(), SEED as usize);

        let mut tasks = tokio::task::JoinSet::new();
        for w in 0..WRITERS {
            let client = client.clone();
            tasks.spawn(async move {
                let batch: Vec<NewFeature> = (0..BATCH)
                    .map(|i| {
                        NewFeature::new("bulk", &format!("w{} #{}", w, i), "batched", &["step"])
                    })
                    .collect();
                assert_eq!(client.create_bulk(&batch).await.unwrap(), BATCH as usize);
            });
        }
        for id in 1..=SEED {
            let client = client.clone();
            tasks.spawn(async move {
                assert!(client.mark(id, true).await.unwrap().passes);
            });
        }
        for _ in 0..6 {
            let client = client.clone();
            tasks.spawn(async move {
                for _ in 0..10 {
                    let stats = client.stats().await.unwrap();
                    assert_eq!((stats.total - SEED) % BATCH, 0, "saw {:?}", stats);
                    assert!(stats.passing <= SEED);

                    let page = client
                        .list(&FeatureFilter::default(), Some(1000), None)
                        .await
                        .unwrap();
                    assert_eq!((page.total - SEED) % BATCH, 0, "saw total {}", page.total);
                    assert_eq!(page.features.len() as i64, page.total);
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let stats = client.stats().await.unwrap();
        assert_eq!(stats.total, SEED + WRITERS * BATCH);
        assert_eq!(stats.passing, SEED);

        let page = client
            .list(&FeatureFilter::default(), Some(1000), None)
            .await
            .unwrap();
        let mut ids: Vec<i64> = page.features.iter().map(|f| f.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len() as i64, SEED + WRITERS * BATCH);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_errors_carry_server_message() {
        let dir = TempDir::new().unwrap();
        let Some((mut server, client)) = start_server(&dir).await else {
            return;
        };

        let missing = client.mark(42, true).await.unwrap_err();
        assert!(missing.to_string().contains("404"), "got {}", missing);

        let invalid = client
            .create(&NewFeature::new("", "name", "desc", &["s"]))
            .await
            .unwrap_err();
        assert!(invalid.to_string().contains("422"), "got {}", invalid);
        assert!(invalid.to_string().contains("category"), "got {}", invalid);

        assert!(client.get(7).await.is_err());
        assert!(client.delete(7).await.is_err());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        // Port 9 (discard) is essentially never serving HTTP on loopback.
        let client = FeatureClient::for_port(9).unwrap();
        let err = client.health().await.unwrap_err();
        assert!(err.to_string().contains("not reachable"));
    }
}
