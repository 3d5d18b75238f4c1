//! Configuration for the feature tracker.
//!
//! Settings come from `<project>/tracker.toml`, then environment variables,
//! then CLI flags, each layer overriding the one before. Every field has a
//! default, so the file is optional.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8765
//! shutdown_grace_secs = 5
//!
//! [storage]
//! database = "features.db"
//! legacy_file = "feature_list.json"
//!
//! [progress]
//! webhook_url = "https://n8n.example.com/webhook/progress"
//! cache_file = ".progress_cache"
//!
//! [logging]
//! filter = "info"
//! format = "pretty"
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::features::server::ServerConfig;

pub const CONFIG_FILE_NAME: &str = "tracker.toml";

/// Overrides `[server] port`.
pub const PORT_ENV: &str = "FEATURE_API_PORT";
/// Overrides `[progress] webhook_url`.
pub const WEBHOOK_ENV: &str = "PROGRESS_N8N_WEBHOOK_URL";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colored when attached to a terminal
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds `stop()` waits for in-flight requests
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    crate::features::server::DEFAULT_PORT
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// File names are relative to the project directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_legacy_file")]
    pub legacy_file: String,
}

fn default_database() -> String {
    crate::features::server::DEFAULT_DB_FILE.to_string()
}

fn default_legacy_file() -> String {
    crate::features::migration::LEGACY_FILE_NAME.to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database: default_database(),
            legacy_file: default_legacy_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSection {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_cache_file")]
    pub cache_file: String,
}

fn default_cache_file() -> String {
    crate::progress::CACHE_FILE_NAME.to_string()
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            cache_file: default_cache_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
        }
    }
}

/// Contents of `tracker.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub progress: ProgressSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TrackerToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tracker.toml")
    }

    /// Load `<project_dir>/tracker.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize tracker.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Port from the file, overridden by `FEATURE_API_PORT`.
    pub fn port(&self) -> Result<u16> {
        match std::env::var(PORT_ENV) {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} value '{}'", PORT_ENV, raw)),
            _ => Ok(self.server.port),
        }
    }

    /// Webhook URL, with `PROGRESS_N8N_WEBHOOK_URL` overriding the file.
    pub fn webhook_url(&self) -> Option<String> {
        // A blank value at either layer counts as unset.
        let present = |url: &String| !url.trim().is_empty();
        std::env::var(WEBHOOK_ENV)
            .ok()
            .filter(present)
            .or_else(|| self.progress.webhook_url.clone().filter(present))
    }

    /// Return every problem found; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        match self.server.host.parse::<IpAddr>() {
            Ok(ip) if ip.is_loopback() => {}
            Ok(_) => problems.push(format!(
                "server.host '{}' is not a loopback address; the feature API only listens locally",
                self.server.host
            )),
            Err(_) => problems.push(format!(
                "server.host '{}' is not an IP address",
                self.server.host
            )),
        }

        if self.storage.database.trim().is_empty() {
            problems.push("storage.database must not be empty".to_string());
        }
        if self.storage.legacy_file.trim().is_empty() {
            problems.push("storage.legacy_file must not be empty".to_string());
        }
        if self.progress.cache_file.trim().is_empty() {
            problems.push("progress.cache_file must not be empty".to_string());
        }
        if let Some(url) = &self.progress.webhook_url
            && !url.is_empty()
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            problems.push(format!(
                "progress.webhook_url '{}' must start with http:// or https://",
                url
            ));
        }

        problems
    }
}

/// Resolved configuration: tracker.toml merged with env and CLI flags.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub project_dir: PathBuf,
    pub toml: TrackerToml,
    pub verbose: bool,
    pub cli_port: Option<u16>,
    pub cli_log_format: Option<LogFormat>,
}

impl TrackerConfig {
    /// Load `tracker.toml` from `project_dir`. The directory need not exist yet.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir =
            std::path::absolute(&project_dir).context("Failed to resolve project directory")?;
        let toml = TrackerToml::load_or_default(&project_dir)?;

        Ok(Self {
            project_dir,
            toml,
            verbose: false,
            cli_port: None,
            cli_log_format: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        port: Option<u16>,
        verbose: bool,
        log_format: Option<LogFormat>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.cli_port = port;
        config.verbose = verbose;
        config.cli_log_format = log_format;
        Ok(config)
    }

    /// CLI → env → file.
    pub fn port(&self) -> Result<u16> {
        match self.cli_port {
            Some(port) => Ok(port),
            None => self.toml.port(),
        }
    }

    pub fn host(&self) -> Result<IpAddr> {
        self.toml
            .server
            .host
            .parse()
            .with_context(|| format!("Invalid server.host '{}'", self.toml.server.host))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.toml.server.shutdown_grace_secs)
    }

    pub fn db_path(&self) -> PathBuf {
        self.project_dir.join(&self.toml.storage.database)
    }

    pub fn legacy_path(&self) -> PathBuf {
        self.project_dir.join(&self.toml.storage.legacy_file)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.project_dir.join(&self.toml.progress.cache_file)
    }

    pub fn webhook_url(&self) -> Option<String> {
        self.toml.webhook_url()
    }

    /// `--verbose` forces debug output for this crate.
    pub fn log_filter(&self) -> String {
        if self.verbose {
            "feature_tracker=debug,tower_http=debug,info".to_string()
        } else {
            self.toml.logging.filter.clone()
        }
    }

    pub fn log_format(&self) -> LogFormat {
        self.cli_log_format.unwrap_or(self.toml.logging.format)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    /// Service settings for [`crate::features::FeatureServer`]. Fails on an
    /// invalid configuration.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let problems = self.validate();
        if !problems.is_empty() {
            bail!("Invalid configuration:\n  {}", problems.join("\n  "));
        }
        Ok(ServerConfig {
            host: self.host()?,
            port: self.port()?,
            db_path: self.db_path(),
            legacy_path: self.legacy_path(),
            shutdown_grace: self.shutdown_grace(),
        })
    }

    /// Where a running service for this project is expected to answer.
    pub fn base_url(&self) -> Result<String> {
        let host = self.host()?;
        let port = self.port()?;
        Ok(match host {
            IpAddr::V4(ip) => format!("http://{}:{}", ip, port),
            IpAddr::V6(ip) => format!("http://[{}]:{}", ip, port),
        })
    }
}
