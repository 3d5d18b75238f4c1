//! Lifecycle of the embedded feature API.
//!
//! [`FeatureServer`] owns a dedicated thread running its own tokio runtime,
//! so request handling never shares the host's event loop. `start()` returns
//! once the store is open, the legacy migration has finished and the socket
//! is bound; `stop()` drains for at most the configured grace period and
//! then tears the runtime down, terminating whatever is still connected.
//!
//! ```no_run
//! use feature_tracker::features::server::{FeatureServer, ServerConfig};
//!
//! # async fn example() -> feature_tracker::errors::Result<()> {
//! let mut server = FeatureServer::new(ServerConfig::for_project(std::path::Path::new(".")));
//! let addr = server.start().await?;
//! println!("feature API on http://{}", addr);
//!
//! // ... host work ...
//!
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::api::{self, AppState};
use super::db::{DbHandle, FeatureDb};
use super::migration::{self, MigrationOutcome};
use crate::errors::{Result, TrackerError};

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_DB_FILE: &str = "features.db";
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Extra time `stop()` allows the service thread to close the store and
/// tear down its runtime after the grace period.
const EXIT_SLACK: Duration = Duration::from_secs(2);

/// Configuration for the feature API service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// `0` binds an ephemeral port.
    pub port: u16,
    pub db_path: PathBuf,
    pub legacy_path: PathBuf,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            legacy_path: PathBuf::from(migration::LEGACY_FILE_NAME),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl ServerConfig {
    /// Defaults with the store and legacy file placed in `project_dir`.
    pub fn for_project(project_dir: &Path) -> Self {
        Self {
            db_path: project_dir.join(DEFAULT_DB_FILE),
            legacy_path: project_dir.join(migration::LEGACY_FILE_NAME),
            ..Self::default()
        }
    }

    /// The address to bind. Only loopback hosts are accepted.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let addr = SocketAddr::new(self.host, self.port);
        if !self.host.is_loopback() {
            return Err(TrackerError::Startup {
                addr: addr.to_string(),
                reason: "the feature API only binds loopback addresses".to_string(),
            });
        }
        Ok(addr)
    }
}

/// Observable lifecycle of a [`FeatureServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotStarted,
    Starting,
    Ready,
    Stopping,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::NotStarted => write!(f, "not-started"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Ready => write!(f, "ready"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Stopped => write!(f, "stopped"),
        }
    }
}

/// How the serve loop ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ServeExit {
    /// Shutdown was requested and every connection finished in time.
    Drained,
    /// Shutdown was requested but connections were still open at the deadline.
    TimedOut,
    /// The server stopped without being asked to.
    Failed(String),
}

type ReadyReport = Result<(SocketAddr, MigrationOutcome)>;

/// Embedded feature API, constructed once per host process.
pub struct FeatureServer {
    config: ServerConfig,
    state: Arc<watch::Sender<ServiceState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    exit_rx: Option<oneshot::Receiver<ServeExit>>,
    thread: Option<std::thread::JoinHandle<()>>,
    addr: Option<SocketAddr>,
    migration: Option<MigrationOutcome>,
}

impl FeatureServer {
    pub fn new(config: ServerConfig) -> Self {
        let (state, _) = watch::channel(ServiceState::NotStarted);
        Self {
            config,
            state: Arc::new(state),
            shutdown_tx: None,
            exit_rx: None,
            thread: None,
            addr: None,
            migration: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    /// Whether the service thread is alive (starting, serving or draining).
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            ServiceState::Starting | ServiceState::Ready | ServiceState::Stopping
        )
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn base_url(&self) -> Option<String> {
        self.addr.map(|addr| format!("http://{}", addr))
    }

    /// Result of the legacy import performed during `start()`.
    pub fn migration_outcome(&self) -> Option<&MigrationOutcome> {
        self.migration.as_ref()
    }

    /// Open the store, migrate, bind and begin serving.
    ///
    /// # Errors
    ///
    /// `Startup` if the service was already started or the address cannot be
    /// bound, `Migration` if the legacy import fails. Either way the service
    /// ends up `Stopped` and never becomes reachable.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let current = self.state();
        if current != ServiceState::NotStarted {
            return Err(TrackerError::Startup {
                addr: SocketAddr::new(self.config.host, self.config.port).to_string(),
                reason: format!("service is already {}", current),
            });
        }
        self.state.send_replace(ServiceState::Starting);

        match self.spawn_service().await {
            Ok((addr, outcome)) => {
                info!(%addr, migration = ?outcome, "Feature API ready");
                self.addr = Some(addr);
                self.migration = Some(outcome);
                self.state.send_replace(ServiceState::Ready);
                Ok(addr)
            }
            Err(e) => {
                self.shutdown_tx = None;
                self.exit_rx = None;
                self.thread = None;
                self.state.send_replace(ServiceState::Stopped);
                Err(e)
            }
        }
    }

    async fn spawn_service(&mut self) -> ReadyReport {
        let bind_addr = self.config.socket_addr()?;
        let (ready_tx, ready_rx) = oneshot::channel::<ReadyReport>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = oneshot::channel::<ServeExit>();
        let config = self.config.clone();
        let state = self.state.clone();

        let thread = std::thread::Builder::new()
            .name("feature-api".to_string())
            .spawn(move || {
                run_service(config, bind_addr, ready_tx, shutdown_rx, exit_tx);
                state.send_replace(ServiceState::Stopped);
            })
            .map_err(|e| TrackerError::Startup {
                addr: bind_addr.to_string(),
                reason: format!("failed to spawn service thread: {}", e),
            })?;

        self.shutdown_tx = Some(shutdown_tx);
        self.exit_rx = Some(exit_rx);
        self.thread = Some(thread);

        ready_rx.await.unwrap_or_else(|_| {
            Err(TrackerError::Startup {
                addr: bind_addr.to_string(),
                reason: "service thread exited before becoming ready".to_string(),
            })
        })
    }

    /// Stop accepting connections, drain, and release the store.
    ///
    /// Always returns with the service `Stopped`. If in-flight requests
    /// outlive the grace period they are terminated and `ShutdownTimeout`
    /// is returned. Stopping a service that is not running is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return Ok(());
        };
        let grace = self.config.shutdown_grace;
        self.state.send_replace(ServiceState::Stopping);
        info!(?grace, "Stopping feature API");
        let _ = shutdown_tx.send(true);

        let exit = match self.exit_rx.take() {
            Some(rx) => match tokio::time::timeout(grace + EXIT_SLACK, rx).await {
                Ok(Ok(exit)) => Some(exit),
                Ok(Err(_)) => None,
                Err(_) => Some(ServeExit::TimedOut),
            },
            None => None,
        };

        let result = match exit {
            Some(ServeExit::Drained) => {
                info!("Feature API stopped");
                Ok(())
            }
            Some(ServeExit::Failed(reason)) => {
                warn!(%reason, "Feature API had already stopped on its own");
                Ok(())
            }
            None => {
                warn!("Feature API thread exited without reporting");
                Ok(())
            }
            Some(ServeExit::TimedOut) => {
                warn!(?grace, "Feature API shutdown exceeded grace period; connections terminated");
                Err(TrackerError::ShutdownTimeout { grace })
            }
        };

        if let Some(thread) = self.thread.take()
            && result.is_ok()
        {
            // The thread has reported and is only tearing down its runtime.
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
        self.addr = None;
        self.state.send_replace(ServiceState::Stopped);
        result
    }
}

impl Drop for FeatureServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}

/// Build the router with request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Body of the service thread.
fn run_service(
    config: ServerConfig,
    bind_addr: SocketAddr,
    ready_tx: oneshot::Sender<ReadyReport>,
    shutdown_rx: watch::Receiver<bool>,
    exit_tx: oneshot::Sender<ServeExit>,
) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("feature-api-worker")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready_tx.send(Err(TrackerError::Startup {
                addr: bind_addr.to_string(),
                reason: format!("failed to build runtime: {}", e),
            }));
            return;
        }
    };

    let grace = config.shutdown_grace;
    let exit = runtime.block_on(async move {
        let (db, listener, outcome) = match prepare(&config, bind_addr).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return None;
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                let _ = db.close().await;
                let _ = ready_tx.send(Err(TrackerError::Startup {
                    addr: bind_addr.to_string(),
                    reason: e.to_string(),
                }));
                return None;
            }
        };

        let app = build_router(Arc::new(AppState { db: db.clone() }));
        if ready_tx.send(Ok((addr, outcome))).is_err() {
            // Starter went away before we were ready.
            let _ = db.close().await;
            return None;
        }

        let exit = serve_until_stopped(listener, app, shutdown_rx, grace).await;
        if let Err(e) = db.close().await {
            warn!(error = %e, "Failed to close feature store cleanly");
        }
        Some(exit)
    });

    // Terminates connection tasks that outlived the grace period.
    runtime.shutdown_timeout(Duration::ZERO);

    if let Some(exit) = exit {
        let _ = exit_tx.send(exit);
    }
}

/// Open the store, run the legacy import, then bind. The listener is only
/// bound once migration has completed, so callers can never reach a
/// half-migrated store.
async fn prepare(
    config: &ServerConfig,
    bind_addr: SocketAddr,
) -> Result<(DbHandle, TcpListener, MigrationOutcome)> {
    let db_path = config.db_path.clone();
    let db = tokio::task::spawn_blocking(move || -> Result<FeatureDb> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        FeatureDb::new(&db_path)
    })
    .await
    .context("Store open task panicked")??;
    let db = DbHandle::new(db);

    let legacy_path = config.legacy_path.clone();
    let outcome = match db
        .call(move |db| migration::migrate_legacy_features(db, &legacy_path))
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Legacy feature migration failed; feature API will not start");
            let _ = db.close().await;
            return Err(e);
        }
    };

    let listener = match TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = db.close().await;
            return Err(TrackerError::Startup {
                addr: bind_addr.to_string(),
                reason: e.to_string(),
            });
        }
    };

    Ok((db, listener, outcome))
}

/// Serve until `shutdown` flips to true, then allow `grace` for open
/// connections to finish.
pub(crate) async fn serve_until_stopped(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> ServeExit {
    let mut graceful_signal = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        stop_requested(&mut graceful_signal).await;
    });
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => {
            return match result {
                Ok(()) => ServeExit::Failed("server exited unexpectedly".to_string()),
                Err(e) => ServeExit::Failed(e.to_string()),
            };
        }
        _ = stop_requested(&mut shutdown) => {}
    }

    match tokio::time::timeout(grace, server).await {
        Ok(Ok(())) => ServeExit::Drained,
        Ok(Err(e)) => ServeExit::Failed(e.to_string()),
        Err(_) => ServeExit::TimedOut,
    }
}

/// Resolves once the flag is set or its sender is gone.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
