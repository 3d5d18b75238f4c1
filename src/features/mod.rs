//! Feature tracking service.
//!
//! ## Overview
//!
//! Tracks checkable "feature" records for an automated worker. The worker
//! asks for the next thing to verify, flips it to passing, and polls
//! aggregate progress, all over a loopback HTTP API that the host process
//! embeds and controls.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Worker  │ ───────> │  server.rs  (FeatureServer, ServerConfig)        │
//! │ (client) │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │                                        │
//!                       │         │ PATCH → guard::apply_update()          │
//!                       │         v                                        │
//!                       │  guard.rs   (allow-list: only `passes`)          │
//!                       │         │                                        │
//!                       │         │ DbHandle::call()                       │
//!                       │         v                                        │
//!                       │  db.rs      (FeatureDb, queries, transactions)   │
//!                       │         ^                                        │
//!                       │         │ once, before bind                      │
//!                       │  migration.rs (feature_list.json import)         │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module    | Responsibility                                             |
//! |-----------|------------------------------------------------------------|
//! | `models`  | `Feature`, `NewFeature`, `FeaturePage`, `FeatureStats`     |
//! | `client`  | `reqwest` client for the HTTP surface                      |
//!
//! ## Startup
//!
//! 1. `FeatureServer::start()` opens `features.db` (WAL mode).
//! 2. `migration::migrate_legacy_features()` imports and archives the legacy
//!    file if the store is empty.
//! 3. The loopback listener is bound; only now does `/health` answer.
//! 4. `stop()` drains in-flight requests for the grace period, then closes
//!    the store.

pub mod api;
pub mod client;
pub mod db;
pub mod guard;
pub mod migration;
pub mod models;
pub mod server;

pub use client::FeatureClient;
pub use db::{DbHandle, FeatureDb};
pub use models::{Feature, FeatureFilter, FeaturePage, FeatureStats, NewFeature};
pub use server::{FeatureServer, ServerConfig, ServiceState};
