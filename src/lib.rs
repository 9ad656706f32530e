//! map-store - Mission map image store for the UAS competition interoperability server
//!
//! Teams upload one map image per mission; judges review them. This crate provides:
//! - Swappable object storage backends for the image bytes (local filesystem, GCS)
//! - redb embedded database for map, mission and user metadata (ACID, crash-safe)
//! - Replace semantics that never expose a dangling or half-written map
//! - REST API with bearer-token authentication

pub mod api;
pub mod config;
pub mod identity;
pub mod maps;
pub mod object_store;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use config::Config;
use maps::MapCoordinator;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub maps: MapCoordinator,
}
