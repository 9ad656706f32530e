use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::auth::Auth;
use crate::api::response::{ApiError, JSend};
use crate::maps::AccessPolicy;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub maps_deleted: u64,
    pub missions_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn admin_purge(
    Auth(requester): Auth,
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    AccessPolicy::authorize_privileged(&requester)?;

    let stats = state.maps.purge().await?;

    tracing::warn!(
        maps = stats.maps,
        missions = stats.missions,
        "Purged all maps and missions"
    );

    Ok(JSend::success(PurgeResponse {
        maps_deleted: stats.maps,
        missions_deleted: stats.missions,
    }))
}
