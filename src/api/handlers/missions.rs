use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{parse_mission_id, with_db};
use crate::api::auth::Auth;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::maps::AccessPolicy;
use crate::storage::models::MissionRecord;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MissionResponse {
    pub created_at: String,
    pub id: u64,
    pub name: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct PutMissionRequest {
    pub name: String,
}

/// Route: GET /api/missions
pub async fn list_missions(
    Auth(requester): Auth,
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<Vec<MissionResponse>>>, ApiError> {
    if requester.identity().is_none() {
        return Err(ApiError::unauthorized("Authentication required"));
    }

    let missions = with_db(
        &state.db,
        state.config.storage.timeout,
        "list missions",
        |db| db.list_missions().map_err(ApiError::from),
    )
    .await?;

    Ok(JSend::success(
        missions.iter().map(mission_to_response).collect(),
    ))
}

/// Route: GET /api/missions/:mission_id
pub async fn get_mission(
    Auth(requester): Auth,
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<String>,
) -> Result<Json<JSend<MissionResponse>>, ApiError> {
    if requester.identity().is_none() {
        return Err(ApiError::unauthorized("Authentication required"));
    }

    let mission_id = parse_mission_id(&mission_id)?;
    let mission = with_db(
        &state.db,
        state.config.storage.timeout,
        "find mission",
        move |db| db.get_mission(mission_id).map_err(ApiError::from),
    )
    .await?
    .ok_or_else(|| ApiError::not_found(format!("Mission {mission_id} not found.")))?;

    Ok(JSend::success(mission_to_response(&mission)))
}

/// Route: PUT /api/missions/:mission_id
pub async fn put_mission(
    Auth(requester): Auth,
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<String>,
    AppJson(req): AppJson<PutMissionRequest>,
) -> Result<Json<JSend<MissionResponse>>, ApiError> {
    AccessPolicy::authorize_privileged(&requester)?;

    let mission_id = parse_mission_id(&mission_id)?;
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }

    let mission = with_db(
        &state.db,
        state.config.storage.timeout,
        "register mission",
        move |db| db.upsert_mission(mission_id, &name).map_err(ApiError::from),
    )
    .await?;
    tracing::info!(mission_id, name = %mission.name, "Registered mission");

    Ok(JSend::success(mission_to_response(&mission)))
}

fn mission_to_response(mission: &MissionRecord) -> MissionResponse {
    MissionResponse {
        created_at: mission.created_at.to_rfc3339(),
        id: mission.id,
        name: mission.name.clone(),
        updated_at: mission.updated_at.to_rfc3339(),
    }
}
