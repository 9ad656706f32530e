use axum::extract::{FromRequest, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::parse_mission_id;
use crate::api::auth::Auth;
use crate::api::response::{ApiError, AppBytes, AppJson, AppQuery, JSend};
use crate::maps::AccessPolicy;
use crate::storage::models::{MapFormat, MapRecord, ReviewQuality};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MapResponse {
    pub byte_size: Option<u64>,
    pub content_type: Option<&'static str>,
    pub format: Option<MapFormat>,
    pub mission_id: u64,
    pub quality: Option<ReviewQuality>,
    pub reviewed_at: Option<String>,
    pub updated_at: String,
    pub uploaded_at: Option<String>,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub quality: ReviewQuality,
}

#[derive(Debug, Deserialize)]
pub struct ListMapsParams {
    /// Only reviewed (`true`) or only unreviewed (`false`) submissions.
    #[serde(default)]
    pub reviewed: Option<bool>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Route: GET /api/maps/:mission_id/:username
pub async fn get_map(
    Auth(requester): Auth,
    State(state): State<Arc<AppState>>,
    Path((mission_id, username)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let mission_id = parse_mission_id(&mission_id)?;
    let image = state.maps.fetch(&requester, mission_id, &username).await?;

    let mut response = (StatusCode::OK, image.data).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(image.format.mime_type()),
    );
    // Replaced in place under the same URL, so never cache.
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );

    Ok(response)
}

/// Route: PUT /api/maps/:mission_id/:username
///
/// The caller is authorized before the body is read, so an oversized upload
/// from a stranger is refused as such rather than as too large.
pub async fn put_map(
    Auth(requester): Auth,
    State(state): State<Arc<AppState>>,
    Path((mission_id, username)): Path<(String, String)>,
    request: Request,
) -> Result<Json<JSend<MapResponse>>, ApiError> {
    let mission_id = parse_mission_id(&mission_id)?;
    AccessPolicy::authorize_write(&requester, mission_id, &username)?;

    let AppBytes(body) = AppBytes::from_request(request, &state).await?;
    let record = state
        .maps
        .replace(&requester, mission_id, &username, body)
        .await?;

    Ok(JSend::success(map_to_response(&record)))
}

/// Route: DELETE /api/maps/:mission_id/:username
pub async fn delete_map(
    Auth(requester): Auth,
    State(state): State<Arc<AppState>>,
    Path((mission_id, username)): Path<(String, String)>,
) -> Result<Json<JSend<MessageResponse>>, ApiError> {
    let mission_id = parse_mission_id(&mission_id)?;
    state.maps.remove(&requester, mission_id, &username).await?;

    Ok(JSend::success(MessageResponse {
        message: "Map deleted.".to_string(),
    }))
}

/// Route: PUT /api/maps/:mission_id/:username/review
pub async fn review_map(
    Auth(requester): Auth,
    State(state): State<Arc<AppState>>,
    Path((mission_id, username)): Path<(String, String)>,
    AppJson(req): AppJson<ReviewRequest>,
) -> Result<Json<JSend<MapResponse>>, ApiError> {
    let mission_id = parse_mission_id(&mission_id)?;
    let record = state
        .maps
        .assign_review(&requester, mission_id, &username, req.quality)
        .await?;

    Ok(JSend::success(map_to_response(&record)))
}

/// Route: GET /api/maps/:mission_id
pub async fn list_maps(
    Auth(requester): Auth,
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<String>,
    AppQuery(params): AppQuery<ListMapsParams>,
) -> Result<Json<JSend<Vec<MapResponse>>>, ApiError> {
    let mission_id = parse_mission_id(&mission_id)?;
    let maps = state.maps.list(&requester, mission_id).await?;

    let items = maps
        .iter()
        .filter(|m| match params.reviewed {
            Some(reviewed) => m.quality.is_some() == reviewed,
            None => true,
        })
        .map(map_to_response)
        .collect();

    Ok(JSend::success(items))
}

// ============================================================================
// Helpers
// ============================================================================

fn map_to_response(record: &MapRecord) -> MapResponse {
    let image = record.image.as_ref();
    MapResponse {
        byte_size: image.map(|i| i.byte_size),
        content_type: image.map(|i| i.format.mime_type()),
        format: image.map(|i| i.format),
        mission_id: record.mission_id,
        quality: record.quality,
        reviewed_at: record.reviewed_at.map(|t| t.to_rfc3339()),
        updated_at: record.updated_at.to_rfc3339(),
        uploaded_at: image.map(|i| i.uploaded_at.to_rfc3339()),
        username: record.owner.clone(),
    }
}
