use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::with_db;
use crate::api::auth::Auth;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::identity::{self, IdentityError};
use crate::maps::AccessPolicy;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub is_superuser: bool,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedUserResponse {
    pub is_superuser: bool,
    /// Shown once; only its hash is kept.
    pub token: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub is_superuser: bool,
}

/// Route: POST /api/users
pub async fn create_user(
    Auth(requester): Auth,
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateUserRequest>,
) -> Result<Json<JSend<CreatedUserResponse>>, ApiError> {
    let creator = AccessPolicy::authorize_privileged(&requester)?;

    let (user, token) = with_db(
        &state.db,
        state.config.storage.timeout,
        "create user",
        move |db| {
            identity::register_user(db, &req.username, req.is_superuser).map_err(|e| match e {
                IdentityError::InvalidUsername(_) => ApiError::bad_request(e.to_string()),
                IdentityError::UsernameTaken(_) => ApiError::conflict(e.to_string()),
                IdentityError::Database(e) => ApiError::from(e),
                IdentityError::Rng => ApiError::internal(e.to_string()),
            })
        },
    )
    .await?;

    tracing::info!(
        username = %user.username,
        is_superuser = user.is_superuser,
        created_by = %creator.username,
        "Created user"
    );

    Ok(JSend::success(CreatedUserResponse {
        is_superuser: user.is_superuser,
        token,
        username: user.username,
    }))
}

/// Route: GET /api/users/me
pub async fn whoami(Auth(requester): Auth) -> Result<Json<JSend<UserResponse>>, ApiError> {
    let identity = requester
        .identity()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    Ok(JSend::success(UserResponse {
        is_superuser: identity.is_superuser,
        username: identity.username.clone(),
    }))
}
