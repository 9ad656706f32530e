use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::api::handlers::with_db;
use crate::api::response::ApiError;
use crate::identity::{self, Requester};
use crate::AppState;

/// The caller behind a request, resolved from `Authorization: Bearer <token>`.
///
/// Never rejects for missing or unknown credentials: those resolve to
/// [`Requester::Anonymous`] and are turned away by the access policy, so
/// every route reports them the same way.
pub struct Auth(pub Requester);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Auth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string);

        let requester = with_db(
            &state.db,
            state.config.storage.timeout,
            "authenticate",
            move |db| identity::authenticate(db, token.as_deref()).map_err(ApiError::from),
        )
        .await?;
        Ok(Auth(requester))
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}
