use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;

    let mut router = Router::new()
        // Maps
        .route(
            "/api/maps/:mission_id/:username",
            get(handlers::get_map)
                .put(handlers::put_map)
                .delete(handlers::delete_map)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/maps/:mission_id/:username/review",
            put(handlers::review_map),
        )
        .route("/api/maps/:mission_id", get(handlers::list_maps))
        // Missions
        .route("/api/missions", get(handlers::list_missions))
        .route(
            "/api/missions/:mission_id",
            get(handlers::get_mission).put(handlers::put_mission),
        )
        // Users
        .route("/api/users", post(handlers::create_user))
        .route("/api/users/me", get(handlers::whoami))
        // Internal
        .route("/_internal/health", get(handlers::health));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
