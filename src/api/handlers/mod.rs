mod admin;
mod maps;
mod missions;
mod users;

use std::time::Duration;

use crate::api::response::ApiError;
use crate::storage::Database;

pub use admin::{admin_purge, health};
pub use maps::{delete_map, get_map, list_maps, put_map, review_map};
pub use missions::{get_mission, list_missions, put_mission};
pub use users::{create_user, whoami};

/// Parse a mission id path segment
fn parse_mission_id(raw: &str) -> Result<u64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid mission id '{raw}'")))
}

/// Run a redb call on the blocking pool, bounded by `timeout`.
pub(crate) async fn with_db<T, F>(
    db: &Database,
    timeout: Duration,
    action: &'static str,
    op: F,
) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
{
    let db = db.clone();
    let task = tokio::task::spawn_blocking(move || op(&db));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => {
            tracing::error!(action, error = %join, "Database task failed");
            Err(ApiError::internal(format!("{action}: task failed")))
        }
        Err(_) => {
            tracing::error!(
                action,
                timeout_ms = timeout.as_millis() as u64,
                "Database call timed out"
            );
            Err(ApiError::internal(format!(
                "{action}: timed out after {}ms",
                timeout.as_millis()
            )))
        }
    }
}
