use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::error::MapError;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::storage::models::{MapRecord, ReviewQuality, StoredImage};
use crate::storage::{Database, DatabaseError, ImageSwap, PurgeStats};

/// A metadata commit that did not succeed.
#[derive(Debug)]
pub enum CommitFailure {
    /// The transaction was rejected; nothing was written.
    Rejected(MapError),
    /// The deadline passed first; the transaction may still land.
    TimedOut(MapError),
}

/// Map records and their blobs, with every operation bounded by a deadline.
///
/// The record decides which blob is current; blobs are only reachable
/// through it.
#[derive(Clone)]
pub struct MapRepository {
    db: Database,
    blobs: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl MapRepository {
    pub fn new(db: Database, blobs: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { db, blobs, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub async fn find(&self, mission_id: u64, owner: &str) -> Result<Option<MapRecord>, MapError> {
        let owner = owner.to_string();
        self.metadata("find map", move |db| db.get_map(mission_id, &owner))
            .await
            .map_err(into_error)
    }

    pub async fn list(&self, mission_id: u64) -> Result<Vec<MapRecord>, MapError> {
        self.metadata("list maps", move |db| db.list_maps(mission_id))
            .await
            .map_err(into_error)
    }

    pub async fn mission_exists(&self, mission_id: u64) -> Result<bool, MapError> {
        self.metadata("find mission", move |db| db.mission_exists(mission_id))
            .await
            .map_err(into_error)
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool, MapError> {
        let username = username.to_string();
        self.metadata("find user", move |db| {
            db.get_user(&username).map(|user| user.is_some())
        })
        .await
        .map_err(into_error)
    }

    pub async fn purge(&self) -> Result<PurgeStats, MapError> {
        self.metadata("purge", |db| db.purge_all())
            .await
            .map_err(into_error)
    }

    /// Point the record at `image`, creating it if needed, and clear its review.
    pub async fn upsert_image(
        &self,
        mission_id: u64,
        owner: &str,
        image: StoredImage,
    ) -> Result<ImageSwap, CommitFailure> {
        let owner = owner.to_string();
        self.metadata("commit map", move |db| {
            db.swap_map_image(mission_id, &owner, image)
        })
        .await
    }

    pub async fn set_quality(
        &self,
        mission_id: u64,
        owner: &str,
        quality: ReviewQuality,
    ) -> Result<Option<MapRecord>, MapError> {
        let owner = owner.to_string();
        self.metadata("review map", move |db| {
            db.set_map_quality(mission_id, &owner, quality)
        })
        .await
        .map_err(into_error)
    }

    pub async fn delete(&self, mission_id: u64, owner: &str) -> Result<Option<MapRecord>, MapError> {
        let owner = owner.to_string();
        self.metadata("delete map", move |db| db.delete_map(mission_id, &owner))
            .await
            .map_err(into_error)
    }

    // ========================================================================
    // Blobs
    // ========================================================================

    pub async fn put_blob(&self, key: &str, data: Bytes) -> Result<(), MapError> {
        self.bounded("write blob", self.blobs.put(key, data)).await
    }

    pub async fn get_blob(&self, key: &str) -> Result<Bytes, MapError> {
        match tokio::time::timeout(self.timeout, self.blobs.get(key)).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(ObjectStoreError::NotFound(_))) => Err(MapError::NotFound("Map content")),
            Ok(Err(e)) => Err(MapError::storage(format!("read blob: {e}"))),
            Err(_) => Err(self.elapsed("read blob")),
        }
    }

    pub async fn delete_blob(&self, key: &str) -> Result<(), MapError> {
        self.bounded("delete blob", self.blobs.delete(key)).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn bounded<T>(
        &self,
        action: &'static str,
        fut: impl Future<Output = Result<T, ObjectStoreError>>,
    ) -> Result<T, MapError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| MapError::storage(format!("{action}: {e}"))),
            Err(_) => Err(self.elapsed(action)),
        }
    }

    /// redb is synchronous; run it off the async workers under the deadline.
    async fn metadata<T, F>(&self, action: &'static str, op: F) -> Result<T, CommitFailure>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, DatabaseError> + Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || op(&db));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(CommitFailure::Rejected(MapError::storage(format!(
                "{action}: {e}"
            )))),
            Ok(Err(join)) => Err(CommitFailure::Rejected(MapError::storage(format!(
                "{action}: task failed: {join}"
            )))),
            Err(_) => Err(CommitFailure::TimedOut(self.elapsed(action))),
        }
    }

    fn elapsed(&self, action: &str) -> MapError {
        MapError::storage(format!(
            "{action}: timed out after {}ms",
            self.timeout.as_millis()
        ))
    }
}

fn into_error(failure: CommitFailure) -> MapError {
    match failure {
        CommitFailure::Rejected(e) | CommitFailure::TimedOut(e) => e,
    }
}
