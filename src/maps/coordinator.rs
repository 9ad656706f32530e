use bytes::Bytes;
use chrono::Utc;

use super::access::AccessPolicy;
use super::error::MapError;
use super::locks::{KeyGuard, KeyLocks};
use super::repository::{CommitFailure, MapRepository};
use super::validator::{self, ValidatedImage};
use crate::identity::Requester;
use crate::storage::models::{MapFormat, MapRecord, ReviewQuality, StoredImage};
use crate::storage::PurgeStats;

/// Bytes of the current map image for a mission and owner.
#[derive(Debug, Clone)]
pub struct MapImage {
    pub format: MapFormat,
    pub data: Bytes,
}

/// Object store key for a freshly uploaded map. The random suffix gives every
/// upload its own key, so a replace never overwrites the blob it replaces.
pub fn blob_key(mission_id: u64, owner: &str, format: MapFormat) -> String {
    format!(
        "maps/{mission_id}-{owner}-{}.{}",
        uuid::Uuid::new_v4().simple(),
        format.extension()
    )
}

/// The only place map state is mutated.
///
/// Every entry point checks [`AccessPolicy`] before touching storage.
/// Mutations of one (mission, owner) key are serialized; different keys
/// proceed independently.
pub struct MapCoordinator {
    repo: MapRepository,
    locks: KeyLocks,
}

impl MapCoordinator {
    pub fn new(repo: MapRepository) -> Self {
        Self {
            repo,
            locks: KeyLocks::new(),
        }
    }

    pub async fn fetch(
        &self,
        requester: &Requester,
        mission_id: u64,
        owner: &str,
    ) -> Result<MapImage, MapError> {
        AccessPolicy::authorize_read(requester, mission_id, owner)?;

        let image = self.current_image(mission_id, owner).await?;
        let (image, data) = match self.repo.get_blob(&image.key).await {
            Ok(data) => (image, data),
            Err(MapError::NotFound(_)) => {
                // A replace may have committed and removed the blob between
                // the two reads. Follow the record once if it moved.
                let current = self.current_image(mission_id, owner).await?;
                if current.key == image.key {
                    return Err(MapError::NotFound("Map content"));
                }
                let data = self.repo.get_blob(&current.key).await?;
                (current, data)
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(mission_id, owner, key = %image.key, "Serving map");

        Ok(MapImage {
            format: image.format,
            data,
        })
    }

    /// Validate `data` and make it the current map, clearing any review.
    ///
    /// The new blob is written before the record moves to it and the old blob
    /// is removed only after the record has moved, so the previous map stays
    /// servable until the new one is committed.
    pub async fn replace(
        &self,
        requester: &Requester,
        mission_id: u64,
        owner: &str,
        data: Bytes,
    ) -> Result<MapRecord, MapError> {
        AccessPolicy::authorize_write(requester, mission_id, owner)?;

        if !self.repo.mission_exists(mission_id).await? {
            return Err(MapError::NotFound("Mission"));
        }
        if !self.repo.user_exists(owner).await? {
            return Err(MapError::NotFound("User"));
        }

        let validated = self.validate(data.clone()).await?;

        let _guard = self.lock(mission_id, owner).await?;

        let key = blob_key(mission_id, owner, validated.format);
        let byte_size = data.len() as u64;
        if let Err(e) = self.repo.put_blob(&key, data).await {
            // The backend may have stored the object before failing or
            // timing out; nothing references it yet.
            if let Err(cleanup) = self.repo.delete_blob(&key).await {
                tracing::warn!(
                    mission_id, owner, key = %key, error = %cleanup,
                    "Failed to remove blob of failed map upload"
                );
            }
            return Err(e);
        }

        let image = StoredImage {
            key: key.clone(),
            format: validated.format,
            byte_size,
            uploaded_at: Utc::now(),
        };

        let swap = match self.repo.upsert_image(mission_id, owner, image).await {
            Ok(swap) => swap,
            Err(CommitFailure::Rejected(e)) => {
                if let Err(cleanup) = self.repo.delete_blob(&key).await {
                    tracing::warn!(
                        mission_id, owner, key = %key, error = %cleanup,
                        "Failed to remove blob of rejected map upload"
                    );
                }
                return Err(e);
            }
            Err(CommitFailure::TimedOut(e)) => {
                // The commit may still land and point at this blob; keep it.
                tracing::warn!(
                    mission_id, owner, key = %key, error = %e,
                    "Map commit timed out, leaving uploaded blob in place"
                );
                return Err(e);
            }
        };

        if let Some(previous) = swap.previous.as_ref().filter(|p| p.key != key) {
            if let Err(e) = self.repo.delete_blob(&previous.key).await {
                tracing::warn!(
                    mission_id, owner, key = %previous.key, error = %e,
                    "Unable to delete old map"
                );
            }
        }

        tracing::info!(
            mission_id,
            owner,
            format = %validated.format,
            width = validated.width,
            height = validated.height,
            byte_size,
            "Map uploaded"
        );
        Ok(swap.record)
    }

    /// Remove the map record and its blob.
    pub async fn remove(
        &self,
        requester: &Requester,
        mission_id: u64,
        owner: &str,
    ) -> Result<(), MapError> {
        AccessPolicy::authorize_write(requester, mission_id, owner)?;

        let _guard = self.lock(mission_id, owner).await?;

        let has_image = self
            .repo
            .find(mission_id, owner)
            .await?
            .is_some_and(|record| record.image.is_some());
        if !has_image {
            return Err(MapError::NotFound("Map"));
        }

        let removed = self
            .repo
            .delete(mission_id, owner)
            .await?
            .ok_or(MapError::NotFound("Map"))?;

        if let Some(image) = removed.image {
            if let Err(e) = self.repo.delete_blob(&image.key).await {
                tracing::warn!(
                    mission_id, owner, key = %image.key, error = %e,
                    "Unable to delete map"
                );
            }
        }

        tracing::info!(mission_id, owner, "Map deleted");
        Ok(())
    }

    /// Record a judge's rating. Only judges may call this, and it never
    /// touches the stored image.
    pub async fn assign_review(
        &self,
        requester: &Requester,
        mission_id: u64,
        owner: &str,
        quality: ReviewQuality,
    ) -> Result<MapRecord, MapError> {
        AccessPolicy::authorize_review(requester, owner)?;

        let _guard = self.lock(mission_id, owner).await?;

        let record = self
            .repo
            .set_quality(mission_id, owner, quality)
            .await?
            .ok_or(MapError::NotFound("Map"))?;

        tracing::info!(mission_id, owner, ?quality, "Map reviewed");
        Ok(record)
    }

    /// All submissions for a mission, for judges.
    pub async fn list(
        &self,
        requester: &Requester,
        mission_id: u64,
    ) -> Result<Vec<MapRecord>, MapError> {
        AccessPolicy::authorize_privileged(requester)?;

        if !self.repo.mission_exists(mission_id).await? {
            return Err(MapError::NotFound("Mission"));
        }

        let maps = self.repo.list(mission_id).await?;
        Ok(maps
            .into_iter()
            .filter(|record| record.image.is_some())
            .collect())
    }

    /// Drop all maps and missions, then their blobs. Test mode only.
    pub async fn purge(&self) -> Result<PurgeStats, MapError> {
        let stats = self.repo.purge().await?;
        for key in &stats.blob_keys {
            if let Err(e) = self.repo.delete_blob(key).await {
                tracing::warn!(key = %key, error = %e, "Failed to delete purged map blob");
            }
        }
        Ok(stats)
    }

    async fn current_image(&self, mission_id: u64, owner: &str) -> Result<StoredImage, MapError> {
        self.repo
            .find(mission_id, owner)
            .await?
            .and_then(|record| record.image)
            .ok_or(MapError::NotFound("Map"))
    }

    async fn validate(&self, data: Bytes) -> Result<ValidatedImage, MapError> {
        tokio::task::spawn_blocking(move || validator::validate(&data))
            .await
            .map_err(|e| MapError::storage(format!("validation task failed: {e}")))?
    }

    async fn lock(&self, mission_id: u64, owner: &str) -> Result<KeyGuard, MapError> {
        tokio::time::timeout(self.repo.timeout(), self.locks.lock(mission_id, owner))
            .await
            .map_err(|_| {
                MapError::storage(format!(
                    "timed out after {}ms waiting for a concurrent update",
                    self.repo.timeout().as_millis()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testutil::{gif_bytes, jpeg_bytes, png_bytes, TestWorld};

    const MISSION: u64 = 1;

    fn team() -> Requester {
        Requester::user("alpha", false)
    }

    fn judge() -> Requester {
        Requester::user("judge", true)
    }

    fn world() -> TestWorld {
        TestWorld::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_replace_then_fetch_returns_same_bytes() {
        let w = world();
        let jpeg = Bytes::from(jpeg_bytes(1));

        let record = w.maps.replace(&team(), MISSION, "alpha", jpeg.clone()).await.unwrap();
        assert_eq!(record.image.as_ref().unwrap().format, MapFormat::Jpeg);
        assert_eq!(record.quality, None);

        let image = w.maps.fetch(&team(), MISSION, "alpha").await.unwrap();
        assert_eq!(image.format, MapFormat::Jpeg);
        assert_eq!(image.data, jpeg);
    }

    #[tokio::test]
    async fn test_never_uploaded_is_not_found() {
        let w = world();
        assert!(matches!(
            w.maps.fetch(&team(), MISSION, "alpha").await,
            Err(MapError::NotFound(_))
        ));
        assert!(matches!(
            w.maps.remove(&team(), MISSION, "alpha").await,
            Err(MapError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_upload_keeps_previous_image() {
        let w = world();
        let png = Bytes::from(png_bytes(2));
        w.maps.replace(&team(), MISSION, "alpha", png.clone()).await.unwrap();

        for bad in [gif_bytes(), b"Hahaha".to_vec(), Vec::new()] {
            let result = w.maps.replace(&team(), MISSION, "alpha", Bytes::from(bad)).await;
            assert!(matches!(result, Err(MapError::RejectedFormat { .. })));
        }

        let image = w.maps.fetch(&team(), MISSION, "alpha").await.unwrap();
        assert_eq!(image.data, png);
        assert_eq!(w.store.blob_count(), 1);
    }

    #[tokio::test]
    async fn test_identical_reupload_clears_review() {
        let w = world();
        let jpeg = Bytes::from(jpeg_bytes(3));
        w.maps.replace(&team(), MISSION, "alpha", jpeg.clone()).await.unwrap();

        let reviewed = w
            .maps
            .assign_review(&judge(), MISSION, "alpha", ReviewQuality::Medium)
            .await
            .unwrap();
        assert_eq!(reviewed.quality, Some(ReviewQuality::Medium));

        let record = w.maps.replace(&team(), MISSION, "alpha", jpeg).await.unwrap();
        assert_eq!(record.quality, None);
        assert_eq!(record.reviewed_at, None);

        let stored = w.db.get_map(MISSION, "alpha").unwrap().unwrap();
        assert_eq!(stored.quality, None);
    }

    #[tokio::test]
    async fn test_review_does_not_touch_image() {
        let w = world();
        let png = Bytes::from(png_bytes(4));
        let uploaded = w.maps.replace(&team(), MISSION, "alpha", png.clone()).await.unwrap();

        let reviewed = w
            .maps
            .assign_review(&judge(), MISSION, "alpha", ReviewQuality::High)
            .await
            .unwrap();
        assert_eq!(reviewed.image, uploaded.image);
        assert_eq!(w.maps.fetch(&team(), MISSION, "alpha").await.unwrap().data, png);
    }

    #[tokio::test]
    async fn test_old_blob_removed_and_storage_bounded() {
        let w = world();
        let first = w
            .maps
            .replace(&team(), MISSION, "alpha", Bytes::from(jpeg_bytes(5)))
            .await
            .unwrap();
        let first_key = first.image.unwrap().key;
        assert!(w.store.contains(&first_key).await);

        let png = Bytes::from(png_bytes(5));
        let second = w.maps.replace(&team(), MISSION, "alpha", png.clone()).await.unwrap();
        let second_key = second.image.unwrap().key;
        assert_ne!(first_key, second_key);
        assert!(second_key.ends_with(".png"));
        assert!(!w.store.contains(&first_key).await);

        for seed in 0..5 {
            w.maps
                .replace(&team(), MISSION, "alpha", Bytes::from(png_bytes(seed)))
                .await
                .unwrap();
        }
        assert_eq!(w.store.blob_count(), 1);
    }

    #[tokio::test]
    async fn test_key_uses_true_format_not_declared() {
        let key = blob_key(7, "alpha", MapFormat::Png);
        assert!(key.starts_with("maps/7-alpha-"));
        assert!(key.ends_with(".png"));
        assert_ne!(key, blob_key(7, "alpha", MapFormat::Png));
    }

    #[tokio::test]
    async fn test_other_team_forbidden_even_when_map_exists() {
        let w = world();
        w.maps
            .replace(&team(), MISSION, "alpha", Bytes::from(png_bytes(6)))
            .await
            .unwrap();

        let bravo = Requester::user("bravo", false);
        assert!(matches!(
            w.maps.fetch(&bravo, MISSION, "alpha").await,
            Err(MapError::Forbidden { .. })
        ));
        assert!(matches!(
            w.maps
                .replace(&bravo, MISSION, "alpha", Bytes::from(png_bytes(7)))
                .await,
            Err(MapError::Forbidden { .. })
        ));
        assert!(matches!(
            w.maps.remove(&bravo, MISSION, "alpha").await,
            Err(MapError::Forbidden { .. })
        ));
        assert!(matches!(
            w.maps.fetch(&Requester::Anonymous, MISSION, "alpha").await,
            Err(MapError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_judge_can_manage_team_map() {
        let w = world();
        let png = Bytes::from(png_bytes(8));
        w.maps.replace(&judge(), MISSION, "alpha", png.clone()).await.unwrap();
        assert_eq!(w.maps.fetch(&team(), MISSION, "alpha").await.unwrap().data, png);
        w.maps.remove(&judge(), MISSION, "alpha").await.unwrap();
        assert!(matches!(
            w.maps.fetch(&team(), MISSION, "alpha").await,
            Err(MapError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_blob_write_leaves_previous_map() {
        let w = world();
        let jpeg = Bytes::from(jpeg_bytes(9));
        w.maps.replace(&team(), MISSION, "alpha", jpeg.clone()).await.unwrap();
        let before = w.db.get_map(MISSION, "alpha").unwrap().unwrap();

        w.store.fail_puts.store(true, Ordering::SeqCst);
        let result = w
            .maps
            .replace(&team(), MISSION, "alpha", Bytes::from(png_bytes(9)))
            .await;
        assert!(matches!(result, Err(MapError::Storage { .. })));

        let after = w.db.get_map(MISSION, "alpha").unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(w.maps.fetch(&team(), MISSION, "alpha").await.unwrap().data, jpeg);
    }

    #[tokio::test]
    async fn test_old_blob_cleanup_failure_is_not_surfaced() {
        let w = world();
        let first = w
            .maps
            .replace(&team(), MISSION, "alpha", Bytes::from(jpeg_bytes(10)))
            .await
            .unwrap();

        w.store.fail_deletes.store(true, Ordering::SeqCst);
        let png = Bytes::from(png_bytes(10));
        w.maps.replace(&team(), MISSION, "alpha", png.clone()).await.unwrap();

        assert_eq!(w.maps.fetch(&team(), MISSION, "alpha").await.unwrap().data, png);
        // Leaked, but only because cleanup was made to fail.
        assert!(w.store.contains(&first.image.unwrap().key).await);
    }

    #[tokio::test]
    async fn test_remove_succeeds_when_blob_delete_fails() {
        let w = world();
        w.maps
            .replace(&team(), MISSION, "alpha", Bytes::from(png_bytes(11)))
            .await
            .unwrap();

        w.store.fail_deletes.store(true, Ordering::SeqCst);
        w.maps.remove(&team(), MISSION, "alpha").await.unwrap();
        assert!(matches!(
            w.maps.fetch(&team(), MISSION, "alpha").await,
            Err(MapError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_storage_times_out() {
        let w = TestWorld::new(Duration::from_millis(50));
        *w.store.delay.lock().unwrap() = Some(Duration::from_millis(500));

        let result = w
            .maps
            .replace(&team(), MISSION, "alpha", Bytes::from(png_bytes(12)))
            .await;
        match result {
            Err(MapError::Storage { cause }) => assert!(cause.contains("timed out"), "{cause}"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(w.db.get_map(MISSION, "alpha").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_late_acknowledged_write_is_cleaned_up() {
        let w = TestWorld::new(Duration::from_millis(100));
        // The object lands on disk but the backend answers after the deadline.
        *w.store.put_ack_delay.lock().unwrap() = Some(Duration::from_millis(300));

        for seed in 0..3 {
            let result = w
                .maps
                .replace(&team(), MISSION, "alpha", Bytes::from(png_bytes(seed)))
                .await;
            assert!(matches!(result, Err(MapError::Storage { .. })));
        }

        assert!(w.db.get_map(MISSION, "alpha").unwrap().is_none());
        assert_eq!(w.store.file_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_follows_concurrent_replace() {
        let w = world();
        w.maps
            .replace(&team(), MISSION, "alpha", Bytes::from(jpeg_bytes(20)))
            .await
            .unwrap();
        *w.store.get_delay.lock().unwrap() = Some(Duration::from_millis(300));

        let maps = Arc::clone(&w.maps);
        let reader = tokio::spawn(async move { maps.fetch(&team(), MISSION, "alpha").await });

        // Lands while the reader is still waiting on the old blob.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let png = Bytes::from(png_bytes(20));
        w.maps.replace(&team(), MISSION, "alpha", png.clone()).await.unwrap();

        let image = reader.await.unwrap().unwrap();
        assert_eq!(image.format, MapFormat::Png);
        assert_eq!(image.data, png);
        assert_eq!(w.store.blob_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_mission_or_owner() {
        let w = world();
        assert!(matches!(
            w.maps
                .replace(&team(), 999, "alpha", Bytes::from(png_bytes(13)))
                .await,
            Err(MapError::NotFound("Mission"))
        ));
        assert!(matches!(
            w.maps
                .replace(&judge(), MISSION, "ghost", Bytes::from(png_bytes(13)))
                .await,
            Err(MapError::NotFound("User"))
        ));
    }

    #[tokio::test]
    async fn test_review_permissions_and_missing_map() {
        let w = world();
        assert!(matches!(
            w.maps
                .assign_review(&judge(), MISSION, "alpha", ReviewQuality::High)
                .await,
            Err(MapError::NotFound(_))
        ));

        w.maps
            .replace(&team(), MISSION, "alpha", Bytes::from(png_bytes(14)))
            .await
            .unwrap();
        assert!(matches!(
            w.maps
                .assign_review(&team(), MISSION, "alpha", ReviewQuality::High)
                .await,
            Err(MapError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_requires_judge() {
        let w = world();
        w.maps
            .replace(&team(), MISSION, "alpha", Bytes::from(png_bytes(15)))
            .await
            .unwrap();

        let maps = w.maps.list(&judge(), MISSION).await.unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].owner, "alpha");

        assert!(matches!(
            w.maps.list(&team(), MISSION).await,
            Err(MapError::Forbidden { .. })
        ));
        assert!(matches!(
            w.maps.list(&judge(), 999).await,
            Err(MapError::NotFound("Mission"))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_replaces_leave_one_current_blob() {
        let w = world();
        let maps = Arc::clone(&w.maps);

        let uploads: Vec<_> = (0..8u8)
            .map(|seed| {
                let maps = Arc::clone(&maps);
                tokio::spawn(async move {
                    let data = if seed % 2 == 0 {
                        jpeg_bytes(seed)
                    } else {
                        png_bytes(seed)
                    };
                    maps.replace(&team(), MISSION, "alpha", Bytes::from(data))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for upload in uploads {
            upload.await.unwrap();
        }

        let record = w.db.get_map(MISSION, "alpha").unwrap().unwrap();
        let key = record.image.unwrap().key;
        assert_eq!(w.store.blob_count(), 1);
        assert!(w.store.contains(&key).await);
    }

    #[tokio::test]
    async fn test_purge_removes_blobs() {
        let w = world();
        let record = w
            .maps
            .replace(&team(), MISSION, "alpha", Bytes::from(png_bytes(16)))
            .await
            .unwrap();

        let stats = w.maps.purge().await.unwrap();
        assert_eq!(stats.maps, 1);
        assert_eq!(stats.missions, 1);
        assert!(!w.store.contains(&record.image.unwrap().key).await);
    }
}
