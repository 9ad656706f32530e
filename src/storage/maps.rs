use chrono::Utc;
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::{MapRecord, ReviewQuality, StoredImage};
use super::tables::*;

/// Outcome of pointing a map record at a new image.
#[derive(Debug, Clone)]
pub struct ImageSwap {
    pub record: MapRecord,
    /// The image the record pointed at before the swap, if any.
    pub previous: Option<StoredImage>,
}

impl Database {
    // ========================================================================
    // Map operations
    // ========================================================================

    /// Get the map record for a mission and owner
    pub fn get_map(&self, mission_id: u64, owner: &str) -> Result<Option<MapRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(MAPS)?;

        let record = match table.get((mission_id, owner))? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        Ok(record)
    }

    /// Point the record at `image` and clear any review, creating the record
    /// if this is the first upload. Both changes land in one transaction.
    pub fn swap_map_image(
        &self,
        mission_id: u64,
        owner: &str,
        image: StoredImage,
    ) -> Result<ImageSwap, DatabaseError> {
        let write_txn = self.begin_write()?;
        let swap = {
            let mut table = write_txn.open_table(MAPS)?;

            let existing: Option<MapRecord> = match table.get((mission_id, owner))? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            let mut record = existing.unwrap_or_else(|| MapRecord::new(mission_id, owner));
            let previous = record.image.replace(image);
            record.quality = None;
            record.reviewed_at = None;
            record.updated_at = Utc::now();

            let data = rmp_serde::to_vec_named(&record)?;
            table.insert((mission_id, owner), data.as_slice())?;

            ImageSwap { record, previous }
        };
        write_txn.commit()?;
        Ok(swap)
    }

    /// Set the review quality of a map that has an image.
    /// Returns `None` when there is no such map.
    pub fn set_map_quality(
        &self,
        mission_id: u64,
        owner: &str,
        quality: ReviewQuality,
    ) -> Result<Option<MapRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(MAPS)?;

            let existing: Option<MapRecord> = match table.get((mission_id, owner))? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            match existing {
                Some(mut record) if record.image.is_some() => {
                    let now = Utc::now();
                    record.quality = Some(quality);
                    record.reviewed_at = Some(now);
                    record.updated_at = now;

                    let data = rmp_serde::to_vec_named(&record)?;
                    table.insert((mission_id, owner), data.as_slice())?;
                    Some(record)
                }
                _ => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Remove a map record, returning what was removed
    pub fn delete_map(
        &self,
        mission_id: u64,
        owner: &str,
    ) -> Result<Option<MapRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(MAPS)?;
            let removed = table.remove((mission_id, owner))?;
            match removed {
                Some(data) => Some(rmp_serde::from_slice::<MapRecord>(data.value())?),
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// List every map record for a mission, ordered by owner
    pub fn list_maps(&self, mission_id: u64) -> Result<Vec<MapRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(MAPS)?;

        let start: (u64, &str) = (mission_id, "");
        let mut maps = Vec::new();
        for result in table.range(start..)? {
            let (key, value) = result?;
            if key.value().0 != mission_id {
                break;
            }
            maps.push(rmp_serde::from_slice(value.value())?);
        }

        Ok(maps)
    }
}
