use chrono::Utc;
use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::MissionRecord;
use super::tables::*;

impl Database {
    // ========================================================================
    // Mission operations
    // ========================================================================

    /// Register a mission, or rename it if it already exists.
    /// `created_at` of an existing mission is preserved.
    pub fn upsert_mission(&self, id: u64, name: &str) -> Result<MissionRecord, DatabaseError> {
        let write_txn = self.begin_write()?;
        let mission = {
            let mut table = write_txn.open_table(MISSIONS)?;

            let existing: Option<MissionRecord> = match table.get(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            let now = Utc::now();
            let mission = match existing {
                Some(mut mission) => {
                    mission.name = name.to_string();
                    mission.updated_at = now;
                    mission
                }
                None => MissionRecord {
                    id,
                    name: name.to_string(),
                    created_at: now,
                    updated_at: now,
                },
            };

            let data = rmp_serde::to_vec_named(&mission)?;
            table.insert(id, data.as_slice())?;
            mission
        };
        write_txn.commit()?;
        Ok(mission)
    }

    pub fn get_mission(&self, id: u64) -> Result<Option<MissionRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(MISSIONS)?;

        let record = match table.get(id)? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        Ok(record)
    }

    pub fn mission_exists(&self, id: u64) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(MISSIONS)?;
        let exists = table.get(id)?.is_some();
        Ok(exists)
    }

    /// All missions, ordered by id
    pub fn list_missions(&self) -> Result<Vec<MissionRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(MISSIONS)?;

        let mut missions = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            missions.push(rmp_serde::from_slice(value.value())?);
        }

        Ok(missions)
    }
}
