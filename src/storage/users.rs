use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::UserRecord;
use super::tables::*;

impl Database {
    // ========================================================================
    // User operations
    // ========================================================================

    /// Store a new user and index its token hash.
    /// Returns `false` without writing if the username is taken.
    pub fn create_user(&self, user: &UserRecord) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let created = {
            let mut users = write_txn.open_table(USERS)?;
            if users.get(user.username.as_str())?.is_some() {
                false
            } else {
                let data = rmp_serde::to_vec_named(user)?;
                users.insert(user.username.as_str(), data.as_slice())?;

                let mut tokens = write_txn.open_table(USER_TOKENS)?;
                tokens.insert(user.token_hash.as_str(), user.username.as_str())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(created)
    }

    /// Insert or replace a user, moving the token index entry if the token
    /// changed. `created_at` of an existing user is preserved.
    pub fn upsert_user(&self, user: &UserRecord) -> Result<UserRecord, DatabaseError> {
        let write_txn = self.begin_write()?;
        let stored = {
            let mut users = write_txn.open_table(USERS)?;
            let existing: Option<UserRecord> = match users.get(user.username.as_str())? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            let mut tokens = write_txn.open_table(USER_TOKENS)?;
            let mut stored = user.clone();
            if let Some(existing) = existing {
                stored.created_at = existing.created_at;
                if existing.token_hash != user.token_hash {
                    tokens.remove(existing.token_hash.as_str())?;
                }
            }

            let data = rmp_serde::to_vec_named(&stored)?;
            users.insert(stored.username.as_str(), data.as_slice())?;
            tokens.insert(stored.token_hash.as_str(), stored.username.as_str())?;
            stored
        };
        write_txn.commit()?;
        Ok(stored)
    }

    pub fn get_user(&self, username: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        let record = match table.get(username)? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        Ok(record)
    }

    /// Resolve a token hash to its user (token hash -> username -> user)
    pub fn get_user_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let tokens = read_txn.open_table(USER_TOKENS)?;

        let username = match tokens.get(token_hash)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let users = read_txn.open_table(USERS)?;
        let record = match users.get(username.as_str())? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        Ok(record)
    }
}
