use thiserror::Error;

use crate::object_store::ObjectStoreError;
use crate::storage::DatabaseError;

/// Failures surfaced by map operations.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("User [{requester}] is not able to access maps owned by user [{owner}]")]
    Forbidden { requester: String, owner: String },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{reason}")]
    RejectedFormat { reason: String },
    #[error("Storage error: {cause}")]
    Storage { cause: String },
}

impl MapError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        MapError::RejectedFormat {
            reason: reason.into(),
        }
    }

    pub fn storage(cause: impl std::fmt::Display) -> Self {
        MapError::Storage {
            cause: cause.to_string(),
        }
    }
}

impl From<DatabaseError> for MapError {
    fn from(e: DatabaseError) -> Self {
        MapError::storage(e)
    }
}

impl From<ObjectStoreError> for MapError {
    fn from(e: ObjectStoreError) -> Self {
        MapError::storage(e)
    }
}
