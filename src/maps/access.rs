use super::error::MapError;
use crate::identity::{Identity, Requester};

/// Decides who may touch a map submission. Evaluated before any storage
/// access, so a denial never reveals whether the map exists.
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn can_read(requester: &Requester, _mission_id: u64, owner: &str) -> bool {
        Self::owner_or_privileged(requester, owner)
    }

    pub fn can_write(requester: &Requester, _mission_id: u64, owner: &str) -> bool {
        Self::owner_or_privileged(requester, owner)
    }

    /// Review assignment is reserved for judges.
    pub fn can_review(requester: &Requester) -> bool {
        matches!(requester, Requester::User(identity) if identity.is_superuser)
    }

    pub fn authorize_read<'a>(
        requester: &'a Requester,
        mission_id: u64,
        owner: &str,
    ) -> Result<&'a Identity, MapError> {
        let identity = Self::authenticated(requester)?;
        if Self::can_read(requester, mission_id, owner) {
            Ok(identity)
        } else {
            Err(forbidden(identity, owner))
        }
    }

    pub fn authorize_write<'a>(
        requester: &'a Requester,
        mission_id: u64,
        owner: &str,
    ) -> Result<&'a Identity, MapError> {
        let identity = Self::authenticated(requester)?;
        if Self::can_write(requester, mission_id, owner) {
            Ok(identity)
        } else {
            Err(forbidden(identity, owner))
        }
    }

    pub fn authorize_review(requester: &Requester, owner: &str) -> Result<(), MapError> {
        let identity = Self::authenticated(requester)?;
        if Self::can_review(requester) {
            Ok(())
        } else {
            Err(forbidden(identity, owner))
        }
    }

    /// Operations not tied to one owner, such as listing a mission's maps.
    pub fn authorize_privileged(requester: &Requester) -> Result<&Identity, MapError> {
        let identity = Self::authenticated(requester)?;
        if identity.is_superuser {
            Ok(identity)
        } else {
            Err(MapError::Forbidden {
                requester: identity.username.clone(),
                owner: "*".to_string(),
            })
        }
    }

    fn authenticated(requester: &Requester) -> Result<&Identity, MapError> {
        requester.identity().ok_or(MapError::Unauthenticated)
    }

    fn owner_or_privileged(requester: &Requester, owner: &str) -> bool {
        match requester {
            Requester::Anonymous => false,
            Requester::User(identity) => identity.is_superuser || identity.username == owner,
        }
    }
}

fn forbidden(identity: &Identity, owner: &str) -> MapError {
    MapError::Forbidden {
        requester: identity.username.clone(),
        owner: owner.to_string(),
    }
}
