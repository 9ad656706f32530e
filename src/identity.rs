//! Requester identity: API tokens, their hashes, and resolution to users.
//!
//! Identity is always passed explicitly into authorization decisions; nothing
//! here keeps ambient per-request state.

use base64::Engine;
use chrono::Utc;
use ring::rand::{SecureRandom, SystemRandom};

use crate::storage::models::{is_valid_username, UserRecord};
use crate::storage::{Database, DatabaseError};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    /// Judges and administrators.
    pub is_superuser: bool,
}

impl From<&UserRecord> for Identity {
    fn from(user: &UserRecord) -> Self {
        Self {
            username: user.username.clone(),
            is_superuser: user.is_superuser,
        }
    }
}

/// Who is making a request. Anonymous callers are represented explicitly so
/// every authorization decision sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    Anonymous,
    User(Identity),
}

impl Requester {
    pub fn user(username: &str, is_superuser: bool) -> Self {
        Requester::User(Identity {
            username: username.to_string(),
            is_superuser,
        })
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Requester::Anonymous => None,
            Requester::User(identity) => Some(identity),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid username '{0}': use 1-64 characters from [A-Za-z0-9_.-]")]
    InvalidUsername(String),
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),
    #[error("Failed to generate token")]
    Rng,
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Hex SHA-256 of a token, the only form in which tokens are persisted.
pub fn hash_token(token: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, token.as_bytes());
    digest
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// 32 random bytes, URL-safe base64 without padding.
pub fn generate_token() -> Result<String, IdentityError> {
    let mut raw = [0u8; 32];
    SystemRandom::new()
        .fill(&mut raw)
        .map_err(|_| IdentityError::Rng)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw))
}

/// Resolve a presented bearer token. Unknown tokens resolve to `Anonymous`.
pub fn authenticate(db: &Database, token: Option<&str>) -> Result<Requester, DatabaseError> {
    let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(Requester::Anonymous);
    };

    Ok(match db.get_user_by_token_hash(&hash_token(token))? {
        Some(user) => Requester::User(Identity::from(&user)),
        None => Requester::Anonymous,
    })
}

/// Create a user with a fresh token. The token is returned once and never
/// stored in clear.
pub fn register_user(
    db: &Database,
    username: &str,
    is_superuser: bool,
) -> Result<(UserRecord, String), IdentityError> {
    if !is_valid_username(username) {
        return Err(IdentityError::InvalidUsername(username.to_string()));
    }

    let token = generate_token()?;
    let user = UserRecord {
        username: username.to_string(),
        is_superuser,
        token_hash: hash_token(&token),
        created_at: Utc::now(),
    };

    if !db.create_user(&user)? {
        return Err(IdentityError::UsernameTaken(username.to_string()));
    }
    Ok((user, token))
}

/// Ensure a superuser exists with exactly the given token.
pub fn ensure_superuser(
    db: &Database,
    username: &str,
    token: &str,
) -> Result<UserRecord, IdentityError> {
    if !is_valid_username(username) {
        return Err(IdentityError::InvalidUsername(username.to_string()));
    }

    let user = UserRecord {
        username: username.to_string(),
        is_superuser: true,
        token_hash: hash_token(token),
        created_at: Utc::now(),
    };
    Ok(db.upsert_user(&user)?)
}
