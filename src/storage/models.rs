use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Image formats accepted for map submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapFormat {
    Jpeg,
    Png,
}

impl MapFormat {
    /// Canonical file extension, used when naming stored blobs.
    pub fn extension(self) -> &'static str {
        match self {
            MapFormat::Jpeg => "jpg",
            MapFormat::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            MapFormat::Jpeg => "image/jpeg",
            MapFormat::Png => "image/png",
        }
    }
}

impl std::fmt::Display for MapFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapFormat::Jpeg => f.write_str("JPEG"),
            MapFormat::Png => f.write_str("PNG"),
        }
    }
}

/// Judge-assigned rating of a submitted map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewQuality {
    Insufficient,
    Medium,
    High,
}

/// The blob currently backing a map record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    /// Object store key.
    pub key: String,
    pub format: MapFormat,
    pub byte_size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// One map submission per (mission, owner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRecord {
    pub mission_id: u64,
    pub owner: String,
    /// `None` until an image has been stored.
    #[serde(default)]
    pub image: Option<StoredImage>,
    /// `None` means not yet reviewed, or invalidated by a newer upload.
    #[serde(default)]
    pub quality: Option<ReviewQuality>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MapRecord {
    pub fn new(mission_id: u64, owner: &str) -> Self {
        let now = Utc::now();
        Self {
            mission_id,
            owner: owner.to_string(),
            image: None,
            quality: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A competition mission that maps can be submitted for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A team or judge account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub is_superuser: bool,
    /// Hex SHA-256 of the API token. The token itself is never stored.
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Usernames end up inside object store keys, so they are restricted to a
/// filename-safe alphabet.
pub fn is_valid_username(username: &str) -> bool {
    (1..=64).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && username != "."
        && username != ".."
}
