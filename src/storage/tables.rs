use redb::TableDefinition;

/// Map records: (mission_id, owner username) -> MapRecord (msgpack)
pub const MAPS: TableDefinition<(u64, &str), &[u8]> = TableDefinition::new("maps");

/// Missions: mission_id -> MissionRecord (msgpack)
pub const MISSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("missions");

/// Users: username -> UserRecord (msgpack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Token index: hex SHA-256 of the API token -> username
pub const USER_TOKENS: TableDefinition<&str, &str> = TableDefinition::new("user_tokens");
