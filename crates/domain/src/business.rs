use serde::{Deserialize, Serialize};

/// Directory row for a listed business. Listings themselves (creation,
/// search, moderation) live outside this subsystem; we only read them to
/// resolve ownership and to name businesses in notifications.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusinessRecord {
    pub business_id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at_ms: i64,
}
