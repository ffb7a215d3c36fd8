use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable session record. `is_finished == false` marks a session that was interrupted and can
/// be recovered.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub total_distance_meters: f64,
    pub duration_seconds: i64,
    pub is_finished: bool,
}

impl PersistedSession {
    pub fn new(session_id: String, start_time: DateTime<Utc>) -> Self {
        Self {
            session_id,
            start_time,
            total_distance_meters: 0.,
            duration_seconds: 0,
            is_finished: false,
        }
    }
}
