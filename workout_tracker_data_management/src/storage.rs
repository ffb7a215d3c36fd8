use workout_tracker_lib::{track_point::PersistedPoint, track_session::PersistedSession};

use crate::{database::db::TrackerDatabase, DataManagerError};

/// The durable side of the point store. Implemented by the SQLite database; tests swap in
/// wrappers that fail on demand.
#[async_trait::async_trait]
pub trait SessionStorage: Send + Sync {
    async fn create_session(&self, session: &PersistedSession) -> Result<(), DataManagerError>;

    async fn write_points(&self, points: &[PersistedPoint]) -> Result<(), DataManagerError>;

    async fn update_stats(&self, session_id: &str, total_distance_meters: f64, duration_seconds: i64) -> Result<(), DataManagerError>;

    async fn mark_finished(&self, session_id: &str) -> Result<(), DataManagerError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), DataManagerError>;

    async fn unfinished_session(&self) -> Result<Option<PersistedSession>, DataManagerError>;

    async fn session_points(&self, session_id: &str) -> Result<Vec<PersistedPoint>, DataManagerError>;
}

#[async_trait::async_trait]
impl SessionStorage for TrackerDatabase {
    async fn create_session(&self, session: &PersistedSession) -> Result<(), DataManagerError> {
        self.insert_session(session).await
    }

    async fn write_points(&self, points: &[PersistedPoint]) -> Result<(), DataManagerError> {
        self.insert_points(points).await
    }

    async fn update_stats(&self, session_id: &str, total_distance_meters: f64, duration_seconds: i64) -> Result<(), DataManagerError> {
        self.update_session_stats(session_id, total_distance_meters, duration_seconds).await
    }

    async fn mark_finished(&self, session_id: &str) -> Result<(), DataManagerError> {
        self.set_session_finished(session_id).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), DataManagerError> {
        TrackerDatabase::delete_session(self, session_id).await
    }

    async fn unfinished_session(&self) -> Result<Option<PersistedSession>, DataManagerError> {
        self.get_unfinished_session().await
    }

    async fn session_points(&self, session_id: &str) -> Result<Vec<PersistedPoint>, DataManagerError> {
        self.get_session_points(session_id).await
    }
}
