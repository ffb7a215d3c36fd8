use std::{path::{Path, PathBuf}, sync::Arc};

use workout_tracker_lib::{track_point::PersistedPoint, track_session::PersistedSession};

use crate::{buffer::{buffer_file::BufferFile, point_store::BufferedPointStore}, database::db::TrackerDatabase, DataManagerError, BUFFER_FILE_DIR, DATABASE_FILE};

#[derive(Clone)]
pub struct DataManager {
    pub(crate) database: TrackerDatabase,
    pub(crate) point_store: BufferedPointStore,
    data_dir: PathBuf,
}

/// The public interface for all workout tracker data management.
impl DataManager {
    pub async fn start(data_dir: &Path, batch_size: usize) -> Result<Self, DataManagerError> {
        // Create data dir if it doesn't exist
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir)
                .map_err(|_| DataManagerError::Database(format!("Failed to create data directory: {:?}", data_dir)))?;
        }

        let database = TrackerDatabase::connect(&data_dir.join(DATABASE_FILE)).await?;
        let point_store = BufferedPointStore::new(Arc::new(database.clone()), data_dir.join(BUFFER_FILE_DIR), batch_size);

        tracing::debug!(data_dir = ?data_dir, batch_size, "Data manager started");

        Ok(DataManager {
            database,
            point_store,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn point_store(&self) -> BufferedPointStore {
        self.point_store.clone()
    }

    pub fn database(&self) -> &TrackerDatabase {
        &self.database
    }

    pub async fn unfinished_session(&self) -> Result<Option<PersistedSession>, DataManagerError> {
        self.database.get_unfinished_session().await
    }

    /// Stored points plus the ones only present in the buffer file, ordered by sequence.
    pub async fn session_points(&self, session_id: &str) -> Result<Vec<PersistedPoint>, DataManagerError> {
        if self.database.get_session(session_id).await?.is_none() {
            return Err(DataManagerError::SessionNotFound(session_id.to_string()));
        }

        let stored = self.database.get_session_points(session_id).await?;
        let buffered = BufferFile::read_points(&BufferFile::path_for(&self.data_dir.join(BUFFER_FILE_DIR), session_id)).await?;
        let (mut points, _) = crate::recovery::merge_points(stored, buffered);
        points.sort_by_key(|p| p.sequence);
        Ok(points)
    }

    /// Removes a session and its buffer file without going through the point store.
    pub async fn discard_session(&self, session_id: &str) -> Result<(), DataManagerError> {
        if self.database.get_session(session_id).await?.is_none() {
            return Err(DataManagerError::SessionNotFound(session_id.to_string()));
        }

        self.database.delete_session(session_id).await?;
        BufferFile::remove(&BufferFile::path_for(&self.data_dir.join(BUFFER_FILE_DIR), session_id)).await?;

        tracing::info!(session_id, "Discarded session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use workout_tracker_lib::location_sample::LocationSample;

    use super::*;

    #[tokio::test]
    async fn points_include_the_buffer_file() {
        let dir = tempfile::tempdir().unwrap();
        let data_manager = DataManager::start(dir.path(), 4).await.unwrap();
        let store = data_manager.point_store();
        store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();

        for i in 0..6 {
            store.enqueue(&LocationSample::new(1., 2., i * 1000, 2., 3.), 0).await.unwrap();
        }
        store.force_flush().await.unwrap();
        store.enqueue(&LocationSample::new(1., 2., 6000, 2., 3.), 0).await.unwrap();

        let points = data_manager.session_points("s1").await.unwrap();
        assert_eq!(points.iter().map(|p| p.sequence).collect::<Vec<_>>(), (0..7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn discarding_unknown_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let data_manager = DataManager::start(dir.path(), 10).await.unwrap();

        let result = data_manager.discard_session("ghost").await;
        assert!(matches!(result, Err(DataManagerError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn discard_removes_the_unfinished_session() {
        let dir = tempfile::tempdir().unwrap();
        let data_manager = DataManager::start(dir.path(), 10).await.unwrap();
        data_manager.point_store().start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();

        data_manager.discard_session("s1").await.unwrap();

        assert!(data_manager.unfinished_session().await.unwrap().is_none());
    }
}
