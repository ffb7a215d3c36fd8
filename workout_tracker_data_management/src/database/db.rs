use std::{path::Path, str::FromStr};

use const_format::concatcp;
use sqlx::{query, query_as, sqlite::{SqliteConnectOptions, SqlitePoolOptions}, Executor, Pool, Sqlite, SqlitePool};
use workout_tracker_lib::{track_point::PersistedPoint, track_session::PersistedSession};

use crate::DataManagerError;

use super::constants::*;

const SESSION_COLUMNS: &str = concatcp!(SESSION_ID, ", ", START_TIME, ", ", TOTAL_DISTANCE_METERS, ", ", DURATION_SECONDS, ", ", IS_FINISHED);
const POINT_COLUMNS: &str = concatcp!(SESSION_ID, ", ", LATITUDE, ", ", LONGITUDE, ", ", TIMESTAMP_MILLIS, ", ", SEGMENT_INDEX, ", ", SEQUENCE);

#[derive(Clone)]
pub struct TrackerDatabase {
    pool: Pool<Sqlite>,
}

impl TrackerDatabase {
    pub async fn connect(path: &Path) -> Result<Self, DataManagerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await
            .map_err(|e| DataManagerError::Database(format!("Failed to connect to database at {:?}: {e}", path)))?;

        let db = Self {
            pool
        };

        db.init().await?;

        Ok(db)
    }

    /// A private database living for as long as the returned handle. Single connection, since
    /// every in-memory connection is its own database.
    pub async fn connect_in_memory() -> Result<Self, DataManagerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DataManagerError::Database(format!("Invalid in-memory options: {e}")))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options).await
            .map_err(|e| DataManagerError::Database(format!("Failed to open in-memory database: {e}")))?;

        let db = Self {
            pool
        };

        db.init().await?;

        Ok(db)
    }

    pub async fn init(&self) -> Result<(), DataManagerError> {
        self.pool.execute(concatcp!("
            CREATE TABLE IF NOT EXISTS ", SESSIONS_TABLE_NAME, "(",
                SESSION_ID,            " TEXT PRIMARY KEY NOT NULL,",
                START_TIME,            " TIMESTAMP NOT NULL,",
                TOTAL_DISTANCE_METERS, " REAL NOT NULL,",
                DURATION_SECONDS,      " INTEGER NOT NULL,",
                IS_FINISHED,           " BOOLEAN NOT NULL);

            CREATE INDEX IF NOT EXISTS ", UNFINISHED_INDEX_NAME, " ON ", SESSIONS_TABLE_NAME, "(", IS_FINISHED, ");

            CREATE TABLE IF NOT EXISTS ", POINTS_TABLE_NAME, "(",
                POINT_ID,         " INTEGER PRIMARY KEY AUTOINCREMENT,",
                SESSION_ID,       " TEXT NOT NULL,",
                LATITUDE,         " REAL NOT NULL,",
                LONGITUDE,        " REAL NOT NULL,",
                TIMESTAMP_MILLIS, " INTEGER NOT NULL,",
                SEGMENT_INDEX,    " INTEGER NOT NULL,",
                SEQUENCE,         " INTEGER NOT NULL,
                UNIQUE(", SESSION_ID, ", ", SEQUENCE, "),
                FOREIGN KEY(", SESSION_ID, ") REFERENCES ", SESSIONS_TABLE_NAME, "(", SESSION_ID, ") ON DELETE CASCADE
            )")).await
            .map_err(|e| DataManagerError::Database(format!("Failed to create tables: {e}")))
            .map(|_| ())
    }

    pub async fn insert_session(&self, session: &PersistedSession) -> Result<(), DataManagerError> {
        query(concatcp!("INSERT INTO ", SESSIONS_TABLE_NAME, "(", SESSION_COLUMNS, ") VALUES (?1, ?2, ?3, ?4, ?5)"))
            .bind(&session.session_id)
            .bind(session.start_time)
            .bind(session.total_distance_meters)
            .bind(session.duration_seconds)
            .bind(session.is_finished)
            .execute(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to insert session {}: {e}", session.session_id)))
            .map(|_| ())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<PersistedSession>, DataManagerError> {
        query_as::<_, PersistedSession>(concatcp!("SELECT ", SESSION_COLUMNS, " FROM ", SESSIONS_TABLE_NAME, " WHERE ", SESSION_ID, " = ?1"))
            .bind(session_id)
            .fetch_optional(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to get session {session_id}: {e}")))
    }

    /// The most recently started session that was never finished, if any.
    pub async fn get_unfinished_session(&self) -> Result<Option<PersistedSession>, DataManagerError> {
        query_as::<_, PersistedSession>(concatcp!("SELECT ", SESSION_COLUMNS, " FROM ", SESSIONS_TABLE_NAME,
            " WHERE ", IS_FINISHED, " = 0 ORDER BY ", START_TIME, " DESC LIMIT 1"))
            .fetch_optional(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to look up unfinished session: {e}")))
    }

    pub async fn update_session_stats(&self, session_id: &str, total_distance_meters: f64, duration_seconds: i64) -> Result<(), DataManagerError> {
        let affected = query(concatcp!("UPDATE ", SESSIONS_TABLE_NAME, " SET ", TOTAL_DISTANCE_METERS, " = ?1, ", DURATION_SECONDS, " = ?2 WHERE ", SESSION_ID, " = ?3"))
            .bind(total_distance_meters)
            .bind(duration_seconds)
            .bind(session_id)
            .execute(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to update stats of session {session_id}: {e}")))?
            .rows_affected();

        if affected == 0 {
            return Err(DataManagerError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    pub async fn set_session_finished(&self, session_id: &str) -> Result<(), DataManagerError> {
        let affected = query(concatcp!("UPDATE ", SESSIONS_TABLE_NAME, " SET ", IS_FINISHED, " = 1 WHERE ", SESSION_ID, " = ?1"))
            .bind(session_id)
            .execute(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to finish session {session_id}: {e}")))?
            .rows_affected();

        if affected == 0 {
            return Err(DataManagerError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    /// Deletes the session row. Its points go with it through the cascade.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), DataManagerError> {
        query(concatcp!("DELETE FROM ", SESSIONS_TABLE_NAME, " WHERE ", SESSION_ID, " = ?1"))
            .bind(session_id)
            .execute(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to delete session {session_id}: {e}")))
            .map(|_| ())
    }

    pub async fn delete_all_sessions(&self) -> Result<(), DataManagerError> {
        query(concatcp!("DELETE FROM ", SESSIONS_TABLE_NAME))
            .execute(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to delete sessions: {e}")))
            .map(|_| ())
    }

    /// Inserts the batch in one transaction. Points whose sequence number is already stored are
    /// skipped, so a batch can safely be written twice.
    pub async fn insert_points(&self, points: &[PersistedPoint]) -> Result<(), DataManagerError> {
        let mut tx = self.pool.begin().await
            .map_err(|e| DataManagerError::Database(format!("Failed to begin transaction: {e}")))?;

        for point in points {
            query(concatcp!("INSERT OR IGNORE INTO ", POINTS_TABLE_NAME, "(", POINT_COLUMNS, ") VALUES (?1, ?2, ?3, ?4, ?5, ?6)"))
                .bind(&point.session_id)
                .bind(point.latitude)
                .bind(point.longitude)
                .bind(point.timestamp_millis)
                .bind(point.segment_index)
                .bind(point.sequence)
                .execute(&mut *tx).await
                .map_err(|e| DataManagerError::Database(format!("Failed to insert point {} of session {}: {e}", point.sequence, point.session_id)))?;
        }

        tx.commit().await
            .map_err(|e| DataManagerError::Database(format!("Failed to commit points: {e}")))
    }

    pub async fn get_session_points(&self, session_id: &str) -> Result<Vec<PersistedPoint>, DataManagerError> {
        query_as::<_, PersistedPoint>(concatcp!("SELECT ", POINT_COLUMNS, " FROM ", POINTS_TABLE_NAME, " WHERE ", SESSION_ID, " = ?1 ORDER BY ",
            SEGMENT_INDEX, ", ", TIMESTAMP_MILLIS, ", ", SEQUENCE))
            .bind(session_id)
            .fetch_all(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to get points of session {session_id}: {e}")))
    }

    pub async fn count_session_points(&self, session_id: &str) -> Result<i64, DataManagerError> {
        query_as::<_, (i64,)>(concatcp!("SELECT COUNT(*) FROM ", POINTS_TABLE_NAME, " WHERE ", SESSION_ID, " = ?1"))
            .bind(session_id)
            .fetch_one(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to count points of session {session_id}: {e}")))
            .map(|row| row.0)
    }
}
