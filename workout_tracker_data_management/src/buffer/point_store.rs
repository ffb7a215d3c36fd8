use std::{path::{Path, PathBuf}, sync::{atomic::{AtomicU32, Ordering}, Arc}};

use tokio::{sync::Mutex, task::JoinHandle};
use workout_tracker_lib::{location_sample::LocationSample, track_point::PersistedPoint, track_session::PersistedSession};

use crate::{recovery::{self, RecoveredSession}, storage::SessionStorage, DataManagerError};

use super::buffer_file::BufferFile;

/// Consecutive failed flushes after which callers should warn the user.
pub const FAILURE_WARNING_THRESHOLD: u32 = 3;

/**
 * BufferedPointStore keeps the path points of the open session in memory and writes them to
 * storage in batches. Every point is also appended to the session's buffer file, so points that
 * never made it into a batch can be recovered after a crash.
 */
#[derive(Clone)]
pub struct BufferedPointStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    storage: Arc<dyn SessionStorage>,
    buffer_file_dir: PathBuf,
    batch_size: usize,
    buffer: Mutex<PointBuffer>,
    // Held for the whole durable write, so batches reach storage one at a time and in order.
    write_lock: Mutex<()>,
    consecutive_failures: AtomicU32,
}

#[derive(Default)]
struct PointBuffer {
    session_id: Option<String>,
    points: Vec<PersistedPoint>,
    buffer_file: Option<BufferFile>,
    next_sequence: i64,
    pending_flush: Option<JoinHandle<()>>,
}

impl BufferedPointStore {
    pub fn new(storage: Arc<dyn SessionStorage>, buffer_file_dir: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                storage,
                buffer_file_dir: buffer_file_dir.into(),
                batch_size: batch_size.max(1),
                buffer: Mutex::new(PointBuffer::default()),
                write_lock: Mutex::new(()),
                consecutive_failures: AtomicU32::new(0),
            })
        }
    }

    pub fn buffer_file_dir(&self) -> &Path {
        &self.inner.buffer_file_dir
    }

    pub async fn current_session_id(&self) -> Option<String> {
        self.inner.buffer.lock().await.session_id.clone()
    }

    pub async fn buffered_len(&self) -> usize {
        self.inner.buffer.lock().await.points.len()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Drops whatever is buffered from an earlier session and opens a new durable session record.
    pub async fn start_session(&self, session: &PersistedSession) -> Result<(), DataManagerError> {
        let _write = self.inner.write_lock.lock().await;
        let mut buffer = self.inner.buffer.lock().await;

        if let Some(stale) = buffer.session_id.take() {
            tracing::warn!(session_id = %stale, dropped = buffer.points.len(), "Clearing stale point buffer");
        }
        if let Some(pending) = buffer.pending_flush.take() {
            pending.abort();
        }
        buffer.points.clear();
        buffer.buffer_file = None;
        buffer.next_sequence = 0;
        self.inner.consecutive_failures.store(0, Ordering::Relaxed);

        self.inner.storage.create_session(session).await?;

        buffer.buffer_file = match BufferFile::open(&self.inner.buffer_file_dir, &session.session_id).await {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!("Continuing without buffer file: {e}");
                None
            }
        };
        buffer.session_id = Some(session.session_id.clone());

        tracing::info!(session_id = %session.session_id, "Point store session started");
        Ok(())
    }

    /// Re-attaches the store to a session returned by [`Self::recover`].
    pub async fn resume_session(&self, recovered: &RecoveredSession) -> Result<(), DataManagerError> {
        let _write = self.inner.write_lock.lock().await;
        let mut buffer = self.inner.buffer.lock().await;

        let mut buffer_file = BufferFile::open(&self.inner.buffer_file_dir, &recovered.session.session_id).await?;
        buffer_file.rewrite(&[]).await?;

        buffer.points.clear();
        buffer.buffer_file = Some(buffer_file);
        buffer.next_sequence = recovered.next_sequence;
        buffer.session_id = Some(recovered.session.session_id.clone());

        tracing::info!(session_id = %recovered.session.session_id, next_sequence = recovered.next_sequence, "Point store session resumed");
        Ok(())
    }

    /// Buffers one point of the open session. Reaching the batch size schedules a background flush.
    pub async fn enqueue(&self, sample: &LocationSample, segment_index: u32) -> Result<(), DataManagerError> {
        let mut buffer = self.inner.buffer.lock().await;
        let Some(session_id) = buffer.session_id.clone() else {
            return Err(DataManagerError::NoActiveSession);
        };

        let point = PersistedPoint::new(session_id, sample, segment_index, buffer.next_sequence);
        buffer.next_sequence += 1;

        if let Some(buffer_file) = buffer.buffer_file.as_mut() {
            if let Err(e) = buffer_file.append(&point).await {
                tracing::warn!("Point {} only buffered in memory: {e}", point.sequence);
            }
        }
        buffer.points.push(point);

        let flush_running = buffer.pending_flush.as_ref().is_some_and(|handle| !handle.is_finished());
        if buffer.points.len() >= self.inner.batch_size && !flush_running {
            let inner = self.inner.clone();
            buffer.pending_flush = Some(tokio::spawn(async move {
                // Failures are counted and logged inside; the points stay buffered for the next try.
                let _ = inner.flush_batch().await;
            }));
        }

        Ok(())
    }

    /// Writes everything buffered, regardless of batch size, and returns once it is durable.
    pub async fn force_flush(&self) -> Result<usize, DataManagerError> {
        let pending = self.inner.buffer.lock().await.pending_flush.take();
        if let Some(handle) = pending {
            let _ = handle.await;
        }
        self.inner.flush_batch().await
    }

    pub async fn update_session_stats(&self, total_distance_meters: f64, duration_seconds: u64) -> Result<(), DataManagerError> {
        let session_id = self.current_session_id().await.ok_or(DataManagerError::NoActiveSession)?;
        self.inner.storage.update_stats(&session_id, total_distance_meters, duration_seconds as i64).await
    }

    /// Whether `session_id` is still the unfinished session in storage. Turns false when storage
    /// was wiped behind our back.
    pub async fn is_session_open(&self, session_id: &str) -> Result<bool, DataManagerError> {
        Ok(self.inner.storage.unfinished_session().await?
            .is_some_and(|session| session.session_id == session_id))
    }

    /// Flushes, marks the session finished and then purges it locally.
    pub async fn finish_session(&self) -> Result<(), DataManagerError> {
        let session_id = self.current_session_id().await.ok_or(DataManagerError::NoActiveSession)?;

        self.force_flush().await?;
        self.inner.storage.mark_finished(&session_id).await?;
        self.inner.storage.delete_session(&session_id).await?;
        self.close().await;

        tracing::info!(session_id = %session_id, "Point store session finished");
        Ok(())
    }

    pub async fn discard_session(&self) -> Result<(), DataManagerError> {
        let session_id = self.current_session_id().await.ok_or(DataManagerError::NoActiveSession)?;

        if let Err(e) = self.force_flush().await {
            tracing::warn!(session_id = %session_id, "Flush before discard failed: {e}");
        }
        self.inner.storage.delete_session(&session_id).await?;
        self.close().await;

        tracing::info!(session_id = %session_id, "Point store session discarded");
        Ok(())
    }

    /// Lets go of the open session without touching storage, for a session storage no longer has.
    /// Buffered points and the buffer file are dropped.
    pub async fn abandon_session(&self) {
        let pending = self.inner.buffer.lock().await.pending_flush.take();
        if let Some(handle) = pending {
            handle.abort();
        }

        let _write = self.inner.write_lock.lock().await;
        let session_id = self.current_session_id().await;
        let dropped = self.buffered_len().await;
        self.close().await;

        tracing::info!(session_id = ?session_id, dropped, "Point store session abandoned");
    }

    pub async fn has_unfinished_session(&self) -> Result<bool, DataManagerError> {
        Ok(self.inner.storage.unfinished_session().await?.is_some())
    }

    /// Loads the unfinished session, if any. Points only found in its buffer file are written to
    /// storage first. An unfinished session without points is deleted instead of recovered.
    pub async fn recover(&self) -> Result<Option<RecoveredSession>, DataManagerError> {
        let Some(session) = self.inner.storage.unfinished_session().await? else {
            return Ok(None);
        };
        let session_id = session.session_id.clone();

        let stored = self.inner.storage.session_points(&session_id).await?;
        let buffer_file_path = BufferFile::path_for(&self.inner.buffer_file_dir, &session_id);
        let buffered = BufferFile::read_points(&buffer_file_path).await.unwrap_or_else(|e| {
            tracing::warn!(session_id = %session_id, "Ignoring unreadable buffer file: {e}");
            Vec::new()
        });

        let (points, missing) = recovery::merge_points(stored, buffered);
        if !missing.is_empty() {
            self.inner.storage.write_points(&missing).await?;
            tracing::info!(session_id = %session_id, count = missing.len(), "Moved buffer file points into storage");
        }

        match recovery::rebuild(session, points) {
            Some(recovered) => {
                BufferFile::remove(&buffer_file_path).await?;
                tracing::info!(session_id = %session_id, points = recovered.point_count(), segments = recovered.segments.len(), "Recovered unfinished session");
                Ok(Some(recovered))
            },
            None => {
                self.inner.storage.delete_session(&session_id).await?;
                BufferFile::remove(&buffer_file_path).await?;
                tracing::info!(session_id = %session_id, "Discarded unfinished session without points");
                Ok(None)
            },
        }
    }

    async fn close(&self) {
        let mut buffer = self.inner.buffer.lock().await;
        buffer.session_id = None;
        buffer.points.clear();
        buffer.pending_flush = None;
        if let Some(buffer_file) = buffer.buffer_file.take() {
            if let Err(e) = BufferFile::remove(buffer_file.path()).await {
                tracing::warn!("{e}");
            }
        }
    }
}

impl StoreInner {
    /// Swaps the buffered points out under the buffer lock, then writes them with only the write
    /// lock held. On failure the batch goes back in front of anything enqueued meanwhile.
    async fn flush_batch(&self) -> Result<usize, DataManagerError> {
        let _write = self.write_lock.lock().await;

        let batch = std::mem::take(&mut self.buffer.lock().await.points);
        if batch.is_empty() {
            return Ok(0);
        }

        match self.storage.write_points(&batch).await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);

                let mut buffer = self.buffer.lock().await;
                let remaining = buffer.points.clone();
                if let Some(buffer_file) = buffer.buffer_file.as_mut() {
                    if let Err(e) = buffer_file.rewrite(&remaining).await {
                        tracing::warn!("Failed to compact buffer file: {e}");
                    }
                }

                tracing::debug!(count = batch.len(), "Flushed points");
                Ok(batch.len())
            },
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

                let mut buffer = self.buffer.lock().await;
                let newer = std::mem::replace(&mut buffer.points, batch);
                buffer.points.extend(newer);

                tracing::warn!(failures, buffered = buffer.points.len(), "Flush failed: {e}");
                Err(e)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::database::db::TrackerDatabase;

    use super::*;

    /// Fails `write_points` a set number of times before delegating.
    struct FlakyStorage {
        db: TrackerDatabase,
        failures_left: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SessionStorage for FlakyStorage {
        async fn create_session(&self, session: &PersistedSession) -> Result<(), DataManagerError> {
            self.db.create_session(session).await
        }

        async fn write_points(&self, points: &[PersistedPoint]) -> Result<(), DataManagerError> {
            if self.failures_left.load(Ordering::Relaxed) > 0 {
                self.failures_left.fetch_sub(1, Ordering::Relaxed);
                return Err(DataManagerError::Database("disk on fire".into()));
            }
            self.db.write_points(points).await
        }

        async fn update_stats(&self, session_id: &str, total_distance_meters: f64, duration_seconds: i64) -> Result<(), DataManagerError> {
            self.db.update_stats(session_id, total_distance_meters, duration_seconds).await
        }

        async fn mark_finished(&self, session_id: &str) -> Result<(), DataManagerError> {
            self.db.mark_finished(session_id).await
        }

        async fn delete_session(&self, session_id: &str) -> Result<(), DataManagerError> {
            SessionStorage::delete_session(&self.db, session_id).await
        }

        async fn unfinished_session(&self) -> Result<Option<PersistedSession>, DataManagerError> {
            self.db.unfinished_session().await
        }

        async fn session_points(&self, session_id: &str) -> Result<Vec<PersistedPoint>, DataManagerError> {
            self.db.session_points(session_id).await
        }
    }

    async fn settle(store: &BufferedPointStore) {
        let pending = store.inner.buffer.lock().await.pending_flush.take();
        if let Some(handle) = pending {
            handle.await.unwrap();
        }
    }

    fn sample(i: i64) -> LocationSample {
        LocationSample::new(56.15 + i as f64 * 0.0001, 10.2, 1_700_000_000_000 + i * 1000, 3., 5.)
    }

    async fn open(dir: &Path) -> (TrackerDatabase, BufferedPointStore) {
        let db = TrackerDatabase::connect(&dir.join("database.db")).await.unwrap();
        let store = BufferedPointStore::new(Arc::new(db.clone()), dir.join("buffer_files"), 10);
        (db, store)
    }

    #[tokio::test]
    async fn nine_points_survive_an_unclean_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (db, store) = open(dir.path()).await;
            store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();
            for i in 0..9 {
                store.enqueue(&sample(i), 0).await.unwrap();
            }
            // No flush was due
            assert_eq!(db.count_session_points("s1").await.unwrap(), 0);
        }

        let (db, store) = open(dir.path()).await;
        assert!(store.has_unfinished_session().await.unwrap());

        let recovered = store.recover().await.unwrap().unwrap();
        assert_eq!(recovered.session.session_id, "s1");
        assert_eq!(recovered.point_count(), 9);
        assert_eq!(recovered.segments.len(), 1);
        assert_eq!(recovered.next_sequence, 9);
        assert_eq!(db.count_session_points("s1").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn reaching_the_batch_size_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let (db, store) = open(dir.path()).await;
        store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();

        for i in 0..10 {
            store.enqueue(&sample(i), 0).await.unwrap();
        }
        store.force_flush().await.unwrap();

        assert_eq!(db.count_session_points("s1").await.unwrap(), 10);
        assert_eq!(store.buffered_len().await, 0);
        let buffer_file = BufferFile::path_for(store.buffer_file_dir(), "s1");
        assert!(BufferFile::read_points(&buffer_file).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_flush_keeps_points_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let db = TrackerDatabase::connect(&dir.path().join("database.db")).await.unwrap();
        let storage = Arc::new(FlakyStorage { db: db.clone(), failures_left: AtomicU32::new(2) });
        let store = BufferedPointStore::new(storage, dir.path().join("buffer_files"), 10);
        store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();

        for i in 0..10 {
            store.enqueue(&sample(i), 0).await.unwrap();
        }
        // The background flush fails, then this one does
        assert!(store.force_flush().await.is_err());
        assert_eq!(store.consecutive_failures(), 2);
        assert_eq!(store.buffered_len().await, 10);

        store.enqueue(&sample(10), 0).await.unwrap();
        store.force_flush().await.unwrap();
        assert_eq!(store.consecutive_failures(), 0);
        assert_eq!(store.buffered_len().await, 0);

        let points = db.get_session_points("s1").await.unwrap();
        assert_eq!(points.iter().map(|p| p.sequence).collect::<Vec<_>>(), (0..11).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn finished_session_is_purged() {
        let dir = tempfile::tempdir().unwrap();
        let (db, store) = open(dir.path()).await;
        store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();
        for i in 0..3 {
            store.enqueue(&sample(i), 0).await.unwrap();
        }

        store.finish_session().await.unwrap();

        assert!(db.get_session("s1").await.unwrap().is_none());
        assert!(!store.has_unfinished_session().await.unwrap());
        assert!(!BufferFile::path_for(store.buffer_file_dir(), "s1").exists());
        assert!(matches!(store.enqueue(&sample(4), 0).await, Err(DataManagerError::NoActiveSession)));
    }

    #[tokio::test]
    async fn finished_looking_row_is_not_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let (db, store) = open(dir.path()).await;
        store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();
        store.enqueue(&sample(0), 0).await.unwrap();
        store.force_flush().await.unwrap();
        // Crash between marking finished and deleting
        db.set_session_finished("s1").await.unwrap();

        assert!(!store.has_unfinished_session().await.unwrap());
        assert!(store.recover().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_unfinished_session_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let (db, store) = open(dir.path()).await;
        store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();

        assert!(store.recover().await.unwrap().is_none());
        assert!(db.get_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn points_across_segments_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (_db, store) = open(dir.path()).await;
            store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();
            // 25 points over 3 segments, some flushed and some only in the buffer file
            for i in 0..25 {
                store.enqueue(&sample(i), (i / 9) as u32).await.unwrap();
                settle(&store).await;
            }
        }

        let (_db, store) = open(dir.path()).await;
        let recovered = store.recover().await.unwrap().unwrap();

        assert_eq!(recovered.segments.len(), 3);
        assert_eq!(recovered.segments.iter().map(Vec::len).collect::<Vec<_>>(), vec![9, 9, 7]);
        assert_eq!(recovered.point_count(), 25);
        assert_eq!(recovered.last_point.sequence, 24);
    }

    #[tokio::test]
    async fn resumed_session_continues_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (_db, store) = open(dir.path()).await;
            store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();
            for i in 0..4 {
                store.enqueue(&sample(i), 0).await.unwrap();
            }
        }

        let (db, store) = open(dir.path()).await;
        let recovered = store.recover().await.unwrap().unwrap();
        store.resume_session(&recovered).await.unwrap();
        store.enqueue(&sample(4), 1).await.unwrap();
        store.force_flush().await.unwrap();

        let points = db.get_session_points("s1").await.unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points.last().unwrap().sequence, 4);
        assert_eq!(points.last().unwrap().segment_index, 1);
    }

    #[tokio::test]
    async fn wiped_storage_closes_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (db, store) = open(dir.path()).await;
        store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();
        assert!(store.is_session_open("s1").await.unwrap());

        db.delete_all_sessions().await.unwrap();

        assert!(!store.is_session_open("s1").await.unwrap());
        assert!(matches!(store.update_session_stats(1., 1).await, Err(DataManagerError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn abandoned_session_leaves_no_buffer_file() {
        let dir = tempfile::tempdir().unwrap();
        let (db, store) = open(dir.path()).await;
        store.start_session(&PersistedSession::new("s1".into(), Utc::now())).await.unwrap();
        for i in 0..4 {
            store.enqueue(&sample(i), 0).await.unwrap();
        }
        let buffer_file = BufferFile::path_for(store.buffer_file_dir(), "s1");
        assert!(buffer_file.exists());

        db.delete_all_sessions().await.unwrap();
        store.abandon_session().await;

        assert!(!buffer_file.exists());
        assert_eq!(store.current_session_id().await, None);
        assert_eq!(store.buffered_len().await, 0);
        assert!(matches!(store.enqueue(&sample(5), 0).await, Err(DataManagerError::NoActiveSession)));
        assert_eq!(db.count_session_points("s1").await.unwrap(), 0);
    }
}
