use std::path::{Path, PathBuf};

use tokio::{fs::{File, OpenOptions}, io::AsyncWriteExt};
use workout_tracker_lib::track_point::PersistedPoint;

use crate::DataManagerError;

/// Append-only file of bincode encoded points that have been enqueued but may not have reached
/// the database yet. A torn record at the end is dropped when the file is read back.
pub struct BufferFile {
    path: PathBuf,
    file: File,
}

impl BufferFile {
    pub fn path_for(buffer_file_dir: &Path, session_id: &str) -> PathBuf {
        buffer_file_dir.join(format!("{session_id}.buf"))
    }

    /// Opens the buffer file of a session for appending, creating it if needed.
    pub async fn open(buffer_file_dir: &Path, session_id: &str) -> Result<Self, DataManagerError> {
        if !buffer_file_dir.exists() {
            tokio::fs::create_dir_all(buffer_file_dir).await
                .map_err(|_| DataManagerError::BufferFile(format!("Failed to create buffer file directory: {:?}", buffer_file_dir)))?;
        }

        let path = Self::path_for(buffer_file_dir, session_id);
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path).await
            .map_err(|_| DataManagerError::BufferFile(format!("Failed to open buffer file: {:?}", path)))?;

        Ok(Self {
            path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&mut self, point: &PersistedPoint) -> Result<(), DataManagerError> {
        let bytes = point.to_bytes()
            .map_err(|e| DataManagerError::BufferFile(e.to_string()))?;

        self.file.write_all(&bytes).await
            .map_err(|_| DataManagerError::BufferFile(format!("Failed to append to buffer file: {:?}", self.path)))?;
        self.file.flush().await
            .map_err(|_| DataManagerError::BufferFile(format!("Failed to flush buffer file: {:?}", self.path)))
    }

    /// Replaces the contents with exactly `points`.
    pub async fn rewrite(&mut self, points: &[PersistedPoint]) -> Result<(), DataManagerError> {
        self.file.set_len(0).await
            .map_err(|_| DataManagerError::BufferFile(format!("Failed to truncate buffer file: {:?}", self.path)))?;

        let mut bytes = Vec::new();
        for point in points {
            bytes.extend(point.to_bytes().map_err(|e| DataManagerError::BufferFile(e.to_string()))?);
        }

        self.file.write_all(&bytes).await
            .map_err(|_| DataManagerError::BufferFile(format!("Failed to rewrite buffer file: {:?}", self.path)))?;
        self.file.flush().await
            .map_err(|_| DataManagerError::BufferFile(format!("Failed to flush buffer file: {:?}", self.path)))
    }

    /// Reads every complete point from the buffer file at `path`. A missing file has no points.
    pub async fn read_points(path: &Path) -> Result<Vec<PersistedPoint>, DataManagerError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(_) => return Err(DataManagerError::BufferFile(format!("Failed to read buffer file: {:?}", path))),
        };

        let mut points = Vec::new();
        let mut cursor = std::io::Cursor::new(bytes);
        while let Ok(point) = bincode::deserialize_from::<_, PersistedPoint>(&mut cursor) {
            points.push(point);
        }

        Ok(points)
    }

    pub async fn remove(path: &Path) -> Result<(), DataManagerError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(_) => Err(DataManagerError::BufferFile(format!("Failed to remove buffer file: {:?}", path))),
        }
    }
}
