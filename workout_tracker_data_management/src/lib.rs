pub mod buffer;
pub mod database;
mod data_manager;
pub mod recovery;
pub mod storage;

pub use data_manager::*;

pub const DATA_DIR: &str = "data/";
pub const DATABASE_FILE: &str = "database.db";
pub const BUFFER_FILE_DIR: &str = "buffer_files";

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum DataManagerError {
    #[error("database: {0}")]
    Database(String),

    #[error("buffer file: {0}")]
    BufferFile(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("no session is open in the point store")]
    NoActiveSession,
}
