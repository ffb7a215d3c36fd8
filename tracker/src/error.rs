use workout_tracker_data_management::DataManagerError;

use crate::orchestrator::SessionPhase;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("cannot {event} while {from:?}")]
    InvalidTransition { from: SessionPhase, event: &'static str },

    #[error("config: {0}")]
    Config(String),

    #[error("replay: {0}")]
    Replay(String),

    #[error("session loop has shut down")]
    LoopClosed,

    #[error(transparent)]
    Data(#[from] DataManagerError),
}
