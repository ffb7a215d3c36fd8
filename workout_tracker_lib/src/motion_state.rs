use serde::{Deserialize, Serialize};

/// Debounced motion classification. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionState {
    Stopped,
    Moving,
    Vehicle,
}

impl MotionState {
    pub fn label(&self) -> &'static str {
        match self {
            MotionState::Stopped => "stopped",
            MotionState::Moving => "moving",
            MotionState::Vehicle => "vehicle",
        }
    }
}
