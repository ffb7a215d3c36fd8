use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PauseReason {
    #[default]
    None,
    UserPause,
    AutoPauseRest,
    AutoPauseVehicle,
}
