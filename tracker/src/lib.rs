pub mod config;
pub mod error;
pub mod event_loop;
pub mod location_source;
pub mod motion_classifier;
pub mod orchestrator;
pub mod producers;
pub mod session_state;

pub use error::TrackerError;
