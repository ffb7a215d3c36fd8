pub mod geo;
pub mod location_sample;
pub mod motion_state;
pub mod pause_reason;
pub mod summary;
pub mod track_point;
pub mod track_session;
