use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location_sample::LocationSample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_millis: i64,
    pub segment_index: u32,
    pub sequence: u32,
}

/// The payload handed to the backend collaborator when a session finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedSession {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
    pub distance_meters: f64,
    /// Seconds spent running, pauses excluded.
    pub running_seconds: u64,
    /// Wall-clock seconds from start to finish, pauses included.
    pub total_elapsed_seconds: u64,
    pub vehicle_warning_count: u32,
    pub forced: bool,
    pub points: Vec<SummaryPoint>,
}

impl CompletedSession {
    pub fn flatten_segments(segments: &[Vec<LocationSample>]) -> Vec<SummaryPoint> {
        segments.iter()
            .enumerate()
            .flat_map(|(segment_index, segment)| segment.iter().map(move |sample| (segment_index as u32, sample)))
            .enumerate()
            .map(|(sequence, (segment_index, sample))| SummaryPoint {
                latitude: sample.latitude,
                longitude: sample.longitude,
                timestamp_millis: sample.timestamp_millis,
                segment_index,
                sequence: sequence as u32,
            })
            .collect()
    }
}
