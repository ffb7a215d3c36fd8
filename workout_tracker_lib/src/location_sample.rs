use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::haversine_distance;

/// A single fix from the location source.
///
/// Speed and accuracy default to zero when the source does not provide them, which degrades
/// motion classification but is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_millis: i64,
    #[serde(default)]
    pub speed_mps: f32,
    #[serde(default)]
    pub accuracy_m: f32,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, timestamp_millis: i64, speed_mps: f32, accuracy_m: f32) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_millis,
            speed_mps,
            accuracy_m,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_millis)
    }

    pub fn distance_to(&self, other: &LocationSample) -> f64 {
        haversine_distance(self.position(), other.position())
    }
}
