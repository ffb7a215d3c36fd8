use serde::{Deserialize, Serialize};

use crate::location_sample::LocationSample;

/// A path point as it is stored durably.
///
/// `sequence` is assigned per session in enqueue order and breaks ties between points sharing a
/// timestamp when a segment is rebuilt.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPoint {
    pub session_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_millis: i64,
    pub segment_index: u32,
    pub sequence: i64,
}

impl PersistedPoint {
    pub fn new(session_id: String, sample: &LocationSample, segment_index: u32, sequence: i64) -> Self {
        Self {
            session_id,
            latitude: sample.latitude,
            longitude: sample.longitude,
            timestamp_millis: sample.timestamp_millis,
            segment_index,
            sequence,
        }
    }

    /// Speed and accuracy are not stored, so they come back as zero.
    pub fn to_sample(&self) -> LocationSample {
        LocationSample::new(self.latitude, self.longitude, self.timestamp_millis, 0., 0.)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, &'static str> {
        bincode::serialize(self).map_err(|_| "Failed to serialize PersistedPoint")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_survive_the_buffer_file_encoding() {
        let sample = LocationSample::new(56.158405, 10.206034, 1_700_000_000_000, 3.1, 4.0);
        let point = PersistedPoint::new("abc".into(), &sample, 2, 17);

        let bytes = point.to_bytes().unwrap();
        let decoded: PersistedPoint = bincode::deserialize(&bytes).unwrap();

        assert_eq!(decoded, point);
        assert_eq!(decoded.to_sample().position(), sample.position());
    }
}
