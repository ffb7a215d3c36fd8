use std::{collections::VecDeque, path::Path, time::Duration};

use tokio::sync::mpsc;
use workout_tracker_lib::location_sample::LocationSample;

use crate::TrackerError;

/// Where location fixes come from. Returning `None` means the source is exhausted for good.
#[async_trait::async_trait]
pub trait LocationSource: Send {
    async fn next_sample(&mut self) -> Option<LocationSample>;

    /// Drops fixes that piled up while nobody was reading. Returns how many were dropped.
    fn discard_pending(&mut self) -> usize {
        0
    }
}

/// Fixes pushed in by someone else, e.g. a platform location callback.
pub struct ChannelSource {
    rx: mpsc::Receiver<LocationSample>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<LocationSample>) -> Self {
        Self { rx }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<LocationSample>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait::async_trait]
impl LocationSource for ChannelSource {
    async fn next_sample(&mut self) -> Option<LocationSample> {
        self.rx.recv().await
    }

    fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/**
 * Replays a recorded track from a JSON-lines file, one `LocationSample` per line.
 *
 * With a speedup the gaps between sample timestamps are slept, divided by the speedup. Without one
 * the samples come as fast as they are consumed.
 */
pub struct ReplaySource {
    samples: VecDeque<LocationSample>,
    speedup: Option<f64>,
    previous_timestamp: Option<i64>,
}

impl ReplaySource {
    pub async fn from_file(path: &Path, speedup: Option<f64>) -> Result<Self, TrackerError> {
        let text = tokio::fs::read_to_string(path).await
            .map_err(|e| TrackerError::Replay(format!("Failed to read {:?}: {e}", path)))?;
        Self::parse(&text, speedup)
    }

    pub fn parse(text: &str, speedup: Option<f64>) -> Result<Self, TrackerError> {
        let mut samples = VecDeque::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let sample = serde_json::from_str(line)
                .map_err(|e| TrackerError::Replay(format!("Line {}: {e}", i + 1)))?;
            samples.push_back(sample);
        }

        if let Some(speedup) = speedup {
            if !(speedup > 0.) {
                return Err(TrackerError::Replay(format!("Speedup must be positive, got {speedup}")));
            }
        }

        tracing::debug!(samples = samples.len(), ?speedup, "Replay loaded");
        Ok(Self {
            samples,
            speedup,
            previous_timestamp: None,
        })
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

#[async_trait::async_trait]
impl LocationSource for ReplaySource {
    async fn next_sample(&mut self) -> Option<LocationSample> {
        let next_timestamp = self.samples.front()?.timestamp_millis;

        // Sleep before popping, so a feed aborted mid-wait does not lose the sample.
        if let (Some(speedup), Some(previous)) = (self.speedup, self.previous_timestamp) {
            let gap_ms = (next_timestamp - previous).max(0) as f64 / speedup;
            tokio::time::sleep(Duration::from_secs_f64(gap_ms / 1000.)).await;
        }

        self.previous_timestamp = Some(next_timestamp);
        self.samples.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    const TRACK: &str = r#"
{"latitude":56.0,"longitude":10.0,"timestamp_millis":0,"speed_mps":2.5,"accuracy_m":4.0}
{"latitude":56.0,"longitude":10.00005,"timestamp_millis":1000,"speed_mps":2.5,"accuracy_m":4.0}

{"latitude":56.0,"longitude":10.0001,"timestamp_millis":3000}
"#;

    #[tokio::test]
    async fn replay_yields_every_line_then_ends() {
        let mut source = ReplaySource::parse(TRACK, None).unwrap();
        assert_eq!(source.remaining(), 3);

        let mut timestamps = Vec::new();
        while let Some(sample) = source.next_sample().await {
            timestamps.push(sample.timestamp_millis);
        }

        assert_eq!(timestamps, vec![0, 1000, 3000]);
        assert!(source.next_sample().await.is_none());
    }

    #[tokio::test]
    async fn missing_fields_default_to_zero() {
        let mut source = ReplaySource::parse(TRACK, None).unwrap();
        for _ in 0..2 {
            source.next_sample().await;
        }
        let last = source.next_sample().await.unwrap();
        assert_eq!(last.speed_mps, 0.);
        assert_eq!(last.accuracy_m, 0.);
    }

    #[tokio::test(start_paused = true)]
    async fn speedup_paces_by_timestamp_gaps() {
        let mut source = ReplaySource::parse(TRACK, Some(2.)).unwrap();
        let begin = Instant::now();

        source.next_sample().await;
        assert_eq!(begin.elapsed(), Duration::ZERO);
        source.next_sample().await;
        assert_eq!(begin.elapsed(), Duration::from_millis(500));
        source.next_sample().await;
        assert_eq!(begin.elapsed(), Duration::from_millis(1500));
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = ReplaySource::parse("{\"latitude\":1}\nnope", None).err().unwrap();
        assert!(err.to_string().contains("Line 1"), "{err}");

        let err = ReplaySource::parse(TRACK, Some(0.)).err().unwrap();
        assert!(matches!(err, TrackerError::Replay(_)));
    }

    #[tokio::test]
    async fn channel_source_ends_when_senders_are_gone() {
        let (tx, mut source) = ChannelSource::channel(4);
        tx.send(LocationSample::new(56., 10., 0, 0., 0.)).await.unwrap();
        drop(tx);

        assert!(source.next_sample().await.is_some());
        assert!(source.next_sample().await.is_none());
    }

    #[tokio::test]
    async fn channel_source_discards_what_is_queued() {
        let (tx, mut source) = ChannelSource::channel(8);
        for i in 0..3 {
            tx.send(LocationSample::new(56., 10., i, 0., 0.)).await.unwrap();
        }

        assert_eq!(source.discard_pending(), 3);
        assert_eq!(source.discard_pending(), 0);

        tx.send(LocationSample::new(56., 10., 9, 0., 0.)).await.unwrap();
        assert_eq!(source.next_sample().await.unwrap().timestamp_millis, 9);
    }

    #[tokio::test]
    async fn replay_keeps_its_samples_on_discard() {
        let mut source = ReplaySource::parse(TRACK, None).unwrap();
        assert_eq!(source.discard_pending(), 0);
        assert_eq!(source.remaining(), 3);
    }
}
