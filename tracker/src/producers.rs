//! The two event producers feeding the session loop.
//!
//! Both can be started and stopped any number of times. Stopping aborts the task and bumps the
//! generation; events carry the generation they were produced under, so the loop can drop ones
//! that were already queued when the producer stopped.

use std::{sync::Arc, time::Duration};

use tokio::{sync::{mpsc, Mutex}, task::JoinHandle, time::{interval_at, Instant}};

use crate::{event_loop::TrackerEvent, location_source::LocationSource};

pub struct Ticker {
    period: Duration,
    tx: mpsc::Sender<TrackerEvent>,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn new(period: Duration, tx: mpsc::Sender<TrackerEvent>) -> Self {
        Self {
            period,
            tx,
            generation: 0,
            task: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let generation = self.generation;
        let period = self.period;
        let tx = self.tx.clone();
        self.task = Some(tokio::spawn(async move {
            // First tick one period from now, not immediately
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if tx.send(TrackerEvent::Tick { generation }).await.is_err() {
                    break;
                }
            }
        }));
        tracing::trace!(generation, "Ticker started");
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.generation += 1;
            tracing::trace!(generation = self.generation, "Ticker stopped");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct LocationFeed {
    source: Arc<Mutex<Box<dyn LocationSource>>>,
    tx: mpsc::Sender<TrackerEvent>,
    generation: u64,
    task: Option<JoinHandle<()>>,
    exhausted: bool,
}

impl LocationFeed {
    pub fn new(source: Box<dyn LocationSource>, tx: mpsc::Sender<TrackerEvent>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            tx,
            generation: 0,
            task: None,
            exhausted: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Called by the loop once the source has reported its end. The feed never starts again.
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
        self.stop();
    }

    pub fn start(&mut self) {
        if self.task.is_some() || self.exhausted {
            return;
        }

        // Fixes taken while stopped belong to no segment
        match self.source.try_lock() {
            Ok(mut source) => {
                let dropped = source.discard_pending();
                if dropped > 0 {
                    tracing::debug!(dropped, "Dropped fixes queued while the feed was stopped");
                }
            },
            Err(_) => tracing::warn!("Location source busy, queued fixes kept"),
        }

        let generation = self.generation;
        let source = self.source.clone();
        let tx = self.tx.clone();
        self.task = Some(tokio::spawn(async move {
            loop {
                let next = source.lock().await.next_sample().await;
                let event = match next {
                    Some(sample) => TrackerEvent::Location { generation, sample },
                    None => TrackerEvent::LocationsEnded { generation },
                };
                let ended = matches!(event, TrackerEvent::LocationsEnded { .. });
                if tx.send(event).await.is_err() || ended {
                    break;
                }
            }
        }));
        tracing::trace!(generation, "Location feed started");
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.generation += 1;
            tracing::trace!(generation = self.generation, "Location feed stopped");
        }
    }
}

impl Drop for LocationFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use workout_tracker_lib::location_sample::LocationSample;

    use crate::location_source::ChannelSource;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticker_start_and_stop_are_idempotent() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut ticker = Ticker::new(Duration::from_secs(1), tx);

        ticker.start();
        ticker.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(matches!(rx.try_recv(), Ok(TrackerEvent::Tick { generation: 0 })));
        assert!(matches!(rx.try_recv(), Ok(TrackerEvent::Tick { generation: 0 })));
        assert!(rx.try_recv().is_err());

        ticker.stop();
        ticker.stop();
        assert_eq!(ticker.generation(), 1);
        assert!(!ticker.is_running());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        ticker.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(matches!(rx.try_recv(), Ok(TrackerEvent::Tick { generation: 1 })));
    }

    #[tokio::test]
    async fn feed_forwards_samples_and_reports_the_end() {
        let (sample_tx, source) = ChannelSource::channel(4);
        let (tx, mut rx) = mpsc::channel(16);
        let mut feed = LocationFeed::new(Box::new(source), tx);
        feed.start();

        let sample = LocationSample::new(56., 10., 1000, 2., 4.);
        sample_tx.send(sample).await.unwrap();
        drop(sample_tx);

        assert!(matches!(rx.recv().await, Some(TrackerEvent::Location { generation: 0, sample: s }) if s == sample));
        assert!(matches!(rx.recv().await, Some(TrackerEvent::LocationsEnded { generation: 0 })));

        feed.mark_exhausted();
        feed.start();
        assert!(!feed.is_running());
    }

    #[tokio::test]
    async fn restarted_feed_uses_a_new_generation() {
        let (sample_tx, source) = ChannelSource::channel(4);
        let (tx, mut rx) = mpsc::channel(16);
        let mut feed = LocationFeed::new(Box::new(source), tx);

        feed.start();
        feed.stop();
        feed.start();
        sample_tx.send(LocationSample::new(56., 10., 0, 2., 4.)).await.unwrap();

        assert!(matches!(rx.recv().await, Some(TrackerEvent::Location { generation: 1, .. })));
    }

    #[tokio::test]
    async fn fixes_sent_while_stopped_are_dropped_on_start() {
        let (sample_tx, source) = ChannelSource::channel(8);
        let (tx, mut rx) = mpsc::channel(16);
        let mut feed = LocationFeed::new(Box::new(source), tx);

        feed.start();
        feed.stop();
        for i in 0..4 {
            sample_tx.send(LocationSample::new(56., 10., i, 2., 4.)).await.unwrap();
        }
        feed.start();
        sample_tx.send(LocationSample::new(56., 10., 100, 2., 4.)).await.unwrap();

        let first = rx.recv().await;
        assert!(matches!(first, Some(TrackerEvent::Location { generation: 1, sample }) if sample.timestamp_millis == 100));
        assert!(rx.try_recv().is_err());
    }
}
