//! Debounced speed classification into stopped, moving and vehicle.
//!
//! Each sample falls into one zone. A zone has to be held continuously for its confirmation
//! duration before the confirmed state switches to it. Speeds between the stop and move
//! thresholds form a dead zone that resets every candidate timer and never confirms anything.

use serde::Deserialize;
use workout_tracker_lib::{location_sample::LocationSample, motion_state::MotionState};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Below this speed (m/s) a sample counts as stopped.
    pub stop_threshold: f32,
    /// Above this speed (m/s) a sample counts as moving.
    pub move_threshold: f32,
    /// At or above this speed (m/s) a sample counts as riding in a vehicle. ~30 km/h.
    pub vehicle_threshold: f32,
    /// Fast fixes with this accuracy (m) or worse never count as vehicle.
    pub max_vehicle_accuracy: f32,
    pub stop_duration_ms: i64,
    pub move_duration_ms: i64,
    pub vehicle_duration_ms: i64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            stop_threshold: 1.2,
            move_threshold: 1.8,
            vehicle_threshold: 8.33,
            max_vehicle_accuracy: 20.0,
            stop_duration_ms: 3000,
            move_duration_ms: 2000,
            vehicle_duration_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    Stopped,
    Moving,
    Vehicle,
    DeadZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub state: MotionState,
    /// True only on the sample that confirmed a transition.
    pub changed: bool,
    /// How long the confirmed state has held. Informational only.
    pub held_for_ms: i64,
}

#[derive(Debug, Clone)]
pub struct MotionClassifier {
    config: ClassifierConfig,
    state: MotionState,
    started: bool,
    confirmed_at: Option<i64>,
    stopped_since: Option<i64>,
    moving_since: Option<i64>,
    vehicle_since: Option<i64>,
}

impl MotionClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            state: MotionState::Stopped,
            started: false,
            confirmed_at: None,
            stopped_since: None,
            moving_since: None,
            vehicle_since: None,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Resets all timers and takes `initial` as the confirmed state.
    pub fn start(&mut self, initial: MotionState) {
        self.state = initial;
        self.started = true;
        self.confirmed_at = None;
        self.clear_candidates();
    }

    pub fn analyze(&mut self, sample: &LocationSample) -> Classification {
        debug_assert!(self.started, "MotionClassifier::analyze called before start");
        if !self.started {
            return Classification { state: self.state, changed: false, held_for_ms: 0 };
        }

        let now = sample.timestamp_millis;
        let confirmed_at = *self.confirmed_at.get_or_insert(now);

        let (target, since, required) = match self.zone(sample) {
            Zone::DeadZone => {
                self.clear_candidates();
                return self.unchanged(now, confirmed_at);
            },
            Zone::Stopped => {
                self.moving_since = None;
                self.vehicle_since = None;
                (MotionState::Stopped, *self.stopped_since.get_or_insert(now), self.config.stop_duration_ms)
            },
            Zone::Moving => {
                self.stopped_since = None;
                self.vehicle_since = None;
                (MotionState::Moving, *self.moving_since.get_or_insert(now), self.config.move_duration_ms)
            },
            Zone::Vehicle => {
                self.stopped_since = None;
                self.moving_since = None;
                (MotionState::Vehicle, *self.vehicle_since.get_or_insert(now), self.config.vehicle_duration_ms)
            },
        };

        if target != self.state && now - since >= required {
            tracing::debug!(from = self.state.label(), to = target.label(), held_ms = now - since, "Motion transition confirmed");
            self.state = target;
            self.confirmed_at = Some(now);
            self.clear_candidates();
            return Classification { state: target, changed: true, held_for_ms: 0 };
        }

        self.unchanged(now, confirmed_at)
    }

    fn zone(&self, sample: &LocationSample) -> Zone {
        let speed = sample.speed_mps;
        if speed >= self.config.vehicle_threshold && sample.accuracy_m < self.config.max_vehicle_accuracy {
            Zone::Vehicle
        } else if speed < self.config.stop_threshold {
            Zone::Stopped
        } else if speed > self.config.move_threshold {
            Zone::Moving
        } else {
            Zone::DeadZone
        }
    }

    fn unchanged(&self, now: i64, confirmed_at: i64) -> Classification {
        Classification { state: self.state, changed: false, held_for_ms: now - confirmed_at }
    }

    fn clear_candidates(&mut self) {
        self.stopped_since = None;
        self.moving_since = None;
        self.vehicle_since = None;
    }
}
