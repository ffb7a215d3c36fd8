use chrono::{DateTime, Utc};
use workout_tracker_data_management::recovery::RecoveredSession;
use workout_tracker_lib::{location_sample::LocationSample, pause_reason::PauseReason};

/// Read-only copy of the session state handed to observers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub pause_reason: PauseReason,
    pub elapsed_seconds: u64,
    pub total_distance_meters: f64,
    pub path_segments: Vec<Vec<LocationSample>>,
    pub vehicle_warning_count: u32,
    pub last_location: Option<LocationSample>,
}

/// The single source of truth for the active session.
///
/// There are no field setters. `is_running` and `pause_reason` only ever change together, so no
/// observer can see a session that is running and paused at the same time.
#[derive(Debug, Default)]
pub struct SessionState {
    session_id: Option<String>,
    start_time: Option<DateTime<Utc>>,
    is_running: bool,
    pause_reason: PauseReason,
    elapsed_seconds: u64,
    total_distance_meters: f64,
    path_segments: Vec<Vec<LocationSample>>,
    vehicle_warning_count: u32,
    last_location: Option<LocationSample>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears everything and starts a running session. The caller opens the first segment.
    pub fn begin(&mut self, session_id: String, start_time: DateTime<Utc>) {
        self.reset();
        self.session_id = Some(session_id);
        self.start_time = Some(start_time);
        self.is_running = true;
        self.pause_reason = PauseReason::None;
    }

    pub fn pause(&mut self, reason: PauseReason) {
        debug_assert!(reason != PauseReason::None, "pausing needs a reason");
        self.is_running = false;
        self.pause_reason = reason;
    }

    /// The caller must follow up with [`Self::add_empty_segment`]; points are never joined across
    /// a pause.
    pub fn resume(&mut self) {
        self.is_running = true;
        self.pause_reason = PauseReason::None;
    }

    pub fn update_location(&mut self, sample: LocationSample, distance_delta: f64) {
        debug_assert!(distance_delta >= 0., "negative distance delta {distance_delta}");
        self.last_location = Some(sample);
        self.total_distance_meters += distance_delta.max(0.);
    }

    pub fn add_path_point(&mut self, sample: LocationSample) {
        if self.path_segments.is_empty() {
            self.path_segments.push(Vec::new());
        }
        if let Some(segment) = self.path_segments.last_mut() {
            segment.push(sample);
        }
    }

    pub fn add_empty_segment(&mut self) {
        self.path_segments.push(Vec::new());
    }

    pub fn increment_vehicle_warning_count(&mut self) -> u32 {
        self.vehicle_warning_count += 1;
        self.vehicle_warning_count
    }

    /// One second of running time. Ignored while paused.
    pub fn tick(&mut self) {
        if self.is_running {
            self.elapsed_seconds += 1;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Rebuilds an interrupted session. It always comes back paused; continuing it is up to the user.
    pub fn restore(&mut self, recovered: &RecoveredSession) {
        self.reset();
        self.session_id = Some(recovered.session.session_id.clone());
        self.start_time = Some(recovered.session.start_time);
        self.is_running = false;
        self.pause_reason = PauseReason::UserPause;
        self.elapsed_seconds = recovered.session.duration_seconds.max(0) as u64;
        self.total_distance_meters = recovered.session.total_distance_meters;
        self.path_segments = recovered.segments.iter()
            .map(|segment| segment.iter().map(|point| point.to_sample()).collect())
            .collect();
        self.last_location = Some(recovered.last_point.to_sample());
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn pause_reason(&self) -> PauseReason {
        self.pause_reason
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn total_distance_meters(&self) -> f64 {
        self.total_distance_meters
    }

    pub fn path_segments(&self) -> &[Vec<LocationSample>] {
        &self.path_segments
    }

    pub fn vehicle_warning_count(&self) -> u32 {
        self.vehicle_warning_count
    }

    pub fn last_location(&self) -> Option<&LocationSample> {
        self.last_location.as_ref()
    }

    /// Index of the segment new points go into.
    pub fn current_segment_index(&self) -> u32 {
        self.path_segments.len().saturating_sub(1) as u32
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            start_time: self.start_time,
            is_running: self.is_running,
            pause_reason: self.pause_reason,
            elapsed_seconds: self.elapsed_seconds,
            total_distance_meters: self.total_distance_meters,
            path_segments: self.path_segments.clone(),
            vehicle_warning_count: self.vehicle_warning_count,
            last_location: self.last_location,
        }
    }
}

#[cfg(test)]
mod tests {
    use workout_tracker_data_management::recovery;
    use workout_tracker_lib::{track_point::PersistedPoint, track_session::PersistedSession};

    use super::*;

    fn sample(t: i64) -> LocationSample {
        LocationSample::new(56.0, 10.0 + t as f64 * 1e-5, t, 2.5, 5.)
    }

    fn running() -> SessionState {
        let mut state = SessionState::new();
        state.begin("s1".into(), Utc::now());
        state.add_empty_segment();
        state
    }

    #[test]
    fn pause_and_resume_move_both_fields_together() {
        let mut state = running();
        assert!(state.is_running());
        assert_eq!(state.pause_reason(), PauseReason::None);

        state.pause(PauseReason::AutoPauseRest);
        assert!(!state.is_running());
        assert_eq!(state.pause_reason(), PauseReason::AutoPauseRest);

        state.resume();
        assert!(state.is_running());
        assert_eq!(state.pause_reason(), PauseReason::None);
    }

    #[test]
    fn resume_starts_a_separate_segment() {
        let mut state = running();
        state.add_path_point(sample(1));
        state.add_path_point(sample(2));

        state.pause(PauseReason::UserPause);
        state.resume();
        state.add_empty_segment();
        state.add_path_point(sample(3));

        assert_eq!(state.path_segments().len(), 2);
        assert_eq!(state.path_segments()[0].len(), 2);
        assert_eq!(state.path_segments()[1], vec![sample(3)]);
        assert_eq!(state.current_segment_index(), 1);
    }

    #[test]
    fn path_point_without_segment_opens_one() {
        let mut state = SessionState::new();
        state.add_path_point(sample(1));
        assert_eq!(state.path_segments().len(), 1);
    }

    #[test]
    fn distance_only_grows() {
        let mut state = running();
        let mut previous = 0.;
        for (i, delta) in [3.0, 0.0, 12.5, 2.0].into_iter().enumerate() {
            state.update_location(sample(i as i64), delta);
            state.increment_vehicle_warning_count();
            state.tick();
            assert!(state.total_distance_meters() >= previous);
            previous = state.total_distance_meters();
        }
        assert_eq!(state.total_distance_meters(), 17.5);
    }

    #[test]
    fn ticks_only_count_while_running() {
        let mut state = running();
        state.tick();
        state.pause(PauseReason::UserPause);
        state.tick();
        state.tick();
        state.resume();
        state.tick();
        assert_eq!(state.elapsed_seconds(), 2);
    }

    #[test]
    fn restored_session_is_paused() {
        let points = (0..4)
            .map(|i| PersistedPoint::new("s1".into(), &sample(i), (i / 2) as u32, i))
            .collect();
        let mut session = PersistedSession::new("s1".into(), Utc::now());
        session.total_distance_meters = 42.;
        session.duration_seconds = 60;
        let recovered = recovery::rebuild(session, points).unwrap();

        let mut state = SessionState::new();
        state.restore(&recovered);

        assert!(!state.is_running());
        assert_eq!(state.pause_reason(), PauseReason::UserPause);
        assert_eq!(state.elapsed_seconds(), 60);
        assert_eq!(state.total_distance_meters(), 42.);
        assert_eq!(state.path_segments().len(), 2);
        assert_eq!(state.last_location().unwrap().timestamp_millis, 3);
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = running();
        state.add_path_point(sample(1));
        state.increment_vehicle_warning_count();
        state.reset();
        assert_eq!(state.snapshot(), SessionSnapshot::default());
    }
}
