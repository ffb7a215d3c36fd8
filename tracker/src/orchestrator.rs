use chrono::Utc;
use tokio::task::JoinHandle;
use workout_tracker_data_management::buffer::point_store::{BufferedPointStore, FAILURE_WARNING_THRESHOLD};
use workout_tracker_lib::{location_sample::LocationSample, motion_state::MotionState, pause_reason::PauseReason, summary::CompletedSession, track_session::PersistedSession};

use crate::{config::{SessionConfig, TrackerConfig}, motion_classifier::MotionClassifier, session_state::{SessionSnapshot, SessionState}, TrackerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Running,
    Paused(PauseReason),
    /// `forced` sessions were stopped by vehicle detection and still await `finish`.
    Terminated { forced: bool },
}

/// Things the user should hear about, emitted as the policy reacts to samples and ticks.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started { session_id: String },
    Recovered { session_id: String },
    AutoPaused(PauseReason),
    AutoResumed,
    VehicleWarning { count: u32 },
    ForcedFinish { count: u32 },
    DurabilityWarning { consecutive_failures: u32 },
    SessionLost { session_id: String },
}

/// How a background stats write ended.
enum StatsWrite {
    Written,
    Lost { session_id: String },
    Failed,
}

pub struct SessionOrchestrator {
    settings: SessionConfig,
    classifier: MotionClassifier,
    state: SessionState,
    store: BufferedPointStore,
    phase: SessionPhase,
    last_accepted: Option<LocationSample>,
    // Set once storage no longer knows our session; from then on nothing is written.
    stale: bool,
    durability_warned: bool,
    running_secs_since_persist: u64,
    stats_write: Option<JoinHandle<StatsWrite>>,
    events: Vec<SessionEvent>,
}

impl SessionOrchestrator {
    pub fn new(config: &TrackerConfig, store: BufferedPointStore) -> Self {
        Self {
            settings: config.session.clone(),
            classifier: MotionClassifier::new(config.classifier),
            state: SessionState::new(),
            store,
            phase: SessionPhase::Idle,
            last_accepted: None,
            stale: false,
            durability_warned: false,
            running_secs_since_persist: 0,
            stats_write: None,
            events: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// The 1 Hz timer only runs while the session runs.
    pub fn wants_ticks(&self) -> bool {
        self.phase == SessionPhase::Running
    }

    /// Locations are also needed while auto-paused for rest, to notice the user moving again.
    pub fn wants_locations(&self) -> bool {
        matches!(self.phase, SessionPhase::Running | SessionPhase::Paused(PauseReason::AutoPauseRest))
    }

    pub fn set_auto_pause(&mut self, enabled: bool) {
        self.settings.auto_pause_enabled = enabled;
    }

    /// Looks for an interrupted session and, if one is found, restores it paused.
    pub async fn recover_on_startup(&mut self) -> Result<Option<SessionSnapshot>, TrackerError> {
        if self.phase != SessionPhase::Idle {
            return Err(TrackerError::InvalidTransition { from: self.phase, event: "recover" });
        }

        let Some(recovered) = self.store.recover().await? else {
            return Ok(None);
        };
        self.store.resume_session(&recovered).await?;

        self.state.restore(&recovered);
        self.phase = SessionPhase::Paused(PauseReason::UserPause);
        self.last_accepted = None;
        self.stale = false;
        self.events.push(SessionEvent::Recovered { session_id: recovered.session.session_id.clone() });

        Ok(Some(self.state.snapshot()))
    }

    pub async fn start(&mut self) -> Result<String, TrackerError> {
        if !matches!(self.phase, SessionPhase::Idle | SessionPhase::Terminated { forced: false }) {
            return Err(TrackerError::InvalidTransition { from: self.phase, event: "start" });
        }

        let random_bytes: [u8; 16] = rand::random();
        let session_id = hex::encode(random_bytes);
        let start_time = Utc::now();

        self.store.start_session(&PersistedSession::new(session_id.clone(), start_time)).await?;

        self.state.begin(session_id.clone(), start_time);
        self.state.add_empty_segment();
        self.classifier.start(MotionState::Moving);
        self.phase = SessionPhase::Running;
        self.last_accepted = None;
        self.stale = false;
        self.durability_warned = false;
        self.running_secs_since_persist = 0;

        tracing::info!(session_id = %session_id, "Session started");
        self.events.push(SessionEvent::Started { session_id: session_id.clone() });
        Ok(session_id)
    }

    pub async fn pause(&mut self) -> Result<(), TrackerError> {
        match self.phase {
            SessionPhase::Running | SessionPhase::Paused(PauseReason::AutoPauseRest) => {
                self.pause_with(PauseReason::UserPause).await;
                Ok(())
            },
            from => Err(TrackerError::InvalidTransition { from, event: "pause" }),
        }
    }

    pub async fn resume(&mut self) -> Result<(), TrackerError> {
        let SessionPhase::Paused(reason) = self.phase else {
            return Err(TrackerError::InvalidTransition { from: self.phase, event: "resume" });
        };

        tracing::info!(?reason, "Session resumed");
        self.resume_tracking(true);
        Ok(())
    }

    /// Flushes and purges the durable copy, then hands back the payload for the backend.
    pub async fn finish(&mut self) -> Result<CompletedSession, TrackerError> {
        let forced = match self.phase {
            SessionPhase::Running | SessionPhase::Paused(_) => false,
            SessionPhase::Terminated { forced: true } => true,
            from => return Err(TrackerError::InvalidTransition { from, event: "finish" }),
        };

        self.phase = SessionPhase::Terminated { forced };
        let completed = self.completed_session(forced);

        self.await_stats_write().await;
        if self.stale {
            self.store.abandon_session().await;
        } else if let Err(e) = self.store.finish_session().await {
            // On failure the session stays unfinished and is offered for recovery
            tracing::warn!(session_id = %completed.session_id, "Could not purge finished session: {e}");
        }

        tracing::info!(session_id = %completed.session_id, distance = completed.distance_meters, running_seconds = completed.running_seconds, forced, "Session finished");
        self.state.reset();
        self.phase = SessionPhase::Terminated { forced: false };
        Ok(completed)
    }

    pub async fn discard(&mut self) -> Result<(), TrackerError> {
        if self.phase == SessionPhase::Idle {
            return Err(TrackerError::InvalidTransition { from: self.phase, event: "discard" });
        }

        self.await_stats_write().await;
        if self.stale {
            self.store.abandon_session().await;
        } else if let Err(e) = self.store.discard_session().await {
            tracing::warn!("Could not discard session: {e}");
        }

        tracing::info!(session_id = ?self.state.session_id(), "Session discarded");
        self.state.reset();
        self.phase = SessionPhase::Idle;
        Ok(())
    }

    pub async fn handle_location(&mut self, sample: LocationSample) {
        self.collect_stats_write().await;
        if !self.wants_locations() {
            return;
        }

        let classification = self.classifier.analyze(&sample);
        if classification.changed {
            self.on_motion_change(classification.state).await;
        }

        if self.phase == SessionPhase::Running && self.classifier.state() == MotionState::Moving {
            self.accept(sample).await;
        }
    }

    pub async fn handle_tick(&mut self) {
        self.collect_stats_write().await;
        if self.phase != SessionPhase::Running {
            return;
        }

        self.state.tick();
        self.running_secs_since_persist += 1;
        if self.running_secs_since_persist >= self.settings.stats_persist_interval_secs {
            self.running_secs_since_persist = 0;
            self.persist_stats().await;
        }
    }

    async fn on_motion_change(&mut self, motion: MotionState) {
        tracing::info!(motion = motion.label(), phase = ?self.phase, "Motion changed");

        match motion {
            MotionState::Stopped => {
                if self.phase == SessionPhase::Running && self.settings.auto_pause_enabled {
                    self.pause_with(PauseReason::AutoPauseRest).await;
                    self.events.push(SessionEvent::AutoPaused(PauseReason::AutoPauseRest));
                }
            },
            MotionState::Moving => {
                if self.phase == SessionPhase::Paused(PauseReason::AutoPauseRest) {
                    self.resume_tracking(false);
                    self.events.push(SessionEvent::AutoResumed);
                }
            },
            MotionState::Vehicle => {
                let count = self.state.increment_vehicle_warning_count();
                if count >= self.settings.vehicle_strike_limit {
                    tracing::warn!(count, "Vehicle detected again, stopping session");
                    self.state.pause(PauseReason::AutoPauseVehicle);
                    self.phase = SessionPhase::Terminated { forced: true };
                    self.persist_stats().await;
                    self.events.push(SessionEvent::ForcedFinish { count });
                } else {
                    tracing::warn!(count, "Vehicle detected, pausing session");
                    self.pause_with(PauseReason::AutoPauseVehicle).await;
                    self.events.push(SessionEvent::VehicleWarning { count });
                }
            },
        }
    }

    async fn pause_with(&mut self, reason: PauseReason) {
        self.state.pause(reason);
        self.phase = SessionPhase::Paused(reason);
        tracing::info!(?reason, "Session paused");
        self.persist_stats().await;
    }

    fn resume_tracking(&mut self, restart_classifier: bool) {
        self.state.resume();
        self.state.add_empty_segment();
        if restart_classifier {
            self.classifier.start(MotionState::Moving);
        }
        self.phase = SessionPhase::Running;
        // Distance is never measured across a pause
        self.last_accepted = None;
    }

    async fn accept(&mut self, sample: LocationSample) {
        let distance_delta = match &self.last_accepted {
            Some(previous) => {
                let distance = previous.distance_to(&sample);
                if distance < self.settings.min_distance_meters {
                    return;
                }
                distance
            },
            None => 0.,
        };

        self.state.update_location(sample, distance_delta);
        self.state.add_path_point(sample);
        self.last_accepted = Some(sample);

        if !self.stale {
            if let Err(e) = self.store.enqueue(&sample, self.state.current_segment_index()).await {
                tracing::warn!("Point kept in memory only: {e}");
            }
        }
        self.check_durability();
    }

    /// Writes distance and elapsed time in the background. Each write waits for the one before it,
    /// so they reach storage in order.
    async fn persist_stats(&mut self) {
        self.collect_stats_write().await;
        if self.stale {
            return;
        }
        let Some(session_id) = self.state.session_id().map(str::to_string) else {
            return;
        };

        let store = self.store.clone();
        let distance = self.state.total_distance_meters();
        let elapsed = self.state.elapsed_seconds();
        let previous = self.stats_write.take();
        self.stats_write = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Ok(lost @ StatsWrite::Lost { .. }) = previous.await {
                    return lost;
                }
            }
            write_stats(store, session_id, distance, elapsed).await
        }));
        self.check_durability();
    }

    /// Picks up the result of a stats write that already ended, without waiting for one in flight.
    async fn collect_stats_write(&mut self) {
        if self.stats_write.as_ref().is_some_and(JoinHandle::is_finished) {
            self.await_stats_write().await;
        }
    }

    async fn await_stats_write(&mut self) {
        let Some(handle) = self.stats_write.take() else {
            return;
        };

        match handle.await {
            Ok(StatsWrite::Lost { session_id }) if !self.stale && self.state.session_id() == Some(session_id.as_str()) => {
                tracing::warn!(session_id = %session_id, "Session no longer in storage, writes stopped");
                self.stale = true;
                self.events.push(SessionEvent::SessionLost { session_id });
            },
            Ok(_) => {},
            Err(e) => tracing::warn!("Stats write did not complete: {e}"),
        }
    }

    fn check_durability(&mut self) {
        let failures = self.store.consecutive_failures();
        if failures >= FAILURE_WARNING_THRESHOLD && !self.durability_warned {
            self.durability_warned = true;
            self.events.push(SessionEvent::DurabilityWarning { consecutive_failures: failures });
        } else if failures == 0 {
            self.durability_warned = false;
        }
    }

    fn completed_session(&self, forced: bool) -> CompletedSession {
        let finish_time = Utc::now();
        let start_time = self.state.start_time().unwrap_or(finish_time);

        CompletedSession {
            session_id: self.state.session_id().unwrap_or_default().to_string(),
            start_time,
            finish_time,
            distance_meters: self.state.total_distance_meters(),
            running_seconds: self.state.elapsed_seconds(),
            total_elapsed_seconds: (finish_time - start_time).num_seconds().max(0) as u64,
            vehicle_warning_count: self.state.vehicle_warning_count(),
            forced,
            points: CompletedSession::flatten_segments(self.state.path_segments()),
        }
    }
}

async fn write_stats(store: BufferedPointStore, session_id: String, distance: f64, elapsed: u64) -> StatsWrite {
    match store.is_session_open(&session_id).await {
        Ok(true) => match store.update_session_stats(distance, elapsed).await {
            Ok(()) => StatsWrite::Written,
            Err(e) => {
                tracing::warn!(session_id = %session_id, "Failed to persist session stats: {e}");
                StatsWrite::Failed
            },
        },
        Ok(false) => StatsWrite::Lost { session_id },
        Err(e) => {
            tracing::warn!(session_id = %session_id, "Failed to check session: {e}");
            StatsWrite::Failed
        },
    }
}
