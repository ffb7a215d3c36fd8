use std::time::Duration;

use tokio::{sync::{broadcast, mpsc, oneshot, watch}, task::JoinHandle};
use workout_tracker_lib::{location_sample::LocationSample, summary::CompletedSession};

use crate::{location_source::LocationSource, orchestrator::{SessionEvent, SessionOrchestrator, SessionPhase}, producers::{LocationFeed, Ticker}, session_state::SessionSnapshot, TrackerError};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const BROADCAST_CAPACITY: usize = 100;

pub type Reply<T> = oneshot::Sender<Result<T, TrackerError>>;

/// Everything the session loop reacts to. Producer events and user commands share one channel,
/// so they are handled strictly one at a time.
pub enum TrackerEvent {
    Location { generation: u64, sample: LocationSample },
    Tick { generation: u64 },
    LocationsEnded { generation: u64 },
    Command(SessionCommand),
}

pub enum SessionCommand {
    Start(Reply<String>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Finish(Reply<CompletedSession>),
    Discard(Reply<()>),
    SetAutoPause(bool, Reply<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Messages published to subscribers, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Session(SessionEvent),
    /// The location source has nothing more to give.
    SourceExhausted,
}

/// The front door for the UI. Cheap to clone.
///
/// Dropping every handle does not stop the loop; call [`SessionHandle::shutdown`].
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<TrackerEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
    phases: watch::Receiver<SessionPhase>,
    events: broadcast::Sender<LoopEvent>,
}

impl SessionHandle {
    pub async fn start(&self) -> Result<String, TrackerError> {
        self.request(SessionCommand::Start).await
    }

    pub async fn pause(&self) -> Result<(), TrackerError> {
        self.request(SessionCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), TrackerError> {
        self.request(SessionCommand::Resume).await
    }

    pub async fn finish(&self) -> Result<CompletedSession, TrackerError> {
        self.request(SessionCommand::Finish).await
    }

    pub async fn discard(&self) -> Result<(), TrackerError> {
        self.request(SessionCommand::Discard).await
    }

    pub async fn set_auto_pause(&self, enabled: bool) -> Result<(), TrackerError> {
        self.request(|reply| SessionCommand::SetAutoPause(enabled, reply)).await
    }

    /// Stops the producers and the loop. An open session is left as is and will be recovered
    /// on the next start.
    pub async fn shutdown(&self) -> Result<(), TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrackerEvent::Command(SessionCommand::Shutdown(reply))).await
            .map_err(|_| TrackerError::LoopClosed)?;
        rx.await.map_err(|_| TrackerError::LoopClosed)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phases.borrow()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrackerEvent::Command(command(reply))).await
            .map_err(|_| TrackerError::LoopClosed)?;
        rx.await.map_err(|_| TrackerError::LoopClosed)?
    }
}

struct SessionLoop {
    orchestrator: SessionOrchestrator,
    ticker: Ticker,
    feed: LocationFeed,
    rx: mpsc::Receiver<TrackerEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    phases: watch::Sender<SessionPhase>,
    events: broadcast::Sender<LoopEvent>,
}

/// Spawns the loop that owns the orchestrator. A recovered session should be restored on the
/// orchestrator before it is handed over here.
pub fn spawn(orchestrator: SessionOrchestrator, source: Box<dyn LocationSource>, tick_period: Duration) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (snapshots, snapshot_rx) = watch::channel(orchestrator.snapshot());
    let (phases, phase_rx) = watch::channel(orchestrator.phase());
    let (events, _) = broadcast::channel(BROADCAST_CAPACITY);

    let handle = SessionHandle {
        tx: tx.clone(),
        snapshots: snapshot_rx,
        phases: phase_rx,
        events: events.clone(),
    };

    let session_loop = SessionLoop {
        orchestrator,
        ticker: Ticker::new(tick_period, tx.clone()),
        feed: LocationFeed::new(source, tx),
        rx,
        snapshots,
        phases,
        events,
    };

    (handle, tokio::spawn(session_loop.run()))
}

impl SessionLoop {
    async fn run(mut self) {
        tracing::info!("Session loop running");
        self.sync_producers();

        while let Some(event) = self.rx.recv().await {
            match event {
                TrackerEvent::Location { generation, sample } => {
                    if generation == self.feed.generation() {
                        self.orchestrator.handle_location(sample).await;
                    } else {
                        tracing::trace!(generation, "Dropping stale location");
                    }
                },
                TrackerEvent::Tick { generation } => {
                    if generation == self.ticker.generation() {
                        self.orchestrator.handle_tick().await;
                    }
                },
                TrackerEvent::LocationsEnded { generation } => {
                    if generation == self.feed.generation() {
                        tracing::info!("Location source exhausted");
                        self.feed.mark_exhausted();
                        let _ = self.events.send(LoopEvent::SourceExhausted);
                    }
                },
                TrackerEvent::Command(SessionCommand::Shutdown(reply)) => {
                    self.ticker.stop();
                    self.feed.stop();
                    self.publish();
                    let _ = reply.send(());
                    break;
                },
                TrackerEvent::Command(command) => self.handle_command(command).await,
            }

            self.sync_producers();
            self.publish();
        }

        tracing::info!("Session loop stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        // A dropped reply receiver just means the caller stopped waiting
        match command {
            SessionCommand::Start(reply) => {
                let _ = reply.send(self.orchestrator.start().await);
            },
            SessionCommand::Pause(reply) => {
                let _ = reply.send(self.orchestrator.pause().await);
            },
            SessionCommand::Resume(reply) => {
                let _ = reply.send(self.orchestrator.resume().await);
            },
            SessionCommand::Finish(reply) => {
                // Stop producing before the final flush
                self.ticker.stop();
                self.feed.stop();
                let _ = reply.send(self.orchestrator.finish().await);
            },
            SessionCommand::Discard(reply) => {
                self.ticker.stop();
                self.feed.stop();
                let _ = reply.send(self.orchestrator.discard().await);
            },
            SessionCommand::SetAutoPause(enabled, reply) => {
                tracing::info!(enabled, "Auto-pause setting changed");
                self.orchestrator.set_auto_pause(enabled);
                let _ = reply.send(Ok(()));
            },
            SessionCommand::Shutdown(reply) => {
                let _ = reply.send(());
            },
        }
    }

    fn sync_producers(&mut self) {
        if self.orchestrator.wants_ticks() {
            self.ticker.start();
        } else {
            self.ticker.stop();
        }

        if self.orchestrator.wants_locations() {
            self.feed.start();
        } else {
            self.feed.stop();
        }
    }

    fn publish(&mut self) {
        for event in self.orchestrator.drain_events() {
            // No subscribers is fine
            let _ = self.events.send(LoopEvent::Session(event));
        }
        let current = self.orchestrator.phase();
        self.phases.send_if_modified(|phase| {
            let changed = *phase != current;
            *phase = current;
            changed
        });
        self.snapshots.send_replace(self.orchestrator.snapshot());
    }
}
