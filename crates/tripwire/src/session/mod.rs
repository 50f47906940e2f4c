//! Review session
//!
//! Owns the sensor stream, the capture trigger and the evidence store, and
//! drives them from a single task:
//!
//! - the sensor is drained every poll interval while connected
//! - while disconnected, a connection attempt is made every reconnect interval
//! - trigger fires are queued to a blocking capture worker, which reports
//!   each outcome back to the loop
//! - reviewer requests arrive over a command channel
//!
//! Every index mutation happens on the loop, so a capture completing while a
//! dispose is in flight cannot corrupt the store.

mod handle;

pub use handle::{ConnectionStatus, SessionEvent, SessionHandle};

use handle::Command;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{CameraDevice, CaptureTrigger, FrameCapturer, TriggerConfig};
use crate::config::TripwireConfig;
use crate::error::{CaptureError, ConnectionError};
use crate::sensor::{SensorLink, SensorStream, SensorTransport};
use crate::storage::{EvidenceRecord, EvidenceStore};

const EVENT_CAPACITY: usize = 64;
const COMMAND_CAPACITY: usize = 16;

type ConnectResult = Result<Box<dyn SensorLink>, ConnectionError>;
type CaptureOutcome = Result<EvidenceRecord, CaptureError>;

/// Timing and trigger settings of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub reconnect_interval: Duration,
    pub trigger: TriggerConfig,
    /// Trigger fires that may wait while the camera is busy. Further fires
    /// are dropped until the worker catches up.
    pub capture_backlog: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&TripwireConfig::default())
    }
}

impl From<&TripwireConfig> for SessionConfig {
    fn from(config: &TripwireConfig) -> Self {
        Self {
            poll_interval: config.sensor.poll_interval,
            reconnect_interval: config.sensor.reconnect_interval,
            trigger: config.trigger.clone(),
            capture_backlog: config.capture_backlog,
        }
    }
}

/// The detection-to-review pipeline, ready to [`run`](Self::run)
pub struct ReviewSession {
    config: SessionConfig,
    store: EvidenceStore,
    stream: SensorStream,
    capturer: FrameCapturer,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Sender<ConnectionStatus>,
    handle: SessionHandle,
}

impl ReviewSession {
    pub fn new(
        config: SessionConfig,
        store: EvidenceStore,
        transport: Arc<dyn SensorTransport>,
        camera: Box<dyn CameraDevice>,
    ) -> Self {
        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, status_rx) = watch::channel(ConnectionStatus::Reconnecting);

        let handle = SessionHandle {
            commands: command_tx,
            events: events.clone(),
            status: status_rx,
        };

        Self {
            config,
            store,
            stream: SensorStream::new(transport),
            capturer: FrameCapturer::new(camera),
            commands,
            events,
            status,
            handle,
        }
    }

    /// Handle for issuing requests and receiving events
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Run until `cancel` fires.
    ///
    /// A capture still in progress at shutdown is allowed to finish writing
    /// its file but is not indexed; the next startup scan picks it up.
    pub async fn run(self, cancel: CancellationToken) {
        let ReviewSession {
            config,
            store,
            stream,
            capturer,
            mut commands,
            events,
            status,
            handle,
        } = self;
        // The loop must not keep its own command channel alive
        drop(handle);

        let backlog = config.capture_backlog.max(1);
        let (request_tx, request_rx) = mpsc::channel::<()>(backlog);
        let (outcome_tx, mut outcomes) = mpsc::channel::<CaptureOutcome>(backlog);
        let dir = store.dir().to_path_buf();
        info!("Capture worker using camera {}", capturer.describe());
        let worker = tokio::task::spawn_blocking(move || {
            capture_worker(capturer, dir, request_rx, outcome_tx)
        });

        let mut state = LoopState {
            store,
            stream,
            trigger: CaptureTrigger::new(config.trigger.clone()),
            events,
            status,
            captures: request_tx,
            failed_attempts: 0,
            outage_reported: false,
        };

        let mut poll = interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retry = interval_at(
            Instant::now() + config.reconnect_interval,
            config.reconnect_interval,
        );
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Review session started, sensor at {}", state.stream.endpoint());
        let mut connecting: Option<JoinHandle<ConnectResult>> = Some(spawn_connect(&state.stream));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Review session cancelled");
                    break;
                }

                result = connect_finished(&mut connecting), if connecting.is_some() => {
                    connecting = None;
                    state.on_connect_result(result);
                    if !state.stream.is_connected() {
                        retry.reset();
                    }
                }

                _ = retry.tick(), if connecting.is_none() && !state.stream.is_connected() => {
                    debug!("Reconnecting to sensor at {}", state.stream.endpoint());
                    connecting = Some(spawn_connect(&state.stream));
                }

                _ = poll.tick(), if state.stream.is_connected() => {
                    if !state.on_poll() {
                        retry.reset();
                    }
                }

                Some(outcome) = outcomes.recv() => {
                    state.on_capture_outcome(outcome);
                }

                Some(command) = commands.recv() => {
                    state.on_command(command);
                }
            }
        }

        if let Some(pending) = connecting.take() {
            pending.abort();
        }
        drop(outcomes);
        drop(state);
        if worker.await.is_err() {
            error!("Capture worker panicked");
        }
        info!("Review session stopped");
    }
}

fn spawn_connect(stream: &SensorStream) -> JoinHandle<ConnectResult> {
    let transport = stream.transport();
    tokio::task::spawn_blocking(move || transport.open())
}

async fn connect_finished(
    pending: &mut Option<JoinHandle<ConnectResult>>,
) -> Result<ConnectResult, JoinError> {
    match pending {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Blocking loop that performs one capture per queued request
fn capture_worker(
    mut capturer: FrameCapturer,
    dir: PathBuf,
    mut requests: mpsc::Receiver<()>,
    outcomes: mpsc::Sender<CaptureOutcome>,
) {
    while requests.blocking_recv().is_some() {
        let outcome = capturer.capture_and_store(&dir);
        if let Err(mpsc::error::SendError(outcome)) = outcomes.blocking_send(outcome) {
            if let Ok(record) = outcome {
                info!(
                    "Capture {} finished after shutdown, it will be indexed on next start",
                    record.id
                );
            }
            break;
        }
    }
    debug!("Capture worker exiting");
}

/// Everything the loop handlers mutate
struct LoopState {
    store: EvidenceStore,
    stream: SensorStream,
    trigger: CaptureTrigger,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Sender<ConnectionStatus>,
    captures: mpsc::Sender<()>,
    failed_attempts: u32,
    /// Whether the reviewer has been told about the current outage
    outage_reported: bool,
}

impl LoopState {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn on_connect_result(&mut self, result: Result<ConnectResult, JoinError>) {
        let err = match result {
            Ok(Ok(link)) => {
                self.stream.attach(link);
                self.failed_attempts = 0;
                self.outage_reported = false;
                self.set_status(ConnectionStatus::Connected);
                self.emit(SessionEvent::SensorConnected {
                    endpoint: self.stream.endpoint(),
                });
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("connect task failed: {}", e),
        };

        self.failed_attempts = self.failed_attempts.saturating_add(1);
        if self.failed_attempts == 1 {
            warn!("Sensor unavailable, retrying: {}", err);
        } else {
            debug!("Sensor still unavailable (attempt {}): {}", self.failed_attempts, err);
        }
        if !self.outage_reported {
            self.outage_reported = true;
            self.emit(SessionEvent::SensorUnavailable { reason: err });
        }
    }

    /// Drain the sensor and queue captures. Returns false if the link was lost.
    fn on_poll(&mut self) -> bool {
        match self.stream.try_read_readings() {
            Ok(readings) => {
                for reading in readings {
                    if self.trigger.observe(reading) {
                        info!("Presence at {:.1}, capturing", reading.distance);
                        self.request_capture();
                    }
                }
                true
            }
            Err(e) => {
                self.set_status(ConnectionStatus::Reconnecting);
                self.outage_reported = true;
                self.emit(SessionEvent::SensorDisconnected {
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    fn request_capture(&self) {
        match self.captures.try_send(()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(())) => {
                warn!("Camera busy, dropping capture request");
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                error!("Capture worker is gone, cannot capture");
            }
        }
    }

    fn on_capture_outcome(&mut self, outcome: CaptureOutcome) {
        match outcome {
            Ok(record) => {
                if self.store.insert(record.clone()).is_some() {
                    warn!("Capture {} replaced an existing record", record.id);
                }
                self.emit(SessionEvent::EvidenceCaptured { record });
            }
            Err(e) => {
                warn!("Capture failed: {}", e);
                self.emit(SessionEvent::CaptureFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Lookup { id, reply } => {
                let _ = reply.send(self.store.get(&id).cloned());
            }
            Command::Records { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
            Command::Dispose { id, reply } => {
                let result = self.store.remove(&id);
                match &result {
                    Ok(record) => {
                        info!("Evidence {} marked safe and deleted", record.id);
                        self.emit(SessionEvent::EvidenceDisposed { id });
                    }
                    Err(e) => warn!("Dispose of {} failed: {}", id, e),
                }
                let _ = reply.send(result);
            }
        }
    }
}
