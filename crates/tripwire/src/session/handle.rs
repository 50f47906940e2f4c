//! Client side of the review session
//!
//! The presentation layer holds a [`SessionHandle`]. Requests travel to the
//! session loop over a command channel and are answered through oneshot
//! replies; notifications fan out over a broadcast channel.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::error::{DisposeError, ExpandError, NotFoundError, RemoveError, SessionClosed};
use crate::review::{self, ImageBytes};
use crate::storage::{EvidenceId, EvidenceRecord};

/// Sensor link state as shown to the reviewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
}

/// Notifications published by the session loop
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SensorConnected { endpoint: String },
    /// Sent once per transition from connected to disconnected
    SensorDisconnected { reason: String },
    /// The sensor could not be opened and has not been reported lost since
    /// the last connection. Retries continue silently.
    SensorUnavailable { reason: String },
    EvidenceCaptured { record: EvidenceRecord },
    CaptureFailed { reason: String },
    EvidenceDisposed { id: EvidenceId },
}

/// Requests handled on the session loop
pub(crate) enum Command {
    Lookup {
        id: EvidenceId,
        reply: oneshot::Sender<Option<EvidenceRecord>>,
    },
    Records {
        reply: oneshot::Sender<Vec<EvidenceRecord>>,
    },
    Dispose {
        id: EvidenceId,
        reply: oneshot::Sender<Result<EvidenceRecord, RemoveError>>,
    },
}

/// Cloneable handle to a running [`ReviewSession`](super::ReviewSession)
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) status: watch::Receiver<ConnectionStatus>,
}

impl SessionHandle {
    /// Subscribe to session events from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current sensor link state
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch the sensor link state for changes
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionClosed> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionClosed)?;
        rx.await.map_err(|_| SessionClosed)
    }

    /// Every record currently indexed, newest capture first
    pub async fn records(&self) -> Result<Vec<EvidenceRecord>, SessionClosed> {
        self.request(|reply| Command::Records { reply }).await
    }

    async fn lookup(&self, id: &EvidenceId) -> Result<EvidenceRecord, ExpandError> {
        self.request(|reply| Command::Lookup {
            id: id.clone(),
            reply,
        })
        .await?
        .ok_or_else(|| NotFoundError(id.clone()).into())
    }

    /// Load the full image behind `id` for display
    pub async fn request_expand(&self, id: &EvidenceId) -> Result<ImageBytes, ExpandError> {
        let record = self.lookup(id).await?;
        let image = blocking(move || review::load_full(&record)).await??;
        Ok(image)
    }

    /// Load a reduced preview of `id`, fitting a `max_edge` square
    pub async fn request_thumbnail(
        &self,
        id: &EvidenceId,
        max_edge: u32,
    ) -> Result<ImageBytes, ExpandError> {
        let record = self.lookup(id).await?;
        let image = blocking(move || review::load_thumbnail(&record, max_edge)).await??;
        Ok(image)
    }

    /// Mark `id` as safe and delete it. Nothing happens unless `confirmed`.
    pub async fn request_dispose(
        &self,
        id: &EvidenceId,
        confirmed: bool,
    ) -> Result<(), DisposeError> {
        if !confirmed {
            debug!("Dispose of {} not confirmed, keeping it", id);
            return Ok(());
        }

        let id = id.clone();
        self.request(|reply| Command::Dispose { id, reply })
            .await??;
        Ok(())
    }
}

/// Run blocking image work off the async threads
async fn blocking<T, F>(f: F) -> Result<T, SessionClosed>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        // Only happens while the runtime is shutting down
        Err(_) => Err(SessionClosed),
    }
}
