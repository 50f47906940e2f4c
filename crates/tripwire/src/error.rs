//! Error types for the detection-to-review pipeline
//!
//! Every error here is recoverable from the session's point of view and is
//! reported to the presentation layer. The only fatal condition (the evidence
//! directory cannot be created or listed) surfaces as an `anyhow::Error` from
//! [`EvidenceStore::open`](crate::storage::EvidenceStore::open).

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::storage::EvidenceId;

/// The sensor transport is unreachable or broke while reading.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to open sensor at {endpoint}: {source}")]
    Open {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("sensor link {endpoint} failed: {source}")]
    Read {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("sensor link {endpoint} was closed by the device")]
    Closed { endpoint: String },
}

/// The camera could not produce and persist a frame.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("camera {device} returned no frame: {reason}")]
    CaptureFailed { device: String, reason: String },

    #[error("camera {device} produced no frame within {timeout:?}")]
    Timeout { device: String, timeout: Duration },

    #[error("failed to write frame to {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An operation referenced an identifier that is not in the store.
#[derive(Debug, Error)]
#[error("no evidence record with id {0}")]
pub struct NotFoundError(pub EvidenceId);

/// The filesystem refused to delete an evidence file. The in-memory record is
/// left in place so the failure stays visible and can be retried.
#[derive(Debug, Error)]
#[error("failed to delete evidence {id} at {path:?}: {source}")]
pub struct DeletionError {
    pub id: EvidenceId,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// A stored evidence file is not a readable image.
#[derive(Debug, Error)]
#[error("evidence {id} at {path:?} is not a valid image: {source}")]
pub struct DecodeError {
    pub id: EvidenceId,
    pub path: PathBuf,
    #[source]
    pub source: image::ImageError,
}

/// The review session loop has stopped and no longer answers requests.
#[derive(Debug, Clone, Copy, Error)]
#[error("review session is not running")]
pub struct SessionClosed;

#[derive(Debug, Error)]
pub enum RemoveError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Deletion(#[from] DeletionError),
}

#[derive(Debug, Error)]
pub enum ExpandError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Closed(#[from] SessionClosed),
}

#[derive(Debug, Error)]
pub enum DisposeError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Deletion(#[from] DeletionError),
    #[error(transparent)]
    Closed(#[from] SessionClosed),
}

impl From<RemoveError> for DisposeError {
    fn from(err: RemoveError) -> Self {
        match err {
            RemoveError::NotFound(e) => DisposeError::NotFound(e),
            RemoveError::Deletion(e) => DisposeError::Deletion(e),
        }
    }
}
