//! Tripwire - proximity-triggered evidence capture and review
//!
//! A distance sensor is watched continuously. When something comes within the
//! trigger threshold, a still frame is grabbed from the camera and stored in
//! the evidence directory, where a human reviewer can expand it or mark it as
//! safe (which deletes it).
//!
//! - **`sensor`**: reconnecting line-oriented sensor stream (serial or TCP)
//! - **`capture`**: trigger decision, camera devices, frame capturer
//! - **`storage`**: evidence directory index
//! - **`review`**: image loading for display
//! - **`session`**: the loop tying it all together, plus the handle used by a UI
//!
//! Feature flags:
//!
//! - **`serial`** (default): serial-port sensors via `serialport`
//! - **`test-source`**: synthetic camera that needs no hardware

pub mod capture;
pub mod config;
pub mod error;
pub mod review;
pub mod sensor;
pub mod session;
pub mod storage;

pub use capture::{
    CameraConfig, CameraDevice, CaptureTrigger, CommandCamera, FrameCapturer, TriggerConfig,
};
#[cfg(feature = "test-source")]
pub use capture::{SyntheticCamera, SyntheticCameraConfig};
pub use config::{SensorConfig, TripwireConfig};
pub use error::{
    CaptureError, ConnectionError, DecodeError, DeletionError, DisposeError, ExpandError,
    NotFoundError, SessionClosed,
};
pub use review::{ImageBytes, THUMBNAIL_EDGE};
pub use sensor::{Reading, SensorEndpoint, SensorStream, SensorTransport};
pub use session::{ConnectionStatus, ReviewSession, SessionConfig, SessionEvent, SessionHandle};
pub use storage::{EvidenceId, EvidenceRecord, EvidenceStore};
