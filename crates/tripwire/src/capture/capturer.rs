//! Frame capturer
//!
//! Grabs one frame from the camera and persists it into the evidence
//! directory under a fresh identifier. The frame is written to a hidden
//! `.partial` file and renamed into place, so the directory never shows a
//! half-written image and a failed capture leaves nothing behind.

use chrono::Utc;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use super::camera::CameraDevice;
use crate::error::CaptureError;
use crate::storage::{EvidenceId, EvidenceRecord};

/// Camera plus the logic to turn its frames into evidence files
pub struct FrameCapturer {
    camera: Box<dyn CameraDevice>,
}

impl FrameCapturer {
    pub fn new(camera: Box<dyn CameraDevice>) -> Self {
        Self { camera }
    }

    pub fn describe(&self) -> String {
        self.camera.describe()
    }

    /// Capture one frame and write it into `dir`.
    ///
    /// Blocks for device I/O and the file write. On any error no evidence
    /// file exists afterwards.
    pub fn capture_and_store(&mut self, dir: &Path) -> Result<EvidenceRecord, CaptureError> {
        let frame = self.camera.grab_frame()?;

        let id = EvidenceId::generate(frame.format.extension());
        let path = dir.join(id.as_str());
        let partial = dir.join(format!(".{}.partial", id));

        if let Err(source) = write_synced(&partial, &frame.data) {
            discard(&partial);
            return Err(CaptureError::Storage { path, source });
        }
        if let Err(source) = fs::rename(&partial, &path) {
            discard(&partial);
            return Err(CaptureError::Storage { path, source });
        }

        info!("Saved evidence {} ({} bytes)", id, frame.data.len());
        Ok(EvidenceRecord::new(id, path, Utc::now()))
    }
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_data()
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed partial capture {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial capture {:?}: {}", path, e),
    }
}
