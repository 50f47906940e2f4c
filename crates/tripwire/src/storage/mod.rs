//! Evidence storage
//!
//! Captured images live as flat files in a single directory. There is no
//! manifest: the directory listing is the source of truth at startup, and an
//! evidence record's identifier is its file name.

pub mod local;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub use local::EvidenceStore;

/// File extensions recognised as evidence images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Prefix of file names generated for fresh captures
const CAPTURE_PREFIX: &str = "detected_";

/// Returns true if `path` has one of the [`IMAGE_EXTENSIONS`].
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Opaque identifier of an evidence record: the image's file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceId(String);

impl EvidenceId {
    /// Generate a fresh identifier from a random 128-bit token.
    pub fn generate(extension: &str) -> Self {
        Self(format!(
            "{}{}.{}",
            CAPTURE_PREFIX,
            Uuid::new_v4().simple(),
            extension
        ))
    }

    /// Derive the identifier of an existing file. Returns `None` for paths
    /// without a UTF-8 file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()?.to_str().map(|name| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvidenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EvidenceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EvidenceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EvidenceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One captured image awaiting human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: EvidenceId,
    /// Absolute or store-relative path of the backing image file
    pub path: PathBuf,
    /// Capture time (file modification time for records found at startup)
    pub captured_at: DateTime<Utc>,
}

impl EvidenceRecord {
    pub fn new(id: EvidenceId, path: PathBuf, captured_at: DateTime<Utc>) -> Self {
        Self {
            id,
            path,
            captured_at,
        }
    }
}
