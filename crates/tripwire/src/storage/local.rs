//! Local evidence directory
//!
//! Keeps an in-memory index of the evidence images in one directory. The
//! index is rebuilt by scanning the directory when the store is opened, and
//! every mutation touches the filesystem before the index so the two never
//! silently disagree.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{is_image_path, EvidenceId, EvidenceRecord};
use crate::error::{DeletionError, NotFoundError, RemoveError};

/// In-memory index of the evidence directory
pub struct EvidenceStore {
    dir: PathBuf,
    records: HashMap<EvidenceId, EvidenceRecord>,
}

impl EvidenceStore {
    /// Open the evidence directory, creating it if needed, and index every
    /// image already in it.
    ///
    /// This is the one fatal startup error: a directory that cannot be created
    /// or listed leaves nowhere to put evidence.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create evidence directory: {:?}", dir))?;

        let mut store = Self {
            dir,
            records: HashMap::new(),
        };
        for record in Self::load_all(&store.dir)? {
            store.insert(record);
        }

        info!(
            "Evidence store at {:?}: {} record(s)",
            store.dir,
            store.records.len()
        );
        Ok(store)
    }

    /// Enumerate the image files in `dir`, one record per file.
    ///
    /// Order follows the directory listing and is unspecified. Entries that
    /// cannot be inspected are skipped with a warning.
    pub fn load_all(dir: &Path) -> Result<Vec<EvidenceRecord>> {
        debug!("Scanning evidence directory: {:?}", dir);

        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to list evidence directory: {:?}", dir))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable directory entry in {:?}: {}", dir, e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || !is_image_path(&path) {
                continue;
            }
            let Some(id) = EvidenceId::from_path(&path) else {
                warn!("Skipping evidence file with non UTF-8 name: {:?}", path);
                continue;
            };
            let captured_at = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            records.push(EvidenceRecord::new(id, path, captured_at));
        }

        Ok(records)
    }

    /// Directory that holds the evidence files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Add a record to the index. An existing record with the same id is
    /// replaced and returned.
    pub fn insert(&mut self, record: EvidenceRecord) -> Option<EvidenceRecord> {
        self.records.insert(record.id.clone(), record)
    }

    /// Delete the record's file, then drop it from the index.
    ///
    /// If the file cannot be deleted the record stays indexed and
    /// [`RemoveError::Deletion`] is returned, so the caller can retry.
    pub fn remove(&mut self, id: &EvidenceId) -> Result<EvidenceRecord, RemoveError> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| NotFoundError(id.clone()))?;

        if let Err(source) = fs::remove_file(&record.path) {
            warn!("Failed to delete evidence {:?}: {}", record.path, source);
            return Err(DeletionError {
                id: id.clone(),
                path: record.path.clone(),
                source,
            }
            .into());
        }

        let record = self
            .records
            .remove(id)
            .ok_or_else(|| NotFoundError(id.clone()))?;
        debug!("Deleted evidence {}", record.id);
        Ok(record)
    }

    pub fn get(&self, id: &EvidenceId) -> Option<&EvidenceRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &EvidenceId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over the indexed records in no particular order
    pub fn records(&self) -> impl Iterator<Item = &EvidenceRecord> {
        self.records.values()
    }

    /// Copy of every record, newest capture first
    pub fn snapshot(&self) -> Vec<EvidenceRecord> {
        let mut records: Vec<EvidenceRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            b.captured_at
                .cmp(&a.captured_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }
}
