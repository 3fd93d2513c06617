//! One persisted cache document with change tracking.
//!
//! A [`TrackedDocument`] remembers the modification time it last loaded and
//! the canonical bytes it last loaded or saved. Loading is skipped while the
//! mtime is unchanged; saving is skipped while the canonical bytes are
//! unchanged.

use crate::backup::BackupManager;
use crate::store::{self, JsonStore};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// What a save attempt did for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Content matched the last load/save; nothing touched.
    Unchanged,
    /// New content was written.
    Written,
    /// The write failed; the previous file is intact and in-memory data kept.
    Failed,
}

#[derive(Debug)]
pub(crate) struct TrackedDocument<T> {
    prefix: &'static str,
    path: PathBuf,
    pub(crate) data: T,
    loaded_mtime: Option<SystemTime>,
    persisted: Option<Vec<u8>>,
}

impl<T> TrackedDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub(crate) fn new(prefix: &'static str, path: PathBuf) -> Self {
        Self {
            prefix,
            path,
            data: T::default(),
            loaded_mtime: None,
            persisted: None,
        }
    }

    pub(crate) fn exists(&self) -> bool {
        self.path.exists()
    }

    /// `true` if the file exists and its mtime differs from the one last loaded.
    pub(crate) fn changed_on_disk(&self) -> bool {
        match file_mtime(&self.path) {
            Some(mtime) => self.loaded_mtime != Some(mtime),
            None => false,
        }
    }

    /// Replace in-memory data with the file's content.
    ///
    /// A failed read leaves the document empty (the store has quarantined the
    /// file). Returns `true` when the file loaded.
    pub(crate) fn reload(
        &mut self,
        store: &JsonStore,
        backups: &BackupManager,
        now: DateTime<Utc>,
    ) -> bool {
        let mtime = file_mtime(&self.path);
        let loaded = match store.read::<T>(&self.path, self.prefix) {
            Some(data) => {
                self.data = data;
                self.persisted = store::to_canonical_vec(&self.data).ok();
                if let Some(bytes) = &self.persisted {
                    if let Err(e) = backups.backup_bytes(self.prefix, bytes, now) {
                        log::warn!("Backup of {} after load failed: {}", self.prefix, e);
                    }
                }
                true
            }
            None => {
                self.data = T::default();
                self.persisted = None;
                false
            }
        };
        self.loaded_mtime = mtime;
        loaded
    }

    /// Replace in-memory data without touching disk; the next save writes it.
    pub(crate) fn replace(&mut self, data: T) {
        self.data = data;
        self.persisted = None;
    }

    /// `true` if the in-memory data differs from what was last loaded or saved.
    pub(crate) fn is_dirty(&self) -> bool {
        match store::to_canonical_vec(&self.data) {
            Ok(bytes) => self.persisted.as_deref() != Some(bytes.as_slice()),
            Err(_) => true,
        }
    }

    /// Write the document if its canonical bytes changed.
    pub(crate) fn persist(&mut self, backups: &BackupManager, now: DateTime<Utc>) -> WriteOutcome {
        let bytes = match store::to_canonical_vec(&self.data) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Could not serialize {}: {}", self.prefix, e);
                return WriteOutcome::Failed;
            }
        };

        if self.persisted.as_deref() == Some(bytes.as_slice()) {
            log::trace!("{} unchanged, not rewriting", self.prefix);
            return WriteOutcome::Unchanged;
        }

        match store::write_bytes(&self.path, &bytes) {
            Ok(()) => {
                self.loaded_mtime = file_mtime(&self.path);
                if let Err(e) = backups.backup_bytes(self.prefix, &bytes, now) {
                    log::warn!("Backup of {} after save failed: {}", self.prefix, e);
                }
                self.persisted = Some(bytes);
                log::debug!("Saved {}", self.path.display());
                WriteOutcome::Written
            }
            Err(e) => {
                log::error!("Failed to save {}: {}", self.prefix, e);
                if self.path.exists() {
                    let prefix = format!("{}-save-error", self.prefix);
                    if let Err(qe) = backups.quarantine(&prefix, &self.path, now) {
                        log::error!("Failed to preserve {}: {}", self.path.display(), qe);
                    }
                }
                WriteOutcome::Failed
            }
        }
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
