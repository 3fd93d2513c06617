//! Persistent model-metadata cache.
//!
//! The cache mirrors two JSON documents kept in one directory:
//!
//! * `sage_cache_hash.json`: absolute file path → SHA-256 of its content.
//! * `sage_cache_info.json`: SHA-256 → info record (registry fields, `lastUsed`, …).
//!
//! Files with identical bytes share a hash and therefore one info record.
//!
//! # Lifecycle
//!
//! A fresh [`MetadataCache`] is *uninitialized*. [`MetadataCache::load`]
//! reads whichever documents exist, or migrates the legacy
//! `sage_cache.json` on first use, and the cache is *loaded*. Mutating or
//! saving an uninitialized cache loads it first, so documents already on
//! disk are merged into rather than overwritten. Any mutation
//! makes it *dirty* until [`MetadataCache::save`] writes the documents that
//! actually changed. Later `load` calls only re-read a document whose
//! modification time moved.
//!
//! # Failure Policy
//!
//! Loading and saving never return errors. A corrupt document is
//! quarantined into `backup/` and replaced by an empty mapping; a failed
//! write leaves the old file in place and keeps the in-memory data. The only
//! error surfaced to callers is a contract violation in
//! [`MetadataCache::add_or_update_entry`].
//!
//! # Architecture
//!
//! * [`entry`]: the [`InfoRecord`] type and its well-known keys.
//! * [`migrate`]: legacy single-document migration.
//! * `document`: per-document mtime and content tracking.

mod document;
pub mod entry;
pub mod migrate;

pub use document::WriteOutcome;
pub use entry::InfoRecord;
pub use migrate::{migrate_legacy, Migration};

use crate::backup::{BackupManager, PruneReport};
use crate::store::JsonStore;
use chrono::{DateTime, Utc};
use document::TrackedDocument;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Prefix (file stem) of the path → hash document.
pub const HASH_DOCUMENT: &str = "sage_cache_hash";
/// Prefix (file stem) of the hash → info document.
pub const INFO_DOCUMENT: &str = "sage_cache_info";
/// File stem of the legacy single document.
pub const LEGACY_DOCUMENT: &str = "sage_cache";
/// Name of the snapshot directory inside the cache directory.
pub const BACKUP_DIR: &str = "backup";

/// Path → content hash.
pub type PathHashes = BTreeMap<String, String>;
/// Content hash → info record.
pub type HashInfos = BTreeMap<String, InfoRecord>;

/// Errors surfaced by cache operations.
///
/// These indicate caller bugs, not environmental failures.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    /// `add_or_update_entry` was given a record without a `hash`.
    #[error("Info record for {path} has no \"hash\" field")]
    MissingHash {
        /// Path the record was meant for
        path: String,
    },

    /// An empty string was given where a content hash is required.
    #[error("Empty hash given for {path}")]
    InvalidHash {
        /// Path the hash was meant for
        path: String,
    },
}

/// Coarse lifecycle state of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// `load` has never run.
    Uninitialized,
    /// In-memory data matches what was last loaded or saved.
    Loaded,
    /// In-memory data has unsaved changes.
    Dirty,
}

/// What [`MetadataCache::save`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Outcome for the path → hash document
    pub hashes: WriteOutcome,
    /// Outcome for the hash → info document
    pub infos: WriteOutcome,
}

impl SaveOutcome {
    /// Number of documents actually written.
    #[must_use]
    pub fn writes(&self) -> usize {
        [self.hashes, self.infos]
            .iter()
            .filter(|o| **o == WriteOutcome::Written)
            .count()
    }

    /// `true` if any document failed to save.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.hashes == WriteOutcome::Failed || self.infos == WriteOutcome::Failed
    }
}

/// File locations used by one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Lay the cache out inside `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `sage_cache_hash.json`
    #[must_use]
    pub fn hash_file(&self) -> PathBuf {
        self.root.join(format!("{HASH_DOCUMENT}.json"))
    }

    /// `sage_cache_info.json`
    #[must_use]
    pub fn info_file(&self) -> PathBuf {
        self.root.join(format!("{INFO_DOCUMENT}.json"))
    }

    /// `sage_cache.json`
    #[must_use]
    pub fn legacy_file(&self) -> PathBuf {
        self.root.join(format!("{LEGACY_DOCUMENT}.json"))
    }

    /// `backup/`
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }
}

/// Summary counts for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Number of path → hash entries
    pub paths: usize,
    /// Number of info records
    pub infos: usize,
    /// Info records confirmed by the registry
    pub registry_confirmed: usize,
    /// Info records no path points at
    pub orphaned_infos: usize,
}

/// In-memory mirror of the two cache documents.
///
/// One instance is meant to live for the whole process; see
/// [`crate::context::SageContext`].
#[derive(Debug)]
pub struct MetadataCache {
    layout: CacheLayout,
    store: JsonStore,
    hashes: TrackedDocument<PathHashes>,
    infos: TrackedDocument<HashInfos>,
    loaded: bool,
}

impl MetadataCache {
    /// Create an uninitialized cache in `root` with default backup retention.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let layout = CacheLayout::new(root);
        let backups = BackupManager::new(layout.backup_dir());
        Self::with_backups(layout, backups)
    }

    /// Create an uninitialized cache with a configured backup manager.
    #[must_use]
    pub fn with_backups(layout: CacheLayout, backups: BackupManager) -> Self {
        Self {
            hashes: TrackedDocument::new(HASH_DOCUMENT, layout.hash_file()),
            infos: TrackedDocument::new(INFO_DOCUMENT, layout.info_file()),
            store: JsonStore::new(backups),
            layout,
            loaded: false,
        }
    }

    /// File locations.
    #[must_use]
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Backup manager shared by snapshots and quarantine.
    #[must_use]
    pub fn backups(&self) -> &BackupManager {
        self.store.backups()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CacheState {
        if !self.loaded {
            CacheState::Uninitialized
        } else if self.hashes.is_dirty() || self.infos.is_dirty() {
            CacheState::Dirty
        } else {
            CacheState::Loaded
        }
    }

    /// Bring the in-memory documents up to date with disk.
    ///
    /// Cheap when nothing changed on disk. Never fails; see the module docs.
    pub fn load(&mut self) {
        let now = Utc::now();
        let backups = self.store.backups();

        if self.hashes.exists() || self.infos.exists() {
            if self.hashes.changed_on_disk() && self.hashes.reload(&self.store, backups, now) {
                log::debug!("Loaded {} path hashes", self.hashes.data.len());
            }
            if self.infos.changed_on_disk() && self.infos.reload(&self.store, backups, now) {
                log::debug!("Loaded {} info records", self.infos.data.len());
            }
        } else if !self.loaded {
            self.migrate_from_legacy();
        }

        self.loaded = true;
    }

    fn ensure_loaded(&mut self) {
        if !self.loaded {
            self.load();
        }
    }

    fn migrate_from_legacy(&mut self) {
        let legacy_path = self.layout.legacy_file();
        if !legacy_path.exists() {
            log::debug!("No cache documents in {}", self.layout.root.display());
            return;
        }

        let Some(legacy) = self
            .store
            .read::<BTreeMap<String, Value>>(&legacy_path, LEGACY_DOCUMENT)
        else {
            return;
        };

        let migration = migrate_legacy(&legacy);
        log::info!(
            "Migrating legacy cache: {} paths, {} info records ({} entries skipped)",
            migration.hashes.len(),
            migration.infos.len(),
            migration.skipped
        );
        self.hashes.replace(migration.hashes);
        self.infos.replace(migration.infos);
        self.loaded = true;

        let outcome = self.save();
        if outcome.failed() {
            log::error!("Legacy cache migrated in memory but could not be written");
        }
    }

    /// Write whichever documents changed since the last load or save.
    pub fn save(&mut self) -> SaveOutcome {
        self.ensure_loaded();
        let now = Utc::now();
        let backups = self.store.backups();
        SaveOutcome {
            hashes: self.hashes.persist(backups, now),
            infos: self.infos.persist(backups, now),
        }
    }

    /// The path → hash document.
    #[must_use]
    pub fn hashes(&self) -> &PathHashes {
        &self.hashes.data
    }

    /// The hash → info document.
    #[must_use]
    pub fn infos(&self) -> &HashInfos {
        &self.infos.data
    }

    /// Hash currently recorded for `path`.
    #[must_use]
    pub fn hash_for_path(&self, path: &str) -> Option<&str> {
        self.hashes.data.get(path).map(String::as_str)
    }

    /// All paths recorded with `hash`.
    #[must_use]
    pub fn paths_for_hash(&self, hash: &str) -> Vec<&str> {
        self.hashes
            .data
            .iter()
            .filter(|(_, h)| h.as_str() == hash)
            .map(|(p, _)| p.as_str())
            .collect()
    }

    /// Info record for the hash recorded for `path`; empty if unknown.
    #[must_use]
    pub fn by_path(&self, path: &str) -> InfoRecord {
        self.hash_for_path(path)
            .map(|hash| self.by_hash(hash))
            .unwrap_or_default()
    }

    /// Info record for `hash`; empty if unknown.
    #[must_use]
    pub fn by_hash(&self, hash: &str) -> InfoRecord {
        self.infos.data.get(hash).cloned().unwrap_or_default()
    }

    /// Record `path → hash`, creating a skeleton info record if the hash is
    /// new, and save immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidHash`] for an empty hash.
    pub fn add_entry(&mut self, path: &str, hash: &str) -> Result<SaveOutcome, CacheError> {
        if hash.is_empty() {
            return Err(CacheError::InvalidHash {
                path: path.to_string(),
            });
        }
        self.ensure_loaded();

        if let Some(previous) = self.hashes.data.insert(path.to_string(), hash.to_string()) {
            if previous != hash {
                log::debug!("{} changed hash {} -> {}", path, previous, hash);
            }
        }
        self.infos
            .data
            .entry(hash.to_string())
            .or_insert_with(|| InfoRecord::skeleton(hash, path));

        Ok(self.save())
    }

    /// Record `path → info["hash"]` and replace that hash's info record
    /// wholesale. Does not save.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MissingHash`] if `info` has no non-empty `hash`.
    pub fn add_or_update_entry(&mut self, path: &str, info: InfoRecord) -> Result<(), CacheError> {
        let hash = info
            .hash()
            .ok_or_else(|| CacheError::MissingHash {
                path: path.to_string(),
            })?
            .to_string();

        self.ensure_loaded();
        self.hashes.data.insert(path.to_string(), hash.clone());
        self.infos.data.insert(hash, info);
        Ok(())
    }

    /// Forget `path`. Its info record goes too once no other path shares the hash.
    ///
    /// Returns the hash `path` was mapped to. Does not save.
    pub fn remove_entry(&mut self, path: &str) -> Option<String> {
        self.ensure_loaded();
        let hash = self.hashes.data.remove(path)?;
        let still_referenced = self.hashes.data.values().any(|h| *h == hash);
        if !still_referenced {
            self.infos.data.remove(&hash);
            log::debug!("Removed {} and its info record {}", path, hash);
        } else {
            log::debug!("Removed {}; {} still referenced", path, hash);
        }
        Some(hash)
    }

    /// Set `lastUsed` to now on the record for `path`. Does not save.
    ///
    /// Returns `false` if the path or its record is unknown.
    pub fn update_last_used_by_path(&mut self, path: &str) -> bool {
        self.ensure_loaded();
        match self.hashes.data.get(path).cloned() {
            Some(hash) => self.update_last_used_by_hash(&hash),
            None => false,
        }
    }

    /// Set `lastUsed` to now on the record for `hash`. Does not save.
    ///
    /// Returns `false` if the hash is unknown.
    pub fn update_last_used_by_hash(&mut self, hash: &str) -> bool {
        self.touch_hash(hash, Utc::now())
    }

    /// Set `lastUsed` to `timestamp` on the record for `hash`.
    pub fn touch_hash(&mut self, hash: &str, timestamp: DateTime<Utc>) -> bool {
        self.ensure_loaded();
        match self.infos.data.get_mut(hash) {
            Some(record) => {
                record.set_last_used(timestamp);
                true
            }
            None => false,
        }
    }

    /// Last time the model at `path` was used, if recorded.
    #[must_use]
    pub fn get_last_used_by_path(&self, path: &str) -> Option<DateTime<Utc>> {
        let hash = self.hash_for_path(path)?;
        self.infos.data.get(hash)?.last_used()
    }

    /// Summary counts.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let referenced: std::collections::HashSet<&str> =
            self.hashes.data.values().map(String::as_str).collect();
        CacheStats {
            paths: self.hashes.data.len(),
            infos: self.infos.data.len(),
            registry_confirmed: self
                .infos
                .data
                .values()
                .filter(|r| r.is_registry_confirmed())
                .count(),
            orphaned_infos: self
                .infos
                .data
                .keys()
                .filter(|h| !referenced.contains(h.as_str()))
                .count(),
        }
    }

    /// Apply backup retention to both document prefixes now.
    ///
    /// # Errors
    ///
    /// Returns the first [`crate::backup::BackupError`] encountered.
    pub fn prune_backups(&self) -> Result<Vec<PruneReport>, crate::backup::BackupError> {
        let backups = self.store.backups();
        let now = Utc::now();
        [HASH_DOCUMENT, INFO_DOCUMENT]
            .iter()
            .map(|prefix| backups.prune(prefix, backups.policy(), now))
            .collect()
    }
}
