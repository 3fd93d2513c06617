//! Timestamped, deduplicated snapshots of the cache documents.
//!
//! Snapshots live in one directory and are named
//! `{prefix}-{timestamp}.json`, where the timestamp is ISO 8601 basic format
//! in UTC with microseconds (`20240630T120000.000000Z`). The basic format
//! keeps the names free of `:` so they are valid on every platform.
//!
//! A prefix identifies one logical document (`sage_cache_hash`,
//! `sage_cache_info`) or one failure channel (`sage_cache_hash-error`,
//! `sage_cache_info-save-error`). Because names are parsed strictly,
//! `sage_cache_hash` never matches files of `sage_cache_hash-error`.
//!
//! # Retention
//!
//! [`BackupManager::prune`] keeps, per prefix:
//!
//! 1. one file per distinct content (the newest copy),
//! 2. the newest `min_count` of those,
//! 3. beyond that, snapshots younger than `min_days`, at most one per
//!    calendar day.
//!
//! Everything else is deleted.

use crate::store::{self, to_canonical_vec, StoreError};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// `chrono` format string for snapshot timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Errors raised while creating or pruning snapshots.
#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    /// The snapshot content could not be serialized.
    #[error("Failed to serialize backup for {prefix}: {source}")]
    Serialize {
        /// Document prefix
        prefix: String,
        /// The underlying serialization error
        #[source]
        source: serde_json::Error,
    },

    /// A filesystem operation in the backup directory failed.
    #[error("Backup I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A snapshot could not be written atomically.
    #[error("Failed to write backup {path}: {source}")]
    Write {
        /// Snapshot path
        path: PathBuf,
        /// The underlying store error
        #[source]
        source: StoreError,
    },
}

/// How many snapshots to keep per prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct RetentionPolicy {
    /// Always keep this many of the newest distinct snapshots.
    pub min_count: usize,
    /// Additionally keep one snapshot per day younger than this many days.
    pub min_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            min_count: 7,
            min_days: 7,
        }
    }
}

/// One snapshot file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    /// Full path of the snapshot
    pub path: PathBuf,
    /// Timestamp parsed from the file name
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the file's bytes
    pub content_hash: String,
}

/// Result of a pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Snapshots left in place, newest first
    pub retained: Vec<PathBuf>,
    /// Snapshots removed
    pub deleted: Vec<PathBuf>,
}

/// Creates and prunes document snapshots in one directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    policy: RetentionPolicy,
    snapshots_enabled: bool,
}

impl BackupManager {
    /// Create a manager for `dir` with the default retention policy.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            policy: RetentionPolicy::default(),
            snapshots_enabled: true,
        }
    }

    /// Use a different retention policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Turn routine snapshots on or off. Quarantine copies are always made.
    #[must_use]
    pub fn with_snapshots(mut self, enabled: bool) -> Self {
        self.snapshots_enabled = enabled;
        self
    }

    /// Directory holding the snapshots.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Active retention policy.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Snapshot `data` under `prefix`, then prune that prefix.
    ///
    /// Returns the new file, or `None` when an existing snapshot already holds
    /// the same bytes (or snapshots are disabled).
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] if serialization or the write fails.
    pub fn backup<T: Serialize + ?Sized>(
        &self,
        prefix: &str,
        data: &T,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, BackupError> {
        let bytes = to_canonical_vec(data).map_err(|source| BackupError::Serialize {
            prefix: prefix.to_string(),
            source,
        })?;
        self.backup_bytes(prefix, &bytes, timestamp)
    }

    /// Snapshot already-serialized bytes under `prefix`, then prune that prefix.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Io`] if the directory cannot be created or
    /// pruned, and [`BackupError::Write`] if the snapshot cannot be written.
    pub fn backup_bytes(
        &self,
        prefix: &str,
        bytes: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, BackupError> {
        if !self.snapshots_enabled {
            return Ok(None);
        }

        let written = self.write_unique(prefix, bytes, timestamp)?;
        if let Some(path) = &written {
            log::debug!("Backed up {} to {}", prefix, path.display());
        } else {
            log::debug!("Skipping {} backup, identical snapshot exists", prefix);
        }

        let report = self.prune(prefix, self.policy, timestamp)?;
        if !report.deleted.is_empty() {
            log::debug!(
                "Pruned {} old {} backups ({} kept)",
                report.deleted.len(),
                prefix,
                report.retained.len()
            );
        }
        Ok(written)
    }

    /// Copy `source` verbatim into the backup directory under `prefix`.
    ///
    /// Used for forensic copies of files that failed to load or save. Copies
    /// are deduplicated by content but never pruned.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Io`] if the source cannot be read and
    /// [`BackupError::Write`] if the copy cannot be written.
    pub fn quarantine(
        &self,
        prefix: &str,
        source: &Path,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, BackupError> {
        let bytes = fs::read(source).map_err(|e| BackupError::Io {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.write_unique(prefix, &bytes, timestamp)
    }

    /// List snapshots of `prefix`, newest first.
    ///
    /// Files whose names don't parse as `{prefix}-{timestamp}.json` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Io`] if the directory cannot be listed. A
    /// missing directory is an empty list.
    pub fn list(&self, prefix: &str) -> Result<Vec<BackupFile>, BackupError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackupError::Io {
                    path: self.dir.clone(),
                    source: e,
                })
            }
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(timestamp) = name.to_str().and_then(|n| parse_snapshot_name(prefix, n))
            else {
                continue;
            };
            let path = entry.path();
            match fs::read(&path) {
                Ok(bytes) => files.push(BackupFile {
                    path,
                    timestamp,
                    content_hash: content_hash(&bytes),
                }),
                Err(e) => log::warn!("Skipping unreadable backup {}: {}", path.display(), e),
            }
        }

        files.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(files)
    }

    /// Apply the retention rules to `prefix` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Io`] if the directory cannot be listed.
    /// Individual files that fail to delete are logged and reported as retained.
    pub fn prune(
        &self,
        prefix: &str,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<PruneReport, BackupError> {
        let files = self.list(prefix)?;
        let (keep, drop) = select_retained(&files, policy, now);

        let mut report = PruneReport::default();
        for file in drop {
            match fs::remove_file(&file.path) {
                Ok(()) => report.deleted.push(file.path.clone()),
                Err(e) => {
                    log::warn!("Failed to delete backup {}: {}", file.path.display(), e);
                    report.retained.push(file.path.clone());
                }
            }
        }
        report
            .retained
            .extend(keep.into_iter().map(|f| f.path.clone()));
        Ok(report)
    }

    fn write_unique(
        &self,
        prefix: &str,
        bytes: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, BackupError> {
        let digest = content_hash(bytes);
        if self.list(prefix)?.iter().any(|f| f.content_hash == digest) {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir).map_err(|e| BackupError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        // Two snapshots in the same microsecond: step forward until the name is free.
        let mut stamp = timestamp;
        let mut path = self.dir.join(snapshot_name(prefix, stamp));
        while path.exists() {
            stamp += Duration::microseconds(1);
            path = self.dir.join(snapshot_name(prefix, stamp));
        }

        store::write_bytes(&path, bytes).map_err(|source| BackupError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(Some(path))
    }
}

/// Split newest-first `files` into (retained, deleted).
fn select_retained(
    files: &[BackupFile],
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> (Vec<&BackupFile>, Vec<&BackupFile>) {
    let mut seen_content = HashSet::new();
    let mut unique = Vec::new();
    let mut drop = Vec::new();
    for file in files {
        if seen_content.insert(file.content_hash.as_str()) {
            unique.push(file);
        } else {
            drop.push(file);
        }
    }

    let max_age = Duration::days(i64::from(policy.min_days));
    let mut days: HashSet<NaiveDate> = HashSet::new();
    let mut keep = Vec::new();
    for (index, file) in unique.into_iter().enumerate() {
        let retained = index < policy.min_count
            || (now - file.timestamp < max_age && days.insert(file.timestamp.date_naive()));
        if retained {
            keep.push(file);
        } else {
            drop.push(file);
        }
    }
    (keep, drop)
}

/// File name of a snapshot taken at `timestamp`.
#[must_use]
pub fn snapshot_name(prefix: &str, timestamp: DateTime<Utc>) -> String {
    format!("{}-{}.json", prefix, timestamp.format(TIMESTAMP_FORMAT))
}

/// Parse the timestamp out of `{prefix}-{timestamp}.json`.
#[must_use]
pub fn parse_snapshot_name(prefix: &str, file_name: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name
        .strip_prefix(prefix)?
        .strip_prefix('-')?
        .strip_suffix(".json")?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
