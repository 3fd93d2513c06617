//! Crash-safe JSON document storage.
//!
//! # Canonical Form
//!
//! Every document is serialized the same way: keys sorted, four-space
//! indentation, and no space after `:`. Identical content therefore always
//! produces identical bytes, which is what the backup deduplication and the
//! cache's skip-unchanged-save logic compare.
//!
//! # Write Protocol
//!
//! 1. Serialize to canonical bytes.
//! 2. Write them to a temporary file in the target's directory.
//! 3. `fsync` the temporary file.
//! 4. Rename it over the target.
//!
//! A reader never observes a half-written target; after a crash the target
//! holds either the old or the new complete content.
//!
//! # Reading
//!
//! [`JsonStore::read`] never fails loudly. A missing file yields `None`; a
//! file that cannot be read or parsed yields `None` *and* is copied verbatim
//! into the backup directory under an `-error` prefix before anything
//! overwrites it.

use crate::backup::BackupManager;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::Formatter;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Errors raised by the document store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The value could not be converted to JSON.
    #[error("Failed to serialize document: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Reading, creating or flushing a file failed.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The temporary file could not be renamed over the target.
    #[error("Failed to replace {path}: {source}")]
    Persist {
        /// Target path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The file exists but is not valid JSON for the requested type.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        /// Path of the malformed document
        path: PathBuf,
        /// The underlying parse error
        #[source]
        source: serde_json::Error,
    },
}

/// `serde_json` formatter producing the canonical layout.
#[derive(Debug, Default)]
struct CanonicalFormatter {
    current_indent: usize,
    has_value: bool,
}

impl CanonicalFormatter {
    fn newline_indent<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b"\n")?;
        for _ in 0..self.current_indent {
            writer.write_all(b"    ")?;
        }
        Ok(())
    }
}

impl Formatter for CanonicalFormatter {
    fn begin_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.current_indent += 1;
        self.has_value = false;
        writer.write_all(b"[")
    }

    fn end_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.current_indent -= 1;
        if self.has_value {
            self.newline_indent(writer)?;
        }
        writer.write_all(b"]")
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if !first {
            writer.write_all(b",")?;
        }
        self.newline_indent(writer)
    }

    fn end_array_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.has_value = true;
        Ok(())
    }

    fn begin_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.current_indent += 1;
        self.has_value = false;
        writer.write_all(b"{")
    }

    fn end_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.current_indent -= 1;
        if self.has_value {
            self.newline_indent(writer)?;
        }
        writer.write_all(b"}")
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if !first {
            writer.write_all(b",")?;
        }
        self.newline_indent(writer)
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b":")
    }

    fn end_object_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.has_value = true;
        Ok(())
    }
}

/// Serialize a value to canonical JSON bytes.
///
/// The value goes through [`serde_json::Value`] first; its object map is
/// ordered, so keys come out sorted even for structs and hash maps.
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON (for example
/// a map with non-string keys).
pub fn to_canonical_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::with_capacity(256);
    let mut ser = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter::default());
    value.serialize(&mut ser)?;
    Ok(out)
}

/// A serialized document sitting in a durable temporary file next to its target.
///
/// Dropping a staged write without calling [`StagedWrite::commit`] removes
/// the temporary file and leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Path of the temporary file holding the new content.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically replace the target with the staged content.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persist`] if the rename fails; the target is left as it was.
    pub fn commit(self) -> Result<(), StoreError> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| StoreError::Persist {
                path: target.clone(),
                source: e.error,
            })?;
        sync_parent_dir(&target);
        Ok(())
    }
}

#[cfg(unix)]
fn sync_parent_dir(target: &Path) {
    if let Some(parent) = target.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_target: &Path) {}

/// Write bytes to a durable temporary file beside `target`.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the directory cannot be created or the
/// temporary file cannot be written and flushed.
pub fn stage_bytes(target: &Path, bytes: &[u8]) -> Result<StagedWrite, StoreError> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |source| StoreError::Io {
        path: target.to_path_buf(),
        source,
    };

    fs::create_dir_all(&dir).map_err(io_err)?;
    let mut temp = NamedTempFile::new_in(&dir).map_err(io_err)?;
    temp.write_all(bytes).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;

    Ok(StagedWrite {
        temp,
        target: target.to_path_buf(),
    })
}

/// Atomically write pre-serialized bytes to `target`.
///
/// # Errors
///
/// See [`stage_bytes`] and [`StagedWrite::commit`].
pub fn write_bytes(target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    stage_bytes(target, bytes)?.commit()
}

/// Parse a JSON document, reporting failures instead of absorbing them.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the file cannot be read and
/// [`StoreError::Parse`] if it is not valid JSON for `T`.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// JSON document store that quarantines unreadable files.
#[derive(Debug, Clone)]
pub struct JsonStore {
    backups: BackupManager,
}

impl JsonStore {
    /// Create a store that quarantines into the given backup manager's directory.
    #[must_use]
    pub fn new(backups: BackupManager) -> Self {
        Self { backups }
    }

    /// Backup manager used for quarantine copies.
    #[must_use]
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Serialize `data` canonically and atomically replace `path` with it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or I/O failure. The previous
    /// content of `path` is untouched in that case.
    pub fn write<T: Serialize + ?Sized>(&self, path: &Path, data: &T) -> Result<(), StoreError> {
        let bytes = to_canonical_vec(data).map_err(StoreError::Serialize)?;
        write_bytes(path, &bytes)
    }

    /// Serialize `data` and stage it without replacing the target yet.
    ///
    /// # Errors
    ///
    /// See [`JsonStore::write`].
    pub fn stage<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        data: &T,
    ) -> Result<StagedWrite, StoreError> {
        let bytes = to_canonical_vec(data).map_err(StoreError::Serialize)?;
        stage_bytes(path, &bytes)
    }

    /// Read a document, returning `None` if it is missing or unusable.
    ///
    /// An existing but unreadable file is copied to `{label}-error-{timestamp}.json`
    /// in the backup directory before returning.
    pub fn read<T: DeserializeOwned>(&self, path: &Path, label: &str) -> Option<T> {
        if !path.exists() {
            log::debug!("{} not present at {}", label, path.display());
            return None;
        }

        match read_document(path) {
            Ok(data) => Some(data),
            Err(e) => {
                log::warn!("Could not load {}: {}", label, e);
                let prefix = format!("{label}-error");
                match self.backups.quarantine(&prefix, path, Utc::now()) {
                    Ok(Some(copy)) => {
                        log::warn!("Quarantined {} to {}", path.display(), copy.display())
                    }
                    Ok(None) => log::debug!("Identical quarantine copy already exists"),
                    Err(qe) => log::error!("Failed to quarantine {}: {}", path.display(), qe),
                }
                None
            }
        }
    }
}
