//! SHA-256 file hasher with streaming support.
//!
//! # Overview
//!
//! The cache identifies a model by the SHA-256 digest of its bytes, so two
//! copies of the same file under different names share one info record. The
//! digest is rendered as lowercase hex, which is also the form the model
//! registry accepts on its by-hash endpoint.
//!
//! Files are streamed through a fixed-size buffer; model checkpoints are
//! routinely several gigabytes and must not be read into memory whole.
//!
//! # Example
//!
//! ```no_run
//! use sagecache::hasher::Hasher;
//! use std::path::Path;
//!
//! let hasher = Hasher::new();
//! let digest = hasher.hash_file(Path::new("/models/a.safetensors")).unwrap();
//! assert_eq!(digest.len(), 64);
//! ```

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

/// Default read buffer size (1 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// Content hasher producing lowercase hex SHA-256 digests.
#[derive(Debug, Clone)]
pub struct Hasher {
    buffer_size: usize,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Create a hasher with a custom read buffer size (minimum 4 KiB).
    #[must_use]
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(4096),
        }
    }

    /// Hash the full content of a file.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or read.
    pub fn hash_file(&self, path: &Path) -> Result<String, HashError> {
        let mut file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(HashError::from_io(path, e)),
            };
            hasher.update(&buffer[..read]);
        }

        let digest = format!("{:x}", hasher.finalize());
        log::trace!("Hashed {} -> {}", path.display(), digest);
        Ok(digest)
    }

    /// Hash many files in parallel.
    ///
    /// Results are returned in input order. Each file succeeds or fails on
    /// its own; one unreadable file does not affect the others.
    pub fn hash_many(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<String, HashError>)> {
        paths
            .par_iter()
            .map(|path| (path.clone(), self.hash_file(path)))
            .collect()
    }
}

/// Hash an in-memory byte slice the same way [`Hasher::hash_file`] hashes a file.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Check that a string looks like a SHA-256 hex digest.
#[must_use]
pub fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
