//! Cache keys for file paths.
//!
//! The path → hash document is keyed by absolute path strings. Keys are
//! normalized to Unicode NFC so that the same file reached through an NFD
//! spelling (as macOS reports names) and an NFC spelling maps to one entry:
//!
//! - NFC: `café.safetensors`, 'é' is U+00E9
//! - NFD: `café.safetensors`, 'e' U+0065 + combining acute U+0301
//!
//! Keys are *not* canonicalized through the filesystem: a key must stay
//! computable after its file has been deleted, so ghost entries can still be
//! addressed.
//!
//! # Example
//!
//! ```
//! use sagecache::paths::{cache_key, normalize_path_str};
//! use std::path::Path;
//!
//! assert_eq!(normalize_path_str("cafe\u{0301}"), "café");
//! # #[cfg(unix)]
//! assert_eq!(cache_key(Path::new("/models/cafe\u{0301}.ckpt")), "/models/café.ckpt");
//! ```

use std::borrow::Cow;
use std::fs;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::{is_nfc, UnicodeNormalization};
use walkdir::WalkDir;

/// Normalize a string to NFC, borrowing when it already is.
#[must_use]
pub fn normalize_path_str(s: &str) -> Cow<'_, str> {
    if is_nfc(s) {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(s.nfc().collect())
    }
}

/// Make `path` absolute against the current directory without touching the filesystem.
///
/// Falls back to the path as given if the current directory is unavailable.
#[must_use]
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// The key under which `path` is stored in the cache.
///
/// Absolute, NFC-normalized, lossy for non-UTF-8 names.
#[must_use]
pub fn cache_key(path: &Path) -> String {
    let absolute = absolute(path);
    let lossy = absolute.to_string_lossy();
    normalize_path_str(&lossy).into_owned()
}

/// `true` if `key` was built from a non-UTF-8 path and no longer names it.
#[must_use]
pub fn is_lossy_key(key: &str) -> bool {
    key.contains(char::REPLACEMENT_CHARACTER)
}

/// Find the file on disk that `key` was computed from.
///
/// Keys are NFC, but the file may be stored under another normalization.
/// Each component missing as written is matched against the NFC form of
/// the names in its directory. Returns `None` if nothing matches.
#[must_use]
pub fn resolve_key(key: &str) -> Option<PathBuf> {
    let direct = Path::new(key);
    if direct.exists() {
        return Some(direct.to_path_buf());
    }

    let mut resolved = PathBuf::new();
    for component in direct.components() {
        let candidate = resolved.join(component);
        if candidate.exists() {
            resolved = candidate;
            continue;
        }
        let Component::Normal(name) = component else {
            return None;
        };
        let name = name.to_string_lossy();
        let wanted = normalize_path_str(&name);
        let entry = fs::read_dir(&resolved)
            .ok()?
            .filter_map(Result::ok)
            .find(|entry| normalize_path_str(&entry.file_name().to_string_lossy()) == wanted)?;
        resolved.push(entry.file_name());
    }
    Some(resolved)
}

/// File name component of a cache key, for display.
#[must_use]
pub fn display_name(key: &str) -> &str {
    Path::new(key)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(key)
}

/// File stem of a cache key (`a` for `/models/a.safetensors`).
#[must_use]
pub fn file_stem(key: &str) -> &str {
    Path::new(key)
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or(key)
}

/// `true` if `path` has one of the given extensions (case-insensitive, no dot).
#[must_use]
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Expand `inputs` into model files.
///
/// Files are kept as given. Directories are walked recursively, keeping
/// regular files whose extension is in `extensions`, sorted by path.
/// Unreadable directory entries are logged and skipped.
#[must_use]
pub fn collect_model_files(inputs: &[PathBuf], extensions: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| has_extension(path, extensions))
            .collect();
        found.sort();
        log::debug!("Found {} model files in {}", found.len(), input.display());
        files.extend(found);
    }
    files
}
