//! Cache maintenance: ghost entries and duplicate reports.
//!
//! A *ghost* is a path → hash entry whose file no longer exists. Ghosts are
//! only found and removed on request; nothing else deletes entries in bulk.
//! A key is matched against disk through [`paths::resolve_key`], so files
//! stored under a non-NFC name still count as present. Keys built from
//! non-UTF-8 names cannot be checked and are never reported.
//!
//! Duplicate reports are read-only:
//!
//! * [`duplicate_files`] groups paths whose content is byte-identical.
//! * [`duplicate_models`] groups distinct files the registry attributes to
//!   the same model (usually different versions of it).

use crate::cache::MetadataCache;
use crate::paths;
use serde::Serialize;
use std::collections::BTreeMap;

/// Result of a ghost scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GhostReport {
    /// Paths whose files are gone, sorted
    pub ghosts: Vec<String>,
    /// Whether they were removed from the cache
    pub removed: bool,
}

/// Paths in the cache whose files no longer exist.
#[must_use]
pub fn find_ghosts(cache: &MetadataCache) -> Vec<String> {
    cache
        .hashes()
        .keys()
        .filter(|key| {
            if paths::is_lossy_key(key) {
                log::debug!("Cannot check {} for existence, skipping", key);
                return false;
            }
            paths::resolve_key(key).is_none()
        })
        .cloned()
        .collect()
}

/// Find ghosts and, if `remove` is set, drop them and save once.
pub fn scan_ghosts(cache: &mut MetadataCache, remove: bool) -> GhostReport {
    cache.load();
    let ghosts = find_ghosts(cache);
    if ghosts.is_empty() {
        return GhostReport::default();
    }

    log::info!("Found {} ghost entries", ghosts.len());
    if !remove {
        return GhostReport {
            ghosts,
            removed: false,
        };
    }

    for ghost in &ghosts {
        cache.remove_entry(ghost);
    }
    let outcome = cache.save();
    if outcome.failed() {
        log::error!("Ghost entries removed in memory but the cache could not be saved");
    }

    GhostReport {
        ghosts,
        removed: true,
    }
}

/// Hashes shared by two or more paths, with those paths.
#[must_use]
pub fn duplicate_files(cache: &MetadataCache) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (path, hash) in cache.hashes() {
        groups.entry(hash.clone()).or_default().push(path.clone());
    }
    groups.retain(|_, paths| paths.len() > 1);
    groups
}

/// Registry model ids carried by two or more distinct hashes, with those hashes.
#[must_use]
pub fn duplicate_models(cache: &MetadataCache) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (hash, record) in cache.infos() {
        if let Some(model_id) = record.model_id() {
            groups.entry(model_id).or_default().push(hash.clone());
        }
    }
    groups.retain(|_, hashes| hashes.len() > 1);
    groups
}
