//! Pull-metadata workflow.
//!
//! Combines the hasher, the cache and a registry fetcher to bring one file's
//! info record up to date:
//!
//! 1. Reuse the cached hash for the path, or hash the file.
//! 2. Unless forced, stop if the cached record is still fresh.
//! 3. Ask the registry; merge its fields on success.
//! 4. On failure mark the record unconfirmed, except that a record the
//!    registry confirmed before stays confirmed.
//! 5. Save.
//!
//! Registry problems never fail a pull. Only an unreadable file does, and
//! only for that one request.

use crate::cache::entry::{InfoRecord, FILE_PATH, HASH, LAST_USED};
use crate::cache::{CacheError, MetadataCache};
use crate::fetcher::{FetchError, MetadataFetcher};
use crate::hasher::{HashError, Hasher};
use crate::paths;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// When a cached record is considered stale enough to re-query the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Staleness {
    /// Refetch until the registry has confirmed the hash.
    #[default]
    MissingRegistryData,
    /// Only fetch for hashes with no record at all.
    MissingRecord,
}

impl Staleness {
    /// `true` if `record` should be refreshed under this policy.
    #[must_use]
    pub fn is_stale(self, record: &InfoRecord) -> bool {
        match self {
            Self::MissingRegistryData => !record.is_registry_confirmed(),
            Self::MissingRecord => record.is_empty(),
        }
    }
}

/// Options for one pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullOptions {
    /// Query the registry even if the cached record is fresh.
    pub force: bool,
    /// Stamp `lastUsed` with the current time.
    pub update_last_used: bool,
    /// Freshness rule for cached records.
    pub staleness: Staleness,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            force: false,
            update_last_used: true,
            staleness: Staleness::default(),
        }
    }
}

/// How a pull was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullStatus {
    /// The cached record was fresh; the registry was not asked.
    Cached,
    /// The registry returned data that was merged in.
    Fetched,
    /// The registry was asked and had nothing usable.
    Unavailable(FetchError),
}

/// Outcome of a pull.
#[derive(Debug, Clone, PartialEq)]
pub struct PullResult {
    /// Cache key of the file
    pub key: String,
    /// Content hash of the file
    pub hash: String,
    /// Info record as stored after the pull
    pub record: InfoRecord,
    /// Whether the registry was consulted and with what result
    pub status: PullStatus,
}

/// Errors that fail a single pull.
#[derive(thiserror::Error, Debug)]
pub enum PullError {
    /// The file could not be hashed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// The cache rejected the merged record.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Bring the info record for `path` up to date.
///
/// # Errors
///
/// Returns [`PullError::Hash`] if the file must be hashed and cannot be read.
pub fn pull_metadata<F>(
    cache: &mut MetadataCache,
    hasher: &Hasher,
    fetcher: &F,
    path: &Path,
    options: PullOptions,
) -> Result<PullResult, PullError>
where
    F: MetadataFetcher + ?Sized,
{
    cache.load();
    let key = paths::cache_key(path);

    let cached_hash = cache.hash_for_path(&key).map(str::to_string);
    let known = cached_hash.is_some();
    let hash = match cached_hash {
        Some(hash) => hash,
        None => hasher.hash_file(path)?,
    };
    let prior = cache.by_hash(&hash);

    if !options.force && known && !options.staleness.is_stale(&prior) {
        log::debug!("Using cached metadata for {}", key);
        let mut record = prior;
        if options.update_last_used {
            cache.update_last_used_by_hash(&hash);
            cache.save();
            record = cache.by_hash(&hash);
        }
        return Ok(PullResult {
            key,
            hash,
            record,
            status: PullStatus::Cached,
        });
    }

    let mut record = prior.clone();
    let status = match fetcher.fetch_by_hash(&hash) {
        Ok(fields) => {
            log::info!("Fetched registry metadata for {}", paths::display_name(&key));
            record.merge(&fields);
            record.set_civitai(true);
            PullStatus::Fetched
        }
        Err(e) => {
            if e.is_not_found() {
                log::debug!("{}", e);
            } else {
                log::warn!("Registry lookup for {} failed: {}", key, e);
            }
            if !prior.is_registry_confirmed() {
                record.set_civitai(false);
            }
            PullStatus::Unavailable(e)
        }
    };

    record.insert(HASH, Value::from(hash.as_str()));
    record.insert(FILE_PATH, Value::from(key.as_str()));
    if options.update_last_used {
        record.set_last_used(Utc::now());
    } else if record.get(LAST_USED).is_none() {
        record.insert(LAST_USED, Value::from(""));
    }

    cache.add_or_update_entry(&key, record)?;
    cache.save();

    Ok(PullResult {
        record: cache.by_hash(&hash),
        key,
        hash,
        status,
    })
}

/// Hash every file in `files` whose path is not cached yet, in parallel,
/// and record the path → hash associations with a single save.
///
/// Existing info records are kept; new hashes get a skeleton record.
/// Returns the files that could not be hashed.
pub fn prime_hashes(
    cache: &mut MetadataCache,
    hasher: &Hasher,
    files: &[PathBuf],
) -> Vec<(PathBuf, HashError)> {
    cache.load();
    let missing: Vec<PathBuf> = files
        .iter()
        .filter(|f| cache.hash_for_path(&paths::cache_key(f)).is_none())
        .cloned()
        .collect();
    if missing.is_empty() {
        return Vec::new();
    }

    log::debug!("Hashing {} uncached files", missing.len());
    let mut failures = Vec::new();
    for (file, result) in hasher.hash_many(&missing) {
        match result {
            Ok(hash) => {
                let key = paths::cache_key(&file);
                let mut record = cache.by_hash(&hash);
                if record.is_empty() {
                    record = InfoRecord::skeleton(&hash, &key);
                }
                // The record carries the hash, so this cannot fail.
                if let Err(e) = cache.add_or_update_entry(&key, record) {
                    log::error!("{}", e);
                }
            }
            Err(e) => failures.push((file, e)),
        }
    }
    cache.save();
    failures
}
