//! Process-wide state.
//!
//! A host process creates exactly one [`SageContext`] at startup and keeps it
//! for its lifetime; every consumer borrows the cache from it instead of
//! reaching for a global. There is no teardown: all writes are flushed by
//! the operations that make them.

use crate::backup::BackupManager;
use crate::cache::{CacheLayout, MetadataCache};
use crate::config::Config;
use crate::fetcher::{CivitaiClient, FetchError, MetadataFetcher};
use crate::hasher::{HashError, Hasher};
use crate::workflow::{prime_hashes, pull_metadata, PullError, PullResult};
use std::path::{Path, PathBuf};

/// Cache, hasher and registry client configured from one [`Config`].
pub struct SageContext {
    config: Config,
    cache: MetadataCache,
    hasher: Hasher,
    fetcher: Box<dyn MetadataFetcher>,
}

impl SageContext {
    /// Build the context with the real registry client and load the cache.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be created.
    pub fn init(config: Config) -> Result<Self, FetchError> {
        let fetcher = CivitaiClient::new(&config.registry)?;
        Ok(Self::with_fetcher(config, Box::new(fetcher)))
    }

    /// Build the context around any fetcher and load the cache.
    #[must_use]
    pub fn with_fetcher(config: Config, fetcher: Box<dyn MetadataFetcher>) -> Self {
        let layout = CacheLayout::new(&config.cache_dir);
        let backups = BackupManager::new(layout.backup_dir())
            .with_policy(config.backup.policy())
            .with_snapshots(config.backup.enabled);
        let mut cache = MetadataCache::with_backups(layout, backups);
        cache.load();
        log::debug!("Cache ready in {}", config.cache_dir.display());

        Self {
            config,
            cache,
            hasher: Hasher::new(),
            fetcher,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The cache.
    #[must_use]
    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// The cache, mutably.
    pub fn cache_mut(&mut self) -> &mut MetadataCache {
        &mut self.cache
    }

    /// The content hasher.
    #[must_use]
    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    /// Run the pull workflow for one file using the configured options.
    ///
    /// # Errors
    ///
    /// See [`pull_metadata`].
    pub fn pull(&mut self, path: &Path, force: bool) -> Result<PullResult, PullError> {
        let options = self.config.pull.options(force);
        pull_metadata(
            &mut self.cache,
            &self.hasher,
            self.fetcher.as_ref(),
            path,
            options,
        )
    }

    /// Hash uncached `files` in parallel ahead of a batch of pulls.
    ///
    /// Returns the files that could not be hashed.
    pub fn prime_hashes(&mut self, files: &[PathBuf]) -> Vec<(PathBuf, HashError)> {
        prime_hashes(&mut self.cache, &self.hasher, files)
    }
}
