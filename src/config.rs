//! Application configuration management.
//!
//! Settings are merged from plain, immutable layers in a fixed order, later
//! layers overriding earlier ones:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. User settings file (`settings.json` or `settings.toml`)
//! 3. User override file (`settings.override.json` or `.toml`)
//! 4. Environment variables prefixed `SAGECACHE_` (`__` separates nested keys,
//!    e.g. `SAGECACHE_REGISTRY__TIMEOUT_SECS=10`)
//!
//! The file format is chosen by extension. Missing files are skipped.

use crate::backup::RetentionPolicy;
use crate::workflow::{PullOptions, Staleness};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Json, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SAGECACHE_";

/// Backup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Take snapshots on load and save.
    pub enabled: bool,
    /// Always keep this many newest distinct snapshots.
    pub min_count: usize,
    /// Keep one snapshot per day for this many days beyond `min_count`.
    pub min_days: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            enabled: true,
            min_count: policy.min_count,
            min_days: policy.min_days,
        }
    }
}

impl BackupConfig {
    /// Retention policy these settings describe.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            min_count: self.min_count,
            min_days: self.min_days,
        }
    }
}

/// Model registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// API root, without trailing slash.
    pub base_url: String,
    /// Optional API key, sent as a bearer token.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Also ask whether a newer model version exists.
    pub check_updates: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://civitai.com/api/v1".to_string(),
            api_key: None,
            timeout_secs: 30,
            check_updates: true,
        }
    }
}

/// Pull workflow settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    /// When a cached record counts as stale.
    pub staleness: Staleness,
    /// Stamp `lastUsed` on every pull.
    pub update_last_used: bool,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            staleness: Staleness::default(),
            update_last_used: true,
        }
    }
}

impl PullConfig {
    /// Pull options with `force` as given.
    #[must_use]
    pub fn options(&self, force: bool) -> PullOptions {
        PullOptions {
            force,
            update_last_used: self.update_last_used,
            staleness: self.staleness,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the cache documents and `backup/`.
    pub cache_dir: PathBuf,
    /// Backup settings.
    pub backup: BackupConfig,
    /// Registry settings.
    pub registry: RegistryConfig,
    /// Pull workflow settings.
    pub pull: PullConfig,
    /// File extensions treated as model files when pulling a directory.
    pub model_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            backup: BackupConfig::default(),
            registry: RegistryConfig::default(),
            pull: PullConfig::default(),
            model_extensions: ["safetensors", "ckpt", "pt", "pth", "bin", "gguf", "sft"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Load from the default platform-specific locations.
    ///
    /// Never fails: an unusable layer is logged and defaults are returned.
    pub fn load() -> Self {
        let (user, overrides) = match project_dirs() {
            Some(dirs) => (
                Some(dirs.config_dir().join("settings.json")),
                Some(dirs.config_dir().join("settings.override.json")),
            ),
            None => (None, None),
        };
        Self::load_from(user.as_deref(), overrides.as_deref())
    }

    /// Load with explicit user and override files.
    pub fn load_from(user: Option<&Path>, overrides: Option<&Path>) -> Self {
        match Self::figment(user, overrides).extract() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Failed to load config, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// The layered figment, exposed so callers can add layers (e.g. CLI flags).
    #[must_use]
    pub fn figment(user: Option<&Path>, overrides: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        for path in [user, overrides].into_iter().flatten() {
            figment = merge_file(figment, path);
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    if !path.exists() {
        return figment;
    }
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    if is_toml {
        figment.merge(Toml::file(path))
    } else {
        figment.merge(Json::file(path))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "sagecache", "sagecache")
}

fn default_cache_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".sagecache"))
}
