//! Model components and their provenance.
//!
//! A generation pipeline loads up to four kinds of model files. Each kind is
//! a fixed record, and [`ModelComponent`] tags which one it is. The
//! serialized form carries an explicit `"kind"` field:
//!
//! ```json
//! {"kind": "unet", "path": "/models/flux.safetensors", "hash": "…", "weight_dtype": "fp8_e4m3fn"}
//! ```
//!
//! Provenance strings follow the common `Model hash: …, Model: …` image
//! metadata convention, using the 10-character short hash.

use crate::cache::MetadataCache;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Length of the short hash shown in provenance strings.
pub const SHORT_HASH_LEN: usize = 10;

/// Discriminant of [`ModelComponent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Full checkpoint (UNet + CLIP + VAE in one file)
    Checkpoint,
    /// Standalone diffusion model
    Unet,
    /// Text encoder(s)
    Clip,
    /// Autoencoder
    Vae,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Checkpoint => "checkpoint",
            Self::Unet => "unet",
            Self::Clip => "clip",
            Self::Vae => "vae",
        };
        f.write_str(name)
    }
}

/// A checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub path: PathBuf,
    pub hash: String,
}

/// A standalone diffusion model with its load precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnetInfo {
    pub path: PathBuf,
    pub hash: String,
    #[serde(default = "default_weight_dtype")]
    pub weight_dtype: String,
}

/// One or more text encoders loaded together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipInfo {
    pub paths: Vec<PathBuf>,
    pub hashes: Vec<String>,
    #[serde(default)]
    pub clip_type: String,
}

/// An autoencoder file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaeInfo {
    pub path: PathBuf,
    pub hash: String,
}

fn default_weight_dtype() -> String {
    "default".to_string()
}

/// A loaded model component, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelComponent {
    Checkpoint(CheckpointInfo),
    Unet(UnetInfo),
    Clip(ClipInfo),
    Vae(VaeInfo),
}

impl ModelComponent {
    /// Build a single-file component of `kind` from the cache.
    ///
    /// Returns `None` for [`ComponentKind::Clip`] with no paths, or when the
    /// cache has no hash for a path.
    #[must_use]
    pub fn from_cache(kind: ComponentKind, files: &[PathBuf], cache: &MetadataCache) -> Option<Self> {
        let lookup = |p: &PathBuf| {
            cache
                .hash_for_path(&paths::cache_key(p))
                .map(str::to_string)
        };
        let first = files.first()?;

        Some(match kind {
            ComponentKind::Checkpoint => Self::Checkpoint(CheckpointInfo {
                path: first.clone(),
                hash: lookup(first)?,
            }),
            ComponentKind::Unet => Self::Unet(UnetInfo {
                path: first.clone(),
                hash: lookup(first)?,
                weight_dtype: default_weight_dtype(),
            }),
            ComponentKind::Clip => Self::Clip(ClipInfo {
                paths: files.to_vec(),
                hashes: files.iter().map(lookup).collect::<Option<Vec<_>>>()?,
                clip_type: String::new(),
            }),
            ComponentKind::Vae => Self::Vae(VaeInfo {
                path: first.clone(),
                hash: lookup(first)?,
            }),
        })
    }

    /// Which kind of component this is.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Checkpoint(_) => ComponentKind::Checkpoint,
            Self::Unet(_) => ComponentKind::Unet,
            Self::Clip(_) => ComponentKind::Clip,
            Self::Vae(_) => ComponentKind::Vae,
        }
    }

    /// Paths of every file in the component.
    #[must_use]
    pub fn paths(&self) -> Vec<&PathBuf> {
        match self {
            Self::Checkpoint(c) => vec![&c.path],
            Self::Unet(u) => vec![&u.path],
            Self::Clip(c) => c.paths.iter().collect(),
            Self::Vae(v) => vec![&v.path],
        }
    }

    /// Content hashes of every file in the component.
    #[must_use]
    pub fn hashes(&self) -> Vec<&str> {
        match self {
            Self::Checkpoint(c) => vec![c.hash.as_str()],
            Self::Unet(u) => vec![u.hash.as_str()],
            Self::Clip(c) => c.hashes.iter().map(String::as_str).collect(),
            Self::Vae(v) => vec![v.hash.as_str()],
        }
    }

    /// Display name: the registry model name if known, else the file stem.
    #[must_use]
    pub fn display_name(&self, cache: &MetadataCache) -> String {
        let names: Vec<String> = self
            .paths()
            .into_iter()
            .zip(self.hashes())
            .map(|(path, hash)| {
                cache
                    .by_hash(hash)
                    .model_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| paths::file_stem(&path.to_string_lossy()).to_string())
            })
            .collect();
        names.join(", ")
    }

    /// `Model hash: …, Model: …` style provenance line.
    #[must_use]
    pub fn provenance(&self, cache: &MetadataCache) -> String {
        let label = match self.kind() {
            ComponentKind::Checkpoint | ComponentKind::Unet => "Model",
            ComponentKind::Clip => "Clip",
            ComponentKind::Vae => "VAE",
        };
        let short: Vec<&str> = self.hashes().into_iter().map(short_hash).collect();
        format!(
            "{label} hash: {}, {label}: {}",
            short.join(", "),
            self.display_name(cache)
        )
    }
}

/// First [`SHORT_HASH_LEN`] characters of a hash.
#[must_use]
pub fn short_hash(hash: &str) -> &str {
    hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}
