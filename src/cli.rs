//! Command-line interface definitions.
//!
//! # Example
//!
//! ```bash
//! # Hash and look up every model under a directory
//! sagecache pull ~/models/checkpoints
//!
//! # Show the cached record, or a provenance line for a component
//! sagecache show ~/models/vae/ae.safetensors
//! sagecache show --kind vae ~/models/vae/ae.safetensors
//!
//! # Find and drop entries whose files are gone
//! sagecache ghosts --remove
//! ```

use crate::model::ComponentKind;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Content-hash keyed metadata cache for model files.
#[derive(Debug, Parser)]
#[command(name = "sagecache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Settings file, used instead of the platform default
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Cache directory, overriding the configured one
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Print errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Hash files and pull their registry metadata into the cache
    Pull(PullArgs),
    /// Print the cached record for a file
    Show(ShowArgs),
    /// Stamp files as used now
    Touch(PathsArgs),
    /// Remove files from the cache
    Forget(PathsArgs),
    /// List cache entries whose files no longer exist
    Ghosts(GhostsArgs),
    /// List files with identical content, or versions of the same model
    Duplicates(DuplicatesArgs),
    /// Apply the retention policy to the backup directory
    Prune,
    /// Print cache statistics
    Stats,
}

#[derive(Debug, Args)]
pub struct PullArgs {
    /// Model files or directories to scan
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Query the registry even for records that are already complete
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Model file(s); a clip component may list several
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Print a provenance line for this component kind instead of the record
    #[arg(short, long, value_enum)]
    pub kind: Option<ComponentKind>,
}

#[derive(Debug, Args)]
pub struct PathsArgs {
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct GhostsArgs {
    /// Remove the ghost entries from the cache
    #[arg(long)]
    pub remove: bool,
}

#[derive(Debug, Args)]
pub struct DuplicatesArgs {
    /// Group by registry model id instead of by content
    #[arg(long)]
    pub models: bool,
}
