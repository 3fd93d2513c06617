//! sagecache - content-hash keyed metadata cache for model files.
//!
//! Model files are identified by the SHA-256 of their bytes. The cache keeps
//! two JSON documents, path → hash and hash → info record, written atomically
//! with rotating backups. Info records are filled from a model registry.
//!
//! Library users create one [`context::SageContext`] and work through it;
//! [`run_app`] is the command-line front end.

pub mod backup;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod fetcher;
pub mod hasher;
pub mod logging;
pub mod maintenance;
pub mod model;
pub mod paths;
pub mod progress;
pub mod store;
pub mod workflow;

use anyhow::Context;
use cli::{Cli, Commands, DuplicatesArgs, PullArgs, ShowArgs};
use config::Config;
use context::SageContext;
use error::ExitCode;
use model::{short_hash, ModelComponent};
use progress::{Progress, ProgressCallback};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use workflow::PullStatus;
use yansi::Paint;

/// Run the command described by `cli`.
///
/// # Errors
///
/// Returns an error for unusable configuration or an unrecoverable cache
/// failure. Per-file problems are reported and reflected in the exit code.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);
    if cli.no_color {
        yansi::disable();
    }

    let config = load_config(&cli)?;
    let mut ctx = SageContext::init(config).context("failed to create registry client")?;

    match cli.command {
        Commands::Pull(args) => cmd_pull(&mut ctx, &args, cli.quiet),
        Commands::Show(args) => cmd_show(&ctx, &args),
        Commands::Touch(args) => cmd_touch(&mut ctx, &args.paths),
        Commands::Forget(args) => cmd_forget(&mut ctx, &args.paths),
        Commands::Ghosts(args) => Ok(cmd_ghosts(&mut ctx, args.remove)),
        Commands::Duplicates(args) => Ok(cmd_duplicates(&ctx, &args)),
        Commands::Prune => cmd_prune(&ctx),
        Commands::Stats => cmd_stats(&ctx),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config = match &cli.config {
        Some(path) => {
            anyhow::ensure!(path.exists(), "config file not found: {}", path.display());
            Config::figment(Some(path), None)
                .extract::<Config>()
                .map_err(|e| anyhow::anyhow!("invalid config file {}: {}", path.display(), e))?
        }
        None => Config::load(),
    };
    Ok(match &cli.cache_dir {
        Some(dir) => Config {
            cache_dir: dir.clone(),
            ..config
        },
        None => config,
    })
}

fn cmd_pull(ctx: &mut SageContext, args: &PullArgs, quiet: bool) -> anyhow::Result<ExitCode> {
    let files = paths::collect_model_files(&args.paths, &ctx.config().model_extensions);
    if files.is_empty() {
        log::warn!("No model files found");
        return Ok(ExitCode::NothingFound);
    }

    let progress = Progress::new(quiet);
    progress.on_phase_start("hashing", 0);
    let unreadable = ctx.prime_hashes(&files);
    progress.on_phase_end("hashing");

    let mut errors = 0usize;
    for (file, e) in &unreadable {
        log::error!("{}: {}", file.display(), e);
        errors += 1;
    }
    let skip: HashSet<&PathBuf> = unreadable.iter().map(|(file, _)| file).collect();
    let pending: Vec<&PathBuf> = files.iter().filter(|f| !skip.contains(f)).collect();

    let mut lines = Vec::with_capacity(pending.len());
    progress.on_phase_start("pulling", pending.len());
    for (i, file) in pending.iter().enumerate() {
        progress.on_progress(i + 1, &file.to_string_lossy());
        match ctx.pull(file, args.force) {
            Ok(result) => {
                let label = match &result.status {
                    PullStatus::Fetched => "fetched".green().to_string(),
                    PullStatus::Cached => "cached".dim().to_string(),
                    PullStatus::Unavailable(e) if e.is_not_found() => {
                        "unknown".yellow().to_string()
                    }
                    PullStatus::Unavailable(_) => "offline".yellow().to_string(),
                };
                let name = result
                    .record
                    .model_name()
                    .unwrap_or_else(|| paths::display_name(&result.key))
                    .to_string();
                lines.push(format!("{} {} {}", label, short_hash(&result.hash), name));
            }
            Err(e) => {
                log::error!("{}: {}", file.display(), e);
                errors += 1;
            }
        }
    }
    progress.on_phase_end("pulling");

    if !quiet {
        for line in &lines {
            println!("{line}");
        }
    }
    Ok(if errors > 0 {
        ExitCode::PartialSuccess
    } else {
        ExitCode::Success
    })
}

fn cmd_show(ctx: &SageContext, args: &ShowArgs) -> anyhow::Result<ExitCode> {
    let cache = ctx.cache();
    if let Some(kind) = args.kind {
        return Ok(match ModelComponent::from_cache(kind, &args.paths, cache) {
            Some(component) => {
                println!("{}", component.provenance(cache));
                ExitCode::Success
            }
            None => {
                log::warn!("Not every file is in the cache; run `sagecache pull` first");
                ExitCode::NothingFound
            }
        });
    }

    let mut found = BTreeMap::new();
    for path in &args.paths {
        let key = paths::cache_key(path);
        let record = cache.by_path(&key);
        if record.is_empty() {
            log::warn!("{} is not in the cache", key);
        } else {
            found.insert(key, record);
        }
    }
    if found.is_empty() {
        return Ok(ExitCode::NothingFound);
    }

    let json = if found.len() == 1 && args.paths.len() == 1 {
        serde_json::to_string_pretty(&found.into_values().next())?
    } else {
        serde_json::to_string_pretty(&found)?
    };
    println!("{json}");
    Ok(ExitCode::Success)
}

fn cmd_touch(ctx: &mut SageContext, files: &[PathBuf]) -> anyhow::Result<ExitCode> {
    let cache = ctx.cache_mut();
    let mut touched = 0usize;
    for file in files {
        let key = paths::cache_key(file);
        if cache.update_last_used_by_path(&key) {
            touched += 1;
        } else {
            log::warn!("{} is not in the cache", key);
        }
    }
    if touched == 0 {
        return Ok(ExitCode::NothingFound);
    }
    anyhow::ensure!(!cache.save().failed(), "failed to save the cache");
    Ok(partial_exit(touched, files.len()))
}

fn cmd_forget(ctx: &mut SageContext, files: &[PathBuf]) -> anyhow::Result<ExitCode> {
    let cache = ctx.cache_mut();
    let mut removed = 0usize;
    for file in files {
        let key = paths::cache_key(file);
        match cache.remove_entry(&key) {
            Some(_) => removed += 1,
            None => log::warn!("{} is not in the cache", key),
        }
    }
    if removed == 0 {
        return Ok(ExitCode::NothingFound);
    }
    anyhow::ensure!(!cache.save().failed(), "failed to save the cache");
    log::info!("Removed {} entries", removed);
    Ok(partial_exit(removed, files.len()))
}

fn cmd_ghosts(ctx: &mut SageContext, remove: bool) -> ExitCode {
    let report = maintenance::scan_ghosts(ctx.cache_mut(), remove);
    if report.ghosts.is_empty() {
        log::info!("No ghost entries");
        return ExitCode::NothingFound;
    }
    for ghost in &report.ghosts {
        println!("{}", ghost.red());
    }
    if report.removed {
        log::info!("Removed {} ghost entries", report.ghosts.len());
    } else {
        log::info!("Run with --remove to drop them");
    }
    ExitCode::Success
}

fn cmd_duplicates(ctx: &SageContext, args: &DuplicatesArgs) -> ExitCode {
    let cache = ctx.cache();
    if args.models {
        let groups = maintenance::duplicate_models(cache);
        for (model_id, hashes) in &groups {
            println!("{}", format!("model {model_id}").bold());
            for hash in hashes {
                for path in cache.paths_for_hash(hash) {
                    println!("  {} {}", short_hash(hash).dim(), path);
                }
            }
        }
        return if groups.is_empty() {
            ExitCode::NothingFound
        } else {
            ExitCode::Success
        };
    }

    let groups = maintenance::duplicate_files(cache);
    for (hash, group) in &groups {
        println!("{}", short_hash(hash).bold());
        for path in group {
            println!("  {path}");
        }
    }
    if groups.is_empty() {
        ExitCode::NothingFound
    } else {
        ExitCode::Success
    }
}

fn cmd_prune(ctx: &SageContext) -> anyhow::Result<ExitCode> {
    let reports = ctx
        .cache()
        .prune_backups()
        .context("failed to prune backups")?;
    let deleted: usize = reports.iter().map(|r| r.deleted.len()).sum();
    let retained: usize = reports.iter().map(|r| r.retained.len()).sum();
    log::info!("Deleted {} backups, kept {}", deleted, retained);
    Ok(ExitCode::Success)
}

fn cmd_stats(ctx: &SageContext) -> anyhow::Result<ExitCode> {
    let stats = ctx.cache().stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(ExitCode::Success)
}

fn partial_exit(done: usize, requested: usize) -> ExitCode {
    if done < requested {
        ExitCode::PartialSuccess
    } else {
        ExitCode::Success
    }
}
