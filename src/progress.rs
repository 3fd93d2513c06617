//! Terminal progress for batch pulls.
//!
//! A batch pull has two phases: `hashing` (parallel, no per-file ticks) and
//! `pulling` (one tick per file). [`Progress`] draws an indicatif spinner for
//! the first and a bar for the second; [`ProgressCallback`] lets callers
//! swap in something else.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Receives batch progress updates.
pub trait ProgressCallback: Send + Sync {
    /// A phase with `total` items started. `total == 0` means unknown.
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Item `current` (1-based) of the running phase is `path`.
    fn on_progress(&self, current: usize, path: &str);

    /// The running phase finished.
    fn on_phase_end(&self, phase: &str);
}

/// indicatif progress reporter; draws nothing when quiet.
pub struct Progress {
    bar: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            quiet,
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }
        let pb = if total == 0 {
            let pb = ProgressBar::new_spinner();
            pb.set_style(Self::spinner_style());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(Self::bar_style());
            pb
        };
        pb.set_message(phase.to_string());
        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(pb);
        }
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }
        let msg = truncate_path(path, 30);
        self.with_bar(|pb| {
            pb.set_position(current as u64);
            pb.set_message(msg);
        });
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }
        let taken = self.bar.lock().ok().and_then(|mut guard| guard.take());
        if let Some(pb) = taken {
            pb.finish_and_clear();
            log::debug!("{} complete in {:.1?}", phase, pb.elapsed());
        }
    }
}

/// Shorten a path to its file name, then to its last `max_len` characters.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }
    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let count = file_name.chars().count();
    if count + 4 <= max_len {
        return format!(".../{file_name}");
    }
    let tail: String = file_name
        .chars()
        .skip(count.saturating_sub(max_len.saturating_sub(3)))
        .collect();
    format!("...{tail}")
}
