//! Exit codes and structured error output for the command-line tool.

use serde::Serialize;

/// Process exit codes.
///
/// - 0: Success
/// - 1: General error (bad arguments, unusable configuration)
/// - 2: Nothing found (e.g. no ghosts, no duplicates, no record)
/// - 3: Partial success (some files in a batch could not be processed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed normally.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// Completed normally but there was nothing to report.
    NothingFound = 2,
    /// Completed, but some items failed.
    PartialSuccess = 3,
}

impl ExitCode {
    /// Numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "SC000",
            Self::GeneralError => "SC001",
            Self::NothingFound => "SC002",
            Self::PartialSuccess => "SC003",
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        // All variants fit in a u8.
        Self::from(code as u8)
    }
}

/// Error report printed with `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// e.g. "SC001"
    pub code: String,
    pub exit_code: i32,
    /// Full error chain, outermost first
    pub message: String,
}

impl StructuredError {
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
        }
    }
}
