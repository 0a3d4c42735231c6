//! Engine error types

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`ObserverError`]
pub type Result<T> = std::result::Result<T, ObserverError>;

/// Exit code the Windows service controller reports for an unknown service
/// (`ERROR_SERVICE_DOES_NOT_EXIST`).
pub const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;

#[derive(Debug, Error)]
pub enum ObserverError {
    // ─────────────────────────────────────────────────────────────
    // Service control
    // ─────────────────────────────────────────────────────────────
    #[error("service '{service}' is not installed")]
    NotInstalled { service: String },

    #[error("service control failed with exit code {code}: {message}")]
    ServiceControl { message: String, code: i32 },

    #[error("unrecognized service control output: {line}")]
    Parse { line: String },

    // ─────────────────────────────────────────────────────────────
    // Processes and files
    // ─────────────────────────────────────────────────────────────
    #[error("failed to launch {}: {reason}", path.display())]
    ProcessLaunch { path: PathBuf, reason: String },

    #[error("cannot read log file {}: {reason}", path.display())]
    FileAccess { path: PathBuf, reason: String },

    #[error("failed to restart elevated: {reason}")]
    Elevation { reason: String },

    // ─────────────────────────────────────────────────────────────
    // Coordinator
    // ─────────────────────────────────────────────────────────────
    #[error("{action} is not available in the current state")]
    Rejected { action: &'static str },

    #[error("setting '{field}' is required for this operation")]
    MissingSetting { field: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ObserverError {
    pub fn not_installed(service: impl Into<String>) -> Self {
        Self::NotInstalled {
            service: service.into(),
        }
    }

    pub fn process_launch(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ProcessLaunch {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn file_access(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FileAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the service controller reported that the service does not exist
    pub fn is_not_installed(&self) -> bool {
        match self {
            Self::NotInstalled { .. } => true,
            Self::ServiceControl { code, .. } => *code == ERROR_SERVICE_DOES_NOT_EXIST,
            _ => false,
        }
    }

    /// Errors the operator can act on without restarting the observer
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Parse { .. })
    }
}

/// Render an error followed by its `source()` chain, one cause per line,
/// each prefixed with a growing arrow (`-> `, `--> `, ...).
pub fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut depth = 1;
    let mut source = err.source();

    while let Some(cause) = source {
        let _ = write!(out, "\n{}> {}", "-".repeat(depth), cause);
        depth += 1;
        source = cause.source();
    }

    out
}
