use std::path::Path;

use error_stack::Report;
use thiserror::Error;

// Error message prefixes
const MSG_FAILED_TO_PREFIX: &str = "Failed to";
const MSG_CANNOT_PREFIX: &str = "Cannot";
const MSG_INVALID_PREFIX: &str = "Invalid";
const MSG_MISSING_PREFIX: &str = "Missing";

/// Result type for the repair pipeline
pub type Result<T> = std::result::Result<T, Report<Error>>;

// Error categories surfaced by the pipeline and its stages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Mutability analysis failed: {0}")]
    Analysis(String),

    #[error("Another repair attempt is in progress: {0}")]
    AttemptInProgress(String),

    #[error("Backup invariant violated: {0}")]
    BackupCorruption(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No build manifest found: {0}")]
    ManifestNotFound(String),

    #[error("Lifetime repair unconfirmed: {0}")]
    RepairUnconfirmed(String),

    #[error("Tool invocation failed: {0}")]
    ToolInvocation(String),
}

impl Error {
    /// Create a "Failed to X" error
    pub fn failed_to(action: &str, details: impl std::fmt::Display) -> Self {
        Self::FileOperation(format!("{MSG_FAILED_TO_PREFIX} {action}: {details}"))
    }

    /// Create a "Cannot X" error
    pub fn cannot(action: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidArgument(format!("{MSG_CANNOT_PREFIX} {action}: {reason}"))
    }

    /// Create an "Invalid X" error
    pub fn invalid(what: &str, details: impl std::fmt::Display) -> Self {
        Self::InvalidArgument(format!("{MSG_INVALID_PREFIX} {what}: {details}"))
    }

    /// Create a "Missing X" error
    pub fn missing(what: &str) -> Self {
        Self::InvalidArgument(format!("{MSG_MISSING_PREFIX} {what}"))
    }

    /// Create error for IO operations
    pub fn io_failed(operation: &str, path: &Path, error: impl std::fmt::Display) -> Self {
        Self::FileOperation(format!(
            "{MSG_FAILED_TO_PREFIX} {operation} {}: {error}",
            path.display()
        ))
    }

    /// Create error for process operations
    pub fn process_failed(operation: &str, process: &str, error: impl std::fmt::Display) -> Self {
        Self::ToolInvocation(format!(
            "{MSG_FAILED_TO_PREFIX} {operation} process '{process}': {error}"
        ))
    }

    /// Create error for analysis failures on a named function
    pub fn analysis_failed(function: &str, reason: impl std::fmt::Display) -> Self {
        Self::Analysis(format!("function `{function}`: {reason}"))
    }
}
