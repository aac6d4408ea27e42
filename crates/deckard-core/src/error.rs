//! Orchestrator error taxonomy following panic-free policy.
//!
//! Every variant is recoverable at the request boundary: it carries a short
//! user-facing summary (`summary()`), a detailed log (`Display`) and a stable
//! wire code (`code()`). Only `Storage` failures are fatal to the operation
//! that hit them, and even those never take the daemon down.

use thiserror::Error;

/// Errors that can occur in orchestrator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The session table is full and a new session was required.
    #[error(
        "For performance purposes, this application is currently limited to {max} \
         simultaneous sessions. You may want to retry in a few minutes."
    )]
    CapacityExceeded { max: usize },

    /// No free port although the session count invariant holds.
    #[error("no free port in {first}..{end} although a session slot was available; this is a bug")]
    PortExhausted { first: u16, end: u32 },

    /// The requested language names a catalog registered for another module.
    #[error("\"{language}\" does not exist: no such file was registered for the {module} module")]
    LanguageMismatch { language: String, module: String },

    /// The ingestion name does not carry the catalog extension.
    #[error("{name} is not a PO file")]
    NotACatalogFile { name: String },

    /// Every configured remote template failed.
    #[error("unable to retrieve {name}: {reason}")]
    DownloadFailure { name: String, reason: String },

    /// The declared (or streamed) remote size exceeds the configured cap.
    #[error("the \"{name}\" file is {size} bytes long and this app will not retrieve a file bigger than {max} bytes")]
    FileTooLarge { name: String, size: u64, max: u64 },

    /// The external catalog compiler exited unsuccessfully.
    #[error("{log}")]
    CompileFailure { log: String },

    /// A UI-definition path tried to escape the content root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The worker process could not be started.
    #[error("failed to launch worker: {0}")]
    Launch(String),

    /// Filesystem fault underneath an operation (disk full, permissions).
    #[error("storage error: {0}")]
    Storage(String),

    /// The registry actor is no longer running.
    #[error("registry channel closed")]
    ChannelClosed,
}

impl OrchestratorError {
    /// Creates a storage error from any displayable error.
    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        Self::Storage(err.to_string())
    }

    /// Short, user-facing summary of the failure.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "Too many users!",
            Self::PortExhausted { .. } => "Could not find a free port.",
            Self::LanguageMismatch { .. } => "Unknown language for this module",
            Self::NotACatalogFile { .. } => "This is not a PO file",
            Self::DownloadFailure { .. } => "Unable to retrieve the file",
            Self::FileTooLarge { .. } => "File too big",
            Self::CompileFailure { .. } => "Error while building the .mo",
            Self::InvalidPath(_) => "Invalid file path",
            Self::Launch(_) => "Could not start the runner",
            Self::Storage(_) => "Internal storage error",
            Self::ChannelClosed => "Service unavailable",
        }
    }

    /// Stable snake_case identifier used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::PortExhausted { .. } => "port_exhausted",
            Self::LanguageMismatch { .. } => "language_mismatch",
            Self::NotACatalogFile { .. } => "not_a_catalog_file",
            Self::DownloadFailure { .. } => "download_failure",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::CompileFailure { .. } => "compile_failure",
            Self::InvalidPath(_) => "invalid_path",
            Self::Launch(_) => "launch_failure",
            Self::Storage(_) => "storage",
            Self::ChannelClosed => "channel_closed",
        }
    }

    /// Internal consistency faults that should never reach a user.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::PortExhausted { .. } | Self::ChannelClosed)
    }
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
