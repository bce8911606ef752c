//! Error taxonomy shared by every pipeline stage.
//!
//! Per-file failures ([`HarnessError::Parse`], [`HarnessError::Storage`]) are
//! caught at the watcher boundary and turned into `ImportFailed` events.
//! [`HarnessError::Watch`] is fatal to the watcher that raised it.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the core and the pipeline crate.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Malformed or incomplete report content.
    #[error("Failed to parse report {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// Write errors, zero rows affected, or a missing generated key.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Native filesystem monitor setup or teardown failed.
    #[error("Watch error: {0}")]
    Watch(String),

    /// A folder was requested without create permission and does not exist.
    #[error("Folder not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Rejected at the call boundary before any work was done.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn watch(msg: impl Into<String>) -> Self {
        Self::Watch(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Short classification label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Storage(_) => "storage",
            Self::Watch(_) => "watch",
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Io(_) => "io",
        }
    }
}
