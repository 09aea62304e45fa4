//! Errors that abort a backup cycle.

use std::path::PathBuf;

use thiserror::Error;

use crate::process::DependencyError;

/// Why a cycle stopped before finishing.
#[derive(Debug, Error)]
pub enum BackupError {
    /// A required setting is missing or unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required external tool could not be made available.
    #[error("dependency error: {0}")]
    Dependency(#[from] DependencyError),

    /// The dump tool failed.
    #[error("snapshot failed: {0}")]
    Producer(String),

    /// Compression or encryption failed.
    #[error("archive failed: {0}")]
    Archive(String),

    /// Filesystem access outside the external tools.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short stage name for logs and the cycle history.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Configuration(_) => "configuration",
            BackupError::Dependency(_) => "dependency",
            BackupError::Producer(_) => "producer",
            BackupError::Archive(_) => "archive",
            BackupError::Io { .. } => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
