use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Failure taxonomy for mirror operations.
///
/// Kinds bucket the variants for the caller: invalid input and local/upstream
/// absence are surfaced as-is and never retried; transport and storage
/// failures are retryable; everything else is internal.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("package name must be provided")]
    MissingName,

    #[error("package version must be provided")]
    MissingVersion,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("package {name} not found in registry")]
    PackageNotFound { name: String },

    #[error("version {version} of {name} not found in registry")]
    VersionNotFound {
        name: String,
        version: String,
        /// Versions the registry does know, for the caller's diagnostics.
        known: Vec<String>,
    },

    #[error("package {name} is not installed")]
    PackageNotInstalled { name: String },

    #[error("version {version} of {name} is not installed")]
    VersionNotInstalled { name: String, version: String },

    #[error("component {path} not found")]
    ComponentNotFound { path: String },

    #[error("path {path} escapes the storage root")]
    PathEscapesRoot { path: String },

    #[error("registry request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("registry returned an unusable response for {url}: {reason}")]
    UpstreamDecode { url: String, reason: String },

    #[error("download and extract failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("metadata index failure: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("metadata index inconsistency: {0}")]
    IndexInconsistent(String),

    #[error("storage i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Transport,
    Storage,
    Internal,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingName | Self::MissingVersion | Self::Config(_) => ErrorKind::InvalidInput,
            Self::PackageNotFound { .. }
            | Self::VersionNotFound { .. }
            | Self::PackageNotInstalled { .. }
            | Self::VersionNotInstalled { .. }
            | Self::ComponentNotFound { .. }
            | Self::PathEscapesRoot { .. } => ErrorKind::NotFound,
            Self::Transport(_) | Self::UpstreamDecode { .. } => ErrorKind::Transport,
            Self::Fetch { .. } => ErrorKind::Storage,
            Self::Index(_) | Self::IndexInconsistent(_) | Self::Io { .. } => ErrorKind::Internal,
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Storage)
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
