//! Error types for Tunesync core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Tunesync core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Playlist URL could not be parsed into a playlist identifier.
    #[error("Invalid playlist URL: {0}")]
    InvalidPlaylistUrl(String),

    /// Remote playlist retrieval failed.
    #[error("Playlist fetch failed: {0}")]
    FetchFailed(String),

    /// A per-track download failed.
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// A per-track format conversion failed.
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    /// The operation was cancelled. Not a failure.
    #[error("Operation cancelled")]
    Cancelled,

    /// A sync cycle is already running for this workspace.
    #[error("Sync already in progress")]
    SyncInProgress,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File system operation failed.
    #[error("File system error at {path}: {message}")]
    FileSystem {
        /// Path where the error occurred.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error represents a cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FetchFailed("network unreachable".to_string());
        assert_eq!(err.to_string(), "Playlist fetch failed: network unreachable");
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::SyncInProgress.is_cancelled());
    }

    #[test]
    fn test_file_system_error_display() {
        let err = Error::FileSystem {
            path: PathBuf::from("/workspace/song.mp3"),
            message: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/workspace/song.mp3"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
