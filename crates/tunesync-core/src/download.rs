//! Download/convert collaborator boundary.
//!
//! The actual media fetch and transcode are opaque to the core: the
//! [`TrackDownloader`] trait exposes them as cancellable operations with a
//! success/failure/cancel outcome. The worker pool drives the trait and owns
//! the resulting state transitions.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::fetch::{PlaylistItem, sanitize_filename};
use crate::track::AudioFormat;

/// Cloneable cooperative cancellation flag.
///
/// Shared between the pool and its tasks; collaborators must observe it with
/// bounded latency and unwind without leaving partial artifacts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a fresh, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Expected workspace file name for a track title in the given format.
#[must_use]
pub fn media_file_name(title: &str, format: AudioFormat) -> String {
    format!("{}.{}", sanitize_filename(title), format.extension())
}

/// Download and conversion operations for a single track.
///
/// Contract:
/// - `download` places the media at `dest_dir/<sanitized title>.<ext>` where
///   `ext` matches the returned container format, which may differ from
///   `target` when the source only offers another container.
/// - `convert` transcodes a file to the target container, removes the source
///   file, and returns the new path.
/// - Both operations observe `cancel` promptly, return
///   [`crate::error::Error::Cancelled`] when interrupted, and must stage
///   output through a temporary file so no partial artifact ever masquerades
///   as a completed download.
#[cfg_attr(test, mockall::automock)]
pub trait TrackDownloader: Send + Sync {
    /// Download one track into the workspace directory.
    ///
    /// Returns the container format actually obtained.
    ///
    /// # Errors
    ///
    /// Returns an error on network or media failure, or `Cancelled`.
    fn download(
        &self,
        item: &PlaylistItem,
        dest_dir: &Path,
        target: AudioFormat,
        cancel: &CancelFlag,
    ) -> Result<AudioFormat>;

    /// Convert a downloaded file to the target container format.
    ///
    /// # Errors
    ///
    /// Returns an error on transcode failure, or `Cancelled`.
    fn convert(&self, path: &Path, target: AudioFormat, cancel: &CancelFlag) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());

        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_media_file_name_sanitizes_title() {
        assert_eq!(
            media_file_name("Song: Live?", AudioFormat::Mp3),
            "Song_ Live_.mp3"
        );
        assert_eq!(media_file_name("Plain", AudioFormat::M4a), "Plain.m4a");
    }
}
