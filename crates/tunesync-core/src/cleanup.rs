//! Workspace folder cleanup.
//!
//! Removes orphaned audio files left behind after tracks drop out of the
//! playlist. The pass is best-effort: individual delete failures are logged
//! and skipped, never aborting cleanup for the remaining files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::track::AudioFormat;

/// Result of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    /// Number of files deleted.
    pub files_deleted: usize,
    /// Total size of the deleted files.
    pub bytes_freed: u64,
    /// Files that could not be deleted.
    pub failures: Vec<PathBuf>,
}

impl CleanupResult {
    /// Human-readable one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Cleanup deleted {} file(s) ({} bytes), {} failure(s)",
            self.files_deleted,
            self.bytes_freed,
            self.failures.len()
        )
    }
}

/// Delete audio files whose name stem matches no expected stem.
///
/// Only direct children of the workspace directory carrying a supported audio
/// extension are considered; other files and subdirectories are left alone.
/// `expected_stems` are the sanitized titles of the currently tracked items.
#[must_use]
pub fn cleanup_workspace(dir: &Path, expected_stems: &HashSet<String>) -> CleanupResult {
    let mut result = CleanupResult::default();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !AudioFormat::is_supported_extension(extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if expected_stems.contains(stem) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Cleanup deleted {}", path.display());
                result.files_deleted += 1;
                result.bytes_freed += size;
            }
            Err(e) => {
                warn!("Cleanup could not delete {}: {e}", path.display());
                result.failures.push(path.to_path_buf());
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn stems(values: &[&str]) -> HashSet<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_deletes_orphaned_audio_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Tracked.mp3"), "audio").unwrap();
        fs::write(dir.path().join("Orphan.mp3"), "audio").unwrap();
        fs::write(dir.path().join("Orphan2.m4a"), "audio").unwrap();

        let result = cleanup_workspace(dir.path(), &stems(&["Tracked"]));

        assert_eq!(result.files_deleted, 2);
        assert!(result.failures.is_empty());
        assert!(dir.path().join("Tracked.mp3").exists());
        assert!(!dir.path().join("Orphan.mp3").exists());
        assert!(!dir.path().join("Orphan2.m4a").exists());
    }

    #[test]
    fn test_leaves_non_audio_files_alone() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "text").unwrap();
        fs::write(dir.path().join("cover.jpg"), "image").unwrap();

        let result = cleanup_workspace(dir.path(), &stems(&[]));

        assert_eq!(result.files_deleted, 0);
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("cover.jpg").exists());
    }

    #[test]
    fn test_does_not_descend_into_subdirectories() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("archive");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("Old.mp3"), "audio").unwrap();

        let result = cleanup_workspace(dir.path(), &stems(&[]));

        assert_eq!(result.files_deleted, 0);
        assert!(sub.join("Old.mp3").exists());
    }

    #[test]
    fn test_counts_bytes_freed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Orphan.mp3"), "12345678").unwrap();

        let result = cleanup_workspace(dir.path(), &stems(&[]));

        assert_eq!(result.files_deleted, 1);
        assert_eq!(result.bytes_freed, 8);
    }

    #[test]
    fn test_empty_directory_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let result = cleanup_workspace(dir.path(), &stems(&["Anything"]));
        assert_eq!(result, CleanupResult::default());
    }
}
