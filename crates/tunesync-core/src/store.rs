//! Workspace persistence collaborator.
//!
//! The core persists the tracked item set after every registry mutation
//! through the [`WorkspaceStore`] trait; the storage mechanism is opaque.
//! [`JsonWorkspaceStore`] is the bundled implementation, writing a JSON file
//! next to the media.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::track::{DownloadState, Track, TrackRegistry};

/// File name the item set is stored under inside the workspace.
pub const PLAYLIST_FILE_NAME: &str = "playlist.json";

/// Persisted view of the registry plus sync bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Tracks in registry order.
    pub items: Vec<Track>,
    /// Unix timestamp (seconds) of the last completed sync.
    pub last_sync: Option<u64>,
}

impl RegistrySnapshot {
    /// Capture the current registry contents.
    #[must_use]
    pub fn capture(registry: &TrackRegistry, last_sync: Option<u64>) -> Self {
        Self {
            items: registry.snapshot(),
            last_sync,
        }
    }

    /// Rebuild a registry from persisted items.
    ///
    /// Active states (`Queued`, `Downloading`, `Converting`) cannot survive a
    /// restart; they are normalized back to `NotDownloaded`.
    #[must_use]
    pub fn into_registry(self) -> TrackRegistry {
        let mut registry = TrackRegistry::new();
        for mut track in self.items {
            if track.state.is_active() {
                track.state = DownloadState::NotDownloaded;
            }
            registry.push_back(track);
        }
        registry.reindex();
        registry
    }
}

/// Persistence boundary for the tracked item set.
#[cfg_attr(test, mockall::automock)]
pub trait WorkspaceStore: Send + Sync {
    /// Persist a registry snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()>;

    /// Load the last persisted snapshot; an empty snapshot if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data exists but cannot be read or parsed.
    fn load(&self) -> Result<RegistrySnapshot>;
}

/// JSON-file-backed store inside the workspace directory.
#[derive(Debug, Clone)]
pub struct JsonWorkspaceStore {
    path: PathBuf,
}

impl JsonWorkspaceStore {
    /// Create a store for the given workspace directory.
    #[must_use]
    pub fn new(workspace_dir: &Path) -> Self {
        Self {
            path: workspace_dir.join(PLAYLIST_FILE_NAME),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkspaceStore for JsonWorkspaceStore {
    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| Error::FileSystem {
                path: parent.to_path_buf(),
                message: format!("Failed to create workspace directory: {e}"),
            })?;
        }
        let content = serde_json::to_string_pretty(snapshot)?;
        fs::write(&self.path, content).map_err(|e| Error::FileSystem {
            path: self.path.clone(),
            message: format!("Failed to write item set: {e}"),
        })?;
        debug!("Persisted {} track(s) to {}", snapshot.items.len(), self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<RegistrySnapshot> {
        if !self.path.exists() {
            return Ok(RegistrySnapshot::default());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| Error::FileSystem {
            path: self.path.clone(),
            message: format!("Failed to read item set: {e}"),
        })?;
        let snapshot = serde_json::from_str(&content)?;
        Ok(snapshot)
    }
}
