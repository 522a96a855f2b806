//! Workspace configuration management.
//!
//! One [`WorkspaceConfig`] describes a synchronized folder: which playlist it
//! mirrors, the target audio format, how many parallel downloads to run, and
//! whether orphaned files are cleaned up. The core consumes the configuration
//! read-only; the orchestrator reacts to changes by forwarding them to the
//! pool.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fetch::extract_playlist_id;
use crate::pool::{DEFAULT_PARALLEL_DOWNLOADS, clamp_parallel_downloads};
use crate::track::AudioFormat;

/// Default maximum number of items fetched from the remote playlist.
pub const DEFAULT_FETCH_LIMIT: usize = 500;

/// File name the configuration is stored under inside the workspace.
pub const CONFIG_FILE_NAME: &str = "workspace.json";

const fn default_parallel_downloads() -> usize {
    DEFAULT_PARALLEL_DOWNLOADS
}

const fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

/// Configuration for one synchronized workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Display name of the workspace.
    pub name: String,
    /// Local directory holding the downloaded media.
    pub directory: PathBuf,
    /// Remote playlist URL as entered by the user.
    #[serde(default)]
    pub playlist_url: String,
    /// Playlist identifier derived from the URL.
    #[serde(default)]
    pub playlist_id: String,
    /// Target audio container format.
    #[serde(default)]
    pub target_format: AudioFormat,
    /// Number of parallel download workers.
    #[serde(default = "default_parallel_downloads")]
    pub parallel_downloads: usize,
    /// Whether files no longer matching any track are deleted.
    #[serde(default)]
    pub delete_unsynced: bool,
    /// Whether a sync starts automatically when the workspace loads.
    #[serde(default)]
    pub auto_sync: bool,
    /// Maximum number of playlist items fetched per sync.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

impl WorkspaceConfig {
    /// Create a configuration for a new workspace.
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            playlist_url: String::new(),
            playlist_id: String::new(),
            target_format: AudioFormat::default(),
            parallel_downloads: DEFAULT_PARALLEL_DOWNLOADS,
            delete_unsynced: false,
            auto_sync: false,
            fetch_limit: DEFAULT_FETCH_LIMIT,
        }
    }

    /// Set the playlist URL, deriving the playlist identifier from it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPlaylistUrl`] if no playlist ID can be
    /// extracted; the previous URL and ID are kept in that case.
    pub fn set_playlist_url(&mut self, url: &str) -> Result<()> {
        let playlist_id = extract_playlist_id(url)?;
        self.playlist_url = url.trim().to_string();
        self.playlist_id = playlist_id;
        info!("Workspace {} now mirrors playlist {}", self.name, self.playlist_id);
        Ok(())
    }

    /// Clamp out-of-range values in place.
    pub fn validate(&mut self) {
        self.parallel_downloads = clamp_parallel_downloads(self.parallel_downloads);
        if self.fetch_limit == 0 {
            self.fetch_limit = DEFAULT_FETCH_LIMIT;
        }
    }

    /// Path of the configuration file inside a workspace directory.
    #[must_use]
    pub fn file_path(directory: &Path) -> PathBuf {
        directory.join(CONFIG_FILE_NAME)
    }

    /// Load the configuration stored in a workspace directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(directory: &Path) -> Result<Self> {
        let path = Self::file_path(directory);
        let content = fs::read_to_string(&path).map_err(|e| Error::FileSystem {
            path: path.clone(),
            message: format!("Failed to read workspace config: {e}"),
        })?;
        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse workspace config: {e}")))?;
        config.validate();
        debug!("Loaded workspace config from {}", path.display());
        Ok(config)
    }

    /// Save the configuration into the workspace directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save(&self) -> Result<()> {
        if !self.directory.exists() {
            fs::create_dir_all(&self.directory).map_err(|e| Error::FileSystem {
                path: self.directory.clone(),
                message: format!("Failed to create workspace directory: {e}"),
            })?;
        }
        let path = Self::file_path(&self.directory);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).map_err(|e| Error::FileSystem {
            path: path.clone(),
            message: format!("Failed to write workspace config: {e}"),
        })?;
        debug!("Saved workspace config to {}", path.display());
        Ok(())
    }
}

/// Default parent directory for new workspaces.
#[must_use]
pub fn default_workspace_directory() -> PathBuf {
    dirs::audio_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunesync")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MAX_PARALLEL_DOWNLOADS;
    use tempfile::TempDir;

    #[test]
    fn test_new_config_defaults() {
        let config = WorkspaceConfig::new("Road Trip", "/music/roadtrip");
        assert_eq!(config.target_format, AudioFormat::Mp3);
        assert_eq!(config.parallel_downloads, DEFAULT_PARALLEL_DOWNLOADS);
        assert!(!config.delete_unsynced);
        assert!(config.playlist_id.is_empty());
    }

    #[test]
    fn test_set_playlist_url_derives_id() {
        let mut config = WorkspaceConfig::new("Test", "/music/test");
        config
            .set_playlist_url("https://www.youtube.com/playlist?list=PLabc123")
            .unwrap();
        assert_eq!(config.playlist_id, "PLabc123");
    }

    #[test]
    fn test_set_playlist_url_keeps_previous_on_error() {
        let mut config = WorkspaceConfig::new("Test", "/music/test");
        config
            .set_playlist_url("https://www.youtube.com/playlist?list=PLabc123")
            .unwrap();

        assert!(config.set_playlist_url("https://example.com/nope").is_err());
        assert_eq!(config.playlist_id, "PLabc123");
    }

    #[test]
    fn test_validate_clamps_values() {
        let mut config = WorkspaceConfig::new("Test", "/music/test");
        config.parallel_downloads = 10_000;
        config.fetch_limit = 0;
        config.validate();
        assert_eq!(config.parallel_downloads, MAX_PARALLEL_DOWNLOADS);
        assert_eq!(config.fetch_limit, DEFAULT_FETCH_LIMIT);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut config = WorkspaceConfig::new("Roundtrip", dir.path());
        config
            .set_playlist_url("https://www.youtube.com/playlist?list=PLxyz789")
            .unwrap();
        config.target_format = AudioFormat::M4a;
        config.delete_unsynced = true;
        config.save().unwrap();

        let loaded = WorkspaceConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_config_fails() {
        let dir = TempDir::new().unwrap();
        assert!(WorkspaceConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_load_applies_defaults_for_missing_fields() {
        let dir = TempDir::new().unwrap();
        let json = format!(
            r#"{{"name":"Sparse","directory":{:?}}}"#,
            dir.path().to_string_lossy()
        );
        fs::write(WorkspaceConfig::file_path(dir.path()), json).unwrap();

        let loaded = WorkspaceConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.parallel_downloads, DEFAULT_PARALLEL_DOWNLOADS);
        assert_eq!(loaded.fetch_limit, DEFAULT_FETCH_LIMIT);
        assert_eq!(loaded.target_format, AudioFormat::Mp3);
    }

    #[test]
    fn test_default_workspace_directory_not_empty() {
        let dir = default_workspace_directory();
        assert!(!dir.as_os_str().is_empty());
        assert!(dir.to_string_lossy().contains("tunesync"));
    }
}
