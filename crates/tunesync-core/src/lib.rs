//! Tunesync Core Library
//!
//! This crate keeps a local media folder synchronized with a remote playlist:
//! - Playlist diffing between the tracked item set and a fresh remote snapshot
//! - A bounded-concurrency download/convert worker pool with cooperative
//!   cancellation
//! - Filesystem reconciliation of out-of-band changes (files added, removed
//!   or renamed by something other than the engine)
//! - A sync orchestrator composing fetch, diff, admission, and aggregation
//!
//! The remote fetch, the media download/transcode, and persistence are
//! collaborator boundaries expressed as traits; presentation layers consume
//! the core through channel subscriptions instead of binding to its types.

pub mod cleanup;
pub mod config;
pub mod diff;
pub mod download;
pub mod error;
pub mod fetch;
pub mod pool;
pub mod reconciler;
pub mod store;
pub mod sync;
pub mod track;
pub mod watcher;

pub use cleanup::{CleanupResult, cleanup_workspace};
pub use config::{
    CONFIG_FILE_NAME, DEFAULT_FETCH_LIMIT, WorkspaceConfig, default_workspace_directory,
};
pub use diff::{PlaylistDiff, diff};
pub use download::{CancelFlag, TrackDownloader, media_file_name};
pub use error::{Error, Result};
pub use fetch::{
    FetchOutcome, FetchProgress, PlaylistFetcher, PlaylistItem, extract_playlist_id,
    sanitize_filename,
};
pub use pool::{
    Admission, DEFAULT_PARALLEL_DOWNLOADS, DownloadPool, MAX_PARALLEL_DOWNLOADS,
    MIN_PARALLEL_DOWNLOADS, PoolEvent, RejectReason, clamp_parallel_downloads,
};
pub use reconciler::{Reconciler, ReconcilerNotice, scan_workspace};
pub use store::{JsonWorkspaceStore, PLAYLIST_FILE_NAME, RegistrySnapshot, WorkspaceStore};
pub use sync::{SyncEvent, SyncOrchestrator, SyncReport};
pub use track::{
    AdmitReject, AudioFormat, DownloadState, SharedRegistry, Track, TrackEvent, TrackId,
    TrackRegistry, shared,
};
pub use watcher::{FsChange, start_watcher};
