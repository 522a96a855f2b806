//! Filesystem reconciler.
//!
//! Applies externally observed workspace changes (files added, removed or
//! renamed by something other than the engine itself) to track state. Runs as
//! a dedicated task consuming the normalized watcher stream; every mutation
//! goes through the registry's guarded methods, so reconciliation never
//! fights an in-flight download — the pool is the sole authority while a
//! task is live.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::track::{AudioFormat, SharedRegistry, TrackEvent};
use crate::watcher::FsChange;

/// Notices surfaced by the reconciler to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilerNotice {
    /// An external change was applied to a track.
    Applied(TrackEvent),
    /// Watching failed; automatic reconciliation is disabled until the
    /// reconciler is restarted.
    Degraded {
        /// Backend error description.
        reason: String,
    },
}

/// One-shot reconciliation pass aligning track states with the files on disk.
///
/// Covers changes made while no watcher was running: used when a workspace
/// loads and before bulk admission. Only direct children of the workspace
/// directory are considered. Returns the number of tracks updated.
pub async fn scan_workspace(registry: &SharedRegistry, dir: &Path, target: AudioFormat) -> usize {
    let mut files: HashMap<String, HashSet<String>> = HashMap::new();
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
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        files
            .entry(stem.to_string())
            .or_default()
            .insert(extension.to_string());
    }

    let changed = registry.write().await.refresh_from_files(&files, target);
    if changed > 0 {
        info!("Workspace scan updated {changed} track state(s)");
    }
    changed
}

/// Consumes workspace file events and reconciles track state.
pub struct Reconciler {
    registry: SharedRegistry,
    target_format: AudioFormat,
    degraded: bool,
    notice_tx: mpsc::UnboundedSender<ReconcilerNotice>,
}

impl Reconciler {
    /// Spawn the reconciler over a normalized event stream.
    ///
    /// Returns the task handle and the notice stream. The task ends when the
    /// event stream closes.
    #[must_use]
    pub fn spawn(
        registry: SharedRegistry,
        target_format: AudioFormat,
        events: mpsc::UnboundedReceiver<FsChange>,
    ) -> (JoinHandle<()>, mpsc::UnboundedReceiver<ReconcilerNotice>) {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let reconciler = Self {
            registry,
            target_format,
            degraded: false,
            notice_tx,
        };
        let handle = tokio::spawn(reconciler.run(events));
        (handle, notice_rx)
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<FsChange>) {
        while let Some(change) = events.recv().await {
            if self.degraded {
                debug!("Reconciler degraded, dropping {change:?}");
                continue;
            }
            self.apply(change).await;
        }
        debug!("Watcher stream closed, reconciler stopping");
    }

    async fn apply(&mut self, change: FsChange) {
        let applied = match change {
            FsChange::Created { stem, extension } => {
                let event = self
                    .registry
                    .write()
                    .await
                    .apply_external_create(&stem, &extension, self.target_format);
                if event.is_some() {
                    info!("Reconciled created file {stem}.{extension}");
                }
                event
            }
            FsChange::Deleted { stem, extension } => {
                let event = self
                    .registry
                    .write()
                    .await
                    .apply_external_delete(&stem, &extension, self.target_format);
                if event.is_some() {
                    info!("Reconciled deleted file {stem}.{extension}");
                }
                event
            }
            FsChange::Renamed { stem, extension } => {
                let event = self
                    .registry
                    .write()
                    .await
                    .apply_external_rename(&stem, &extension, self.target_format);
                if event.is_some() {
                    info!("Reconciled renamed file {stem}.{extension}");
                }
                event
            }
            FsChange::WatchError(reason) => {
                warn!("Workspace watch failed, disabling reconciliation: {reason}");
                self.degraded = true;
                let _ = self.notice_tx.send(ReconcilerNotice::Degraded { reason });
                return;
            }
        };

        if let Some(event) = applied {
            let _ = self.notice_tx.send(ReconcilerNotice::Applied(event));
        }
    }
}
