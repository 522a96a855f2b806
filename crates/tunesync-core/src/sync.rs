//! Sync orchestrator.
//!
//! Drives one full synchronization cycle: fetch the remote playlist, diff it
//! against the registry, apply the add/remove sets, persist the updated item
//! set, admit every eligible track into the download pool, and aggregate
//! per-task outcomes until the batch drains. A failed or cancelled fetch
//! leaves the registry untouched; task failures are isolated and surface as
//! one aggregated count once the batch finishes.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::cleanup::{CleanupResult, cleanup_workspace};
use crate::config::WorkspaceConfig;
use crate::diff::diff;
use crate::download::CancelFlag;
use crate::error::{Error, Result};
use crate::fetch::{FetchOutcome, FetchProgress, PlaylistFetcher, sanitize_filename};
use crate::pool::{DownloadPool, PoolEvent};
use crate::reconciler::scan_workspace;
use crate::store::{RegistrySnapshot, WorkspaceStore};
use crate::track::{SharedRegistry, TrackId};

/// Events emitted over the orchestrator's subscription channel.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The remote fetch started.
    FetchStarted,
    /// Fetch progress fraction in [0, 1], monotonically non-decreasing.
    FetchProgress(f64),
    /// The diff was applied to the registry.
    PlaylistUpdated {
        /// Number of tracks added.
        added: usize,
        /// Number of tracks removed.
        removed: usize,
    },
    /// A per-task pool event, forwarded.
    Track(PoolEvent),
    /// Aggregate counters after each task completion.
    Progress {
        /// Tasks still outstanding in this batch.
        outstanding: usize,
        /// Failures accumulated so far.
        errors: usize,
    },
    /// The cycle finished; carries the final report.
    Finished(SyncReport),
    /// The cycle ended before admission (fetch failure or cancellation).
    Failed(String),
}

/// Summary of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Tracks added to the registry.
    pub added: usize,
    /// Tracks removed from the registry.
    pub removed: usize,
    /// Tracks admitted into the download pool.
    pub admitted: usize,
    /// Tasks that completed successfully.
    pub completed: usize,
    /// Tasks that failed.
    pub errors: usize,
    /// Tasks that were cancelled.
    pub cancelled: usize,
    /// Whether the cycle was cancelled by the user.
    pub was_cancelled: bool,
    /// Cleanup result, when the workspace enables cleanup.
    pub cleanup: Option<CleanupResult>,
    /// Completion timestamp (unix seconds) recorded for this cycle.
    pub last_sync: Option<u64>,
}

impl SyncReport {
    /// Human-readable one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.was_cancelled {
            format!(
                "Sync cancelled: {} of {} download(s) finished",
                self.completed, self.admitted
            )
        } else {
            format!(
                "Sync completed: +{} -{} track(s), {} downloaded, {} failed",
                self.added, self.removed, self.completed, self.errors
            )
        }
    }
}

/// Composes fetch, diff, registry mutation, persistence, and bulk admission
/// into one cancellable cycle.
pub struct SyncOrchestrator {
    registry: SharedRegistry,
    pool: DownloadPool,
    pool_events: Mutex<mpsc::UnboundedReceiver<PoolEvent>>,
    fetcher: Arc<dyn PlaylistFetcher>,
    store: Arc<dyn WorkspaceStore>,
    config: RwLock<WorkspaceConfig>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    syncing: AtomicBool,
    fetch_cancel: Mutex<CancelFlag>,
    last_sync: Mutex<Option<u64>>,
}

impl SyncOrchestrator {
    /// Create an orchestrator over an already wired registry and pool.
    ///
    /// `pool_events` must be the receiver returned by the pool's constructor;
    /// `last_sync` carries the persisted completion time of the previous
    /// cycle, if any. Returns the orchestrator and its event subscription.
    #[must_use]
    pub fn new(
        registry: SharedRegistry,
        pool: DownloadPool,
        pool_events: mpsc::UnboundedReceiver<PoolEvent>,
        fetcher: Arc<dyn PlaylistFetcher>,
        store: Arc<dyn WorkspaceStore>,
        config: WorkspaceConfig,
        last_sync: Option<u64>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SyncEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Self {
            registry,
            pool,
            pool_events: Mutex::new(pool_events),
            fetcher,
            store,
            config: RwLock::new(config),
            event_tx,
            syncing: AtomicBool::new(false),
            fetch_cancel: Mutex::new(CancelFlag::new()),
            last_sync: Mutex::new(last_sync),
        });
        (orchestrator, event_rx)
    }

    /// Whether a sync cycle is currently running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Completion time of the most recent cycle, unix seconds.
    pub async fn last_sync(&self) -> Option<u64> {
        *self.last_sync.lock().await
    }

    /// Current workspace configuration.
    pub async fn config(&self) -> WorkspaceConfig {
        self.config.read().await.clone()
    }

    /// Apply an updated workspace configuration.
    ///
    /// Worker-count changes take effect for future task starts; the target
    /// format applies to future admissions.
    pub async fn apply_config(&self, mut config: WorkspaceConfig) {
        config.validate();
        self.pool.set_capacity(config.parallel_downloads).await;
        self.pool.set_target_format(config.target_format).await;
        *self.config.write().await = config;
        debug!("Workspace configuration applied");
    }

    /// Request a manual download of a single track.
    ///
    /// Uses the same atomic admission as bulk sync, so a concurrent sync
    /// cannot double-admit the track. State changes surface through the
    /// registry's event channel.
    pub async fn download_track(&self, id: &TrackId) -> crate::pool::Admission {
        self.pool.admit(id).await
    }

    /// Cancel the running cycle.
    ///
    /// Stops the fetch, aborts every queued and in-flight download, and
    /// returns once the pool reports full drain.
    pub async fn cancel(&self) {
        self.fetch_cancel.lock().await.cancel();
        self.pool.abort().await;
    }

    /// Run one full sync cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SyncInProgress`] when a cycle is already running and
    /// [`Error::FetchFailed`] when the remote fetch fails. A cancelled cycle
    /// is not an error; the report records it.
    pub async fn sync(&self) -> Result<SyncReport> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            return Err(Error::SyncInProgress);
        }
        let result = self.run_cycle().await;
        self.syncing.store(false, Ordering::SeqCst);
        match &result {
            Ok(report) => info!("{}", report.summary()),
            Err(e) => warn!("Sync cycle ended with error: {e}"),
        }
        result
    }

    async fn run_cycle(&self) -> Result<SyncReport> {
        let config = self.config.read().await.clone();
        if config.playlist_id.is_empty() {
            return Err(Error::Configuration(
                "workspace has no playlist configured".to_string(),
            ));
        }

        // Stale events from a manual download finished between cycles must
        // not be counted against this batch.
        self.drain_stale_pool_events().await;

        let cancel = CancelFlag::new();
        *self.fetch_cancel.lock().await = cancel.clone();

        let items = match self.fetch_playlist(&config, &cancel).await? {
            Some(items) => items,
            None => {
                // Cancelled fetch: no registry mutation, recoverable.
                let _ = self
                    .event_tx
                    .send(SyncEvent::Failed("playlist fetch cancelled".to_string()));
                return Ok(SyncReport {
                    was_cancelled: true,
                    ..SyncReport::default()
                });
            }
        };

        // Diff and apply under one write lock so unchanged tracks keep their
        // entries (and any in-flight state).
        let (added, removed) = {
            let mut registry = self.registry.write().await;
            let changes = diff(&registry.ids(), &items);
            let removed_ids: HashSet<TrackId> = changes.to_remove.iter().cloned().collect();
            let removed = registry.remove_ids(&removed_ids);
            let added = changes.to_add.len();
            for item in changes.to_add {
                registry.insert_front(item.into_track());
            }
            registry.reindex();
            (added, removed)
        };
        info!("Playlist diff applied: {added} added, {removed} removed");
        let _ = self
            .event_tx
            .send(SyncEvent::PlaylistUpdated { added, removed });
        self.persist().await;

        // Align states with whatever is on disk before deciding what to
        // download; covers files changed while no watcher was running.
        scan_workspace(&self.registry, &config.directory, config.target_format).await;

        let cleanup = if config.delete_unsynced {
            Some(self.cleanup_orphans(&config).await)
        } else {
            None
        };

        let mut report = SyncReport {
            added,
            removed,
            cleanup,
            ..SyncReport::default()
        };

        // Bulk admission; ineligible tracks are skipped by the pool itself.
        let candidates: Vec<TrackId> = {
            let registry = self.registry.read().await;
            registry.iter().map(|t| t.id.clone()).collect()
        };
        let mut batch: HashSet<TrackId> = HashSet::new();
        for id in candidates {
            if self.pool.admit(&id).await.is_admitted() {
                batch.insert(id);
            }
        }
        report.admitted = batch.len();
        info!("Admitted {} track(s) for download", report.admitted);

        self.drain_batch(&mut report, batch).await;

        let completed_at = unix_now();
        report.last_sync = Some(completed_at);
        *self.last_sync.lock().await = Some(completed_at);
        self.persist().await;

        if report.errors > 0 {
            warn!(
                "Sync finished with {} download error(s) out of {} task(s)",
                report.errors, report.admitted
            );
        }
        let _ = self.event_tx.send(SyncEvent::Finished(report.clone()));
        Ok(report)
    }

    /// Fetch the remote item set on a blocking worker.
    ///
    /// Returns `None` when the fetch was cancelled.
    async fn fetch_playlist(
        &self,
        config: &WorkspaceConfig,
        cancel: &CancelFlag,
    ) -> Result<Option<Vec<crate::fetch::PlaylistItem>>> {
        let _ = self.event_tx.send(SyncEvent::FetchStarted);

        let outcome = {
            let fetcher = Arc::clone(&self.fetcher);
            let progress_tx = self.event_tx.clone();
            let playlist_id = config.playlist_id.clone();
            let limit = config.fetch_limit;
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                let progress: FetchProgress = Box::new(move |fraction| {
                    let _ = progress_tx.send(SyncEvent::FetchProgress(fraction));
                });
                fetcher.fetch(&playlist_id, limit, progress, &cancel)
            })
            .await
            .map_err(|e| Error::FetchFailed(format!("fetch task aborted: {e}")))?
        };

        match outcome {
            Ok(FetchOutcome::Completed(items)) => {
                info!("Fetched {} playlist item(s)", items.len());
                Ok(Some(items))
            }
            Ok(FetchOutcome::Cancelled) | Err(Error::Cancelled) => {
                info!("Playlist fetch cancelled");
                Ok(None)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Playlist fetch failed: {message}");
                let _ = self.event_tx.send(SyncEvent::Failed(message.clone()));
                Err(Error::FetchFailed(message))
            }
        }
    }

    /// Consume pool events until every task of this batch completed.
    async fn drain_batch(&self, report: &mut SyncReport, mut batch: HashSet<TrackId>) {
        let mut events = self.pool_events.lock().await;
        while !batch.is_empty() {
            let Some(event) = events.recv().await else {
                warn!("Pool event channel closed mid-batch");
                break;
            };
            if let PoolEvent::Completed {
                track,
                error,
                cancelled,
            } = &event
            {
                if batch.remove(track) {
                    if let Some(message) = error {
                        report.errors += 1;
                        debug!("Track {track} failed: {message}");
                    } else if *cancelled {
                        report.cancelled += 1;
                        report.was_cancelled = true;
                    } else {
                        report.completed += 1;
                    }
                    let _ = self.event_tx.send(SyncEvent::Track(event.clone()));
                    let _ = self.event_tx.send(SyncEvent::Progress {
                        outstanding: batch.len(),
                        errors: report.errors,
                    });
                    continue;
                }
            }
            let _ = self.event_tx.send(SyncEvent::Track(event));
        }
    }

    /// Forward any events left over from work finished between cycles.
    async fn drain_stale_pool_events(&self) {
        let mut events = self.pool_events.lock().await;
        while let Ok(event) = events.try_recv() {
            let _ = self.event_tx.send(SyncEvent::Track(event));
        }
    }

    /// Delete orphaned audio files on a blocking worker. Best-effort.
    async fn cleanup_orphans(&self, config: &WorkspaceConfig) -> CleanupResult {
        let expected: HashSet<String> = {
            let registry = self.registry.read().await;
            registry
                .iter()
                .map(|t| sanitize_filename(&t.title))
                .collect()
        };
        let directory = config.directory.clone();
        let result =
            tokio::task::spawn_blocking(move || cleanup_workspace(&directory, &expected)).await;
        match result {
            Ok(cleanup) => {
                if cleanup.files_deleted > 0 || !cleanup.failures.is_empty() {
                    info!("{}", cleanup.summary());
                }
                cleanup
            }
            Err(e) => {
                warn!("Cleanup task aborted: {e}");
                CleanupResult::default()
            }
        }
    }

    /// Persist the current registry snapshot. Failures are logged, never
    /// fatal to the cycle.
    async fn persist(&self) {
        let snapshot = {
            let registry = self.registry.read().await;
            RegistrySnapshot::capture(&registry, *self.last_sync.lock().await)
        };
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || store.save(&snapshot)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to persist workspace: {e}"),
            Err(e) => warn!("Persist task aborted: {e}"),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
