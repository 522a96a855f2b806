//! Bounded-concurrency download/convert worker pool.
//!
//! Runs at most N concurrent download+convert tasks, N mutable at runtime.
//! Admission is an atomic check-and-set on the track registry, the pending
//! queue is FIFO, task failures are isolated from siblings, and [`DownloadPool::abort`]
//! guarantees that once it returns no track remains in `Queued`, `Downloading`
//! or `Converting`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::download::{CancelFlag, TrackDownloader, media_file_name};
use crate::error::Error;
use crate::fetch::PlaylistItem;
use crate::track::{AdmitReject, AudioFormat, DownloadState, SharedRegistry, TrackId};

/// Default number of parallel download workers.
pub const DEFAULT_PARALLEL_DOWNLOADS: usize = 4;

/// Minimum allowed pool capacity.
pub const MIN_PARALLEL_DOWNLOADS: usize = 1;

/// Maximum allowed pool capacity.
pub const MAX_PARALLEL_DOWNLOADS: usize = 16;

/// Clamp a requested worker count to the supported range.
#[must_use]
pub fn clamp_parallel_downloads(requested: usize) -> usize {
    requested.clamp(MIN_PARALLEL_DOWNLOADS, MAX_PARALLEL_DOWNLOADS)
}

/// Per-task lifecycle events delivered to the pool's subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A worker started downloading the track.
    Started {
        /// The track being downloaded.
        track: TrackId,
    },
    /// The fetched container mismatched the target; conversion began.
    ConversionStarted {
        /// The track being converted.
        track: TrackId,
    },
    /// The task reached a terminal outcome.
    ///
    /// Fires exactly once per admitted task, whether it succeeded, failed, or
    /// was cancelled.
    Completed {
        /// The track the task was bound to.
        track: TrackId,
        /// Error message on failure.
        error: Option<String>,
        /// Whether the task was cancelled rather than finished.
        cancelled: bool,
    },
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The track was queued for download.
    Admitted,
    /// The track was not admitted.
    Rejected(RejectReason),
}

impl Admission {
    /// Whether the track was admitted.
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Why an admission attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The track is not in the registry.
    UnknownTrack,
    /// The track opted out of bulk downloads.
    AutoDownloadDisabled,
    /// The track is not in an admissible state (already active or downloaded).
    NotEligible(DownloadState),
    /// The pool is draining after an abort request.
    AbortInProgress,
}

impl From<AdmitReject> for RejectReason {
    fn from(reject: AdmitReject) -> Self {
        match reject {
            AdmitReject::UnknownTrack => Self::UnknownTrack,
            AdmitReject::AutoDownloadDisabled => Self::AutoDownloadDisabled,
            AdmitReject::NotEligible(state) => Self::NotEligible(state),
        }
    }
}

/// A task waiting for a free worker slot.
struct QueuedTask {
    id: TrackId,
    /// State before admission, restored if the task is cancelled.
    prior: DownloadState,
}

struct PoolInner {
    capacity: usize,
    target_format: AudioFormat,
    pending: VecDeque<QueuedTask>,
    running: usize,
    aborting: bool,
    /// Cancellation flag handed to every task of the current batch.
    cancel: CancelFlag,
}

struct TaskOutcome {
    error: Option<String>,
    cancelled: bool,
}

impl TaskOutcome {
    const fn ok() -> Self {
        Self {
            error: None,
            cancelled: false,
        }
    }

    const fn cancelled() -> Self {
        Self {
            error: None,
            cancelled: true,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            cancelled: false,
        }
    }
}

/// Bounded-concurrency executor for per-track download+convert operations.
///
/// The pool is a cheap-to-clone handle; all clones share the same state.
#[derive(Clone)]
pub struct DownloadPool {
    registry: SharedRegistry,
    downloader: Arc<dyn TrackDownloader>,
    dest_dir: PathBuf,
    inner: Arc<Mutex<PoolInner>>,
    event_tx: mpsc::UnboundedSender<PoolEvent>,
    running_tx: Arc<watch::Sender<usize>>,
}

impl std::fmt::Debug for DownloadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPool").finish_non_exhaustive()
    }
}

impl DownloadPool {
    /// Create a pool over the given registry and workspace directory.
    ///
    /// Returns the pool handle and the receiver for per-task lifecycle
    /// events.
    #[must_use]
    pub fn new(
        registry: SharedRegistry,
        downloader: Arc<dyn TrackDownloader>,
        dest_dir: PathBuf,
        target_format: AudioFormat,
        capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<PoolEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (running_tx, _running_rx) = watch::channel(0usize);

        let pool = Self {
            registry,
            downloader,
            dest_dir,
            inner: Arc::new(Mutex::new(PoolInner {
                capacity: clamp_parallel_downloads(capacity),
                target_format,
                pending: VecDeque::new(),
                running: 0,
                aborting: false,
                cancel: CancelFlag::new(),
            })),
            event_tx,
            running_tx: Arc::new(running_tx),
        };
        (pool, event_rx)
    }

    /// Admit a track for download.
    ///
    /// Atomically transitions the track from `NotDownloaded` or
    /// `NeedsConversion` to `Queued`; any other state, a disabled
    /// `auto_download` flag, or an abort in progress rejects the attempt.
    /// Admission order is preserved: the pending queue is FIFO.
    pub async fn admit(&self, id: &TrackId) -> Admission {
        {
            let inner = self.inner.lock().await;
            if inner.aborting {
                return Admission::Rejected(RejectReason::AbortInProgress);
            }
        }

        let admitted = {
            let mut registry = self.registry.write().await;
            registry.try_admit(id)
        };
        let prior = match admitted {
            Ok(prior) => prior,
            Err(reject) => {
                debug!("Admission rejected for track {id}: {reject:?}");
                return Admission::Rejected(reject.into());
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.aborting {
            // Abort raced with the admission; undo the transition.
            drop(inner);
            self.registry.write().await.revert(id, prior);
            return Admission::Rejected(RejectReason::AbortInProgress);
        }
        inner.pending.push_back(QueuedTask {
            id: id.clone(),
            prior,
        });
        self.pump(&mut inner);
        Admission::Admitted
    }

    /// Change the worker capacity.
    ///
    /// Takes effect for future task starts only; running tasks are never
    /// interrupted by a resize.
    pub async fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock().await;
        inner.capacity = clamp_parallel_downloads(capacity);
        info!("Pool capacity set to {}", inner.capacity);
        self.pump(&mut inner);
    }

    /// Current worker capacity.
    pub async fn capacity(&self) -> usize {
        self.inner.lock().await.capacity
    }

    /// Change the target container format for future tasks.
    pub async fn set_target_format(&self, format: AudioFormat) {
        self.inner.lock().await.target_format = format;
    }

    /// Number of tasks admitted but not yet completed.
    pub async fn outstanding(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.pending.len() + inner.running
    }

    /// Cancel every queued and in-flight task and wait for full drain.
    ///
    /// Once this returns, no track is `Queued`, `Downloading` or
    /// `Converting`: queued tasks revert immediately, in-flight tasks observe
    /// the cancellation flag and unwind, discarding partial artifacts. Each
    /// affected task still emits its `Completed` event with
    /// `cancelled = true`.
    pub async fn abort(&self) {
        let drained: Vec<QueuedTask> = {
            let mut inner = self.inner.lock().await;
            inner.aborting = true;
            inner.cancel.cancel();
            inner.pending.drain(..).collect()
        };

        if !drained.is_empty() {
            let mut registry = self.registry.write().await;
            for task in &drained {
                registry.revert(&task.id, task.prior);
            }
        }
        for task in drained {
            let _ = self.event_tx.send(PoolEvent::Completed {
                track: task.id,
                error: None,
                cancelled: true,
            });
        }

        // Wait for in-flight tasks to unwind cooperatively.
        let mut running_rx = self.running_tx.subscribe();
        let _ = running_rx.wait_for(|&running| running == 0).await;

        let mut inner = self.inner.lock().await;
        inner.aborting = false;
        inner.cancel = CancelFlag::new();
        info!("Download pool aborted and drained");
    }

    /// Start pending tasks while worker slots are free. Caller holds the lock.
    fn pump(&self, inner: &mut PoolInner) {
        while !inner.aborting && inner.running < inner.capacity {
            let Some(task) = inner.pending.pop_front() else {
                break;
            };
            inner.running += 1;
            self.running_tx.send_replace(inner.running);
            let pool = self.clone();
            let cancel = inner.cancel.clone();
            tokio::spawn(async move {
                pool.run_task(task, cancel).await;
            });
        }
    }

    async fn run_task(self, task: QueuedTask, cancel: CancelFlag) {
        let outcome = self.execute(&task, &cancel).await;
        if let Some(message) = &outcome.error {
            error!("Task for track {} failed: {message}", task.id);
        }
        let _ = self.event_tx.send(PoolEvent::Completed {
            track: task.id.clone(),
            error: outcome.error,
            cancelled: outcome.cancelled,
        });

        let mut inner = self.inner.lock().await;
        inner.running -= 1;
        self.running_tx.send_replace(inner.running);
        self.pump(&mut inner);
    }

    async fn execute(&self, task: &QueuedTask, cancel: &CancelFlag) -> TaskOutcome {
        let id = &task.id;

        if cancel.is_cancelled() {
            self.registry.write().await.revert(id, task.prior);
            return TaskOutcome::cancelled();
        }

        // Snapshot the item while the track is still registered; a concurrent
        // resync may have dropped it from the playlist.
        let item = {
            let registry = self.registry.read().await;
            match registry.get(id) {
                Some(track) => PlaylistItem {
                    id: track.id.as_str().to_string(),
                    title: track.title.clone(),
                    url: track.url.clone(),
                },
                None => {
                    warn!("Track {id} removed from registry before download started");
                    return TaskOutcome::failed("track removed from registry");
                }
            }
        };
        let target = self.inner.lock().await.target_format;

        if !self.registry.write().await.mark_downloading(id) {
            return TaskOutcome::failed("track no longer queued");
        }
        let _ = self.event_tx.send(PoolEvent::Started { track: id.clone() });

        let fetched = {
            let downloader = Arc::clone(&self.downloader);
            let dest = self.dest_dir.clone();
            let item = item.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || downloader.download(&item, &dest, target, &cancel))
                .await
        };

        let fetched = match fetched {
            Ok(result) => result,
            Err(join_error) => {
                error!("Download task for {id} aborted: {join_error}");
                self.registry.write().await.revert(id, task.prior);
                return TaskOutcome::failed("download task aborted");
            }
        };

        let actual = match fetched {
            Ok(actual) => actual,
            Err(Error::Cancelled) => {
                self.discard_partial(&item.title, target).await;
                self.registry.write().await.revert(id, task.prior);
                return TaskOutcome::cancelled();
            }
            Err(e) => {
                self.registry.write().await.revert(id, task.prior);
                return TaskOutcome::failed(e.to_string());
            }
        };

        if actual == target {
            self.registry.write().await.mark_downloaded(id);
            return TaskOutcome::ok();
        }

        // The source only offered another container; convert in place.
        if !self.registry.write().await.mark_converting(id) {
            return TaskOutcome::failed("track no longer downloading");
        }
        let _ = self
            .event_tx
            .send(PoolEvent::ConversionStarted { track: id.clone() });

        let source = self.dest_dir.join(media_file_name(&item.title, actual));
        let converted = {
            let downloader = Arc::clone(&self.downloader);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || downloader.convert(&source, target, &cancel)).await
        };

        match converted {
            Ok(Ok(_)) => {
                self.registry.write().await.mark_downloaded(id);
                TaskOutcome::ok()
            }
            Ok(Err(Error::Cancelled)) => {
                // The downloaded source in the other container survives; only
                // the partial conversion output is discarded.
                self.discard_partial(&item.title, target).await;
                self.registry
                    .write()
                    .await
                    .revert(id, DownloadState::NeedsConversion);
                TaskOutcome::cancelled()
            }
            Ok(Err(e)) => {
                self.registry
                    .write()
                    .await
                    .revert(id, DownloadState::NeedsConversion);
                TaskOutcome::failed(e.to_string())
            }
            Err(join_error) => {
                error!("Conversion task for {id} aborted: {join_error}");
                self.registry
                    .write()
                    .await
                    .revert(id, DownloadState::NeedsConversion);
                TaskOutcome::failed("conversion task aborted")
            }
        }
    }

    /// Best-effort removal of an interrupted task's target-format artifact.
    ///
    /// Collaborators stage output through temporary files, so this is a
    /// backstop: a cancelled task must never leave a file masquerading as a
    /// completed download.
    async fn discard_partial(&self, title: &str, target: AudioFormat) {
        let path = self.dest_dir.join(media_file_name(title, target));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Discarded partial artifact {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not discard partial artifact {}: {e}", path.display()),
        }
    }
}
