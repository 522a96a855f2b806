//! Track model, download state machine, and the workspace track registry.
//!
//! A [`Track`] is one playlist item plus its local download status, keyed by
//! the stable remote identifier. The [`TrackRegistry`] is the authoritative,
//! insertion-ordered set of tracks for one workspace; every state mutation
//! flows through a registry method so that transitions originating from the
//! download pool and from the filesystem reconciler are serialized behind a
//! single write lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::fetch::sanitize_filename;

/// Registry shared between the orchestrator, the download pool, and the
/// filesystem reconciler. The write lock is the serialization point for all
/// state mutations.
pub type SharedRegistry = Arc<RwLock<TrackRegistry>>;

/// Wrap a registry for shared use.
#[must_use]
pub fn shared(registry: TrackRegistry) -> SharedRegistry {
    Arc::new(RwLock::new(registry))
}

/// Stable external identifier of a playlist item.
///
/// Identity is always this ID, never the title: titles are not guaranteed
/// unique and may change remotely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    /// Create a track ID from the remote identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Supported audio container formats for the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MP3 container (default).
    #[default]
    Mp3,
    /// M4A/AAC container.
    M4a,
}

impl AudioFormat {
    /// All supported formats.
    pub const ALL: [Self; 2] = [Self::Mp3, Self::M4a];

    /// File extension for this format, without the leading dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
        }
    }

    /// Parse a file extension (without dot, case-insensitive).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "m4a" => Some(Self::M4a),
            _ => None,
        }
    }

    /// Whether the extension names any supported format.
    #[must_use]
    pub fn is_supported_extension(ext: &str) -> bool {
        Self::from_extension(ext).is_some()
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Download status of a single track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// No local file for this track.
    #[default]
    NotDownloaded,
    /// Admitted into the download pool, waiting for a free worker.
    Queued,
    /// A worker is downloading the track.
    Downloading,
    /// A worker is converting the track to the target format.
    Converting,
    /// A local file in the target format exists.
    Downloaded,
    /// A local file exists but in a different container format.
    NeedsConversion,
}

impl DownloadState {
    /// Whether a download task currently owns this track.
    ///
    /// While active, the pool is the sole authority over the state and
    /// externally observed filesystem events are ignored.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Downloading | Self::Converting)
    }

    /// Whether the track may be admitted into the download pool.
    #[must_use]
    pub const fn is_admissible(self) -> bool {
        matches!(self, Self::NotDownloaded | Self::NeedsConversion)
    }
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotDownloaded => write!(f, "NotDownloaded"),
            Self::Queued => write!(f, "Queued"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Converting => write!(f, "Converting"),
            Self::Downloaded => write!(f, "Downloaded"),
            Self::NeedsConversion => write!(f, "NeedsConversion"),
        }
    }
}

/// One playlist item and its local download status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Stable remote identifier.
    pub id: TrackId,
    /// Display title; also the expected local file name stem.
    pub title: String,
    /// Source locator for the media.
    pub url: String,
    /// 1-based position in the registry (newest first).
    pub position: usize,
    /// Current download status.
    #[serde(default)]
    pub state: DownloadState,
    /// Whether bulk sync should download this track.
    #[serde(default = "default_auto_download")]
    pub auto_download: bool,
}

const fn default_auto_download() -> bool {
    true
}

impl Track {
    /// Create a track in its initial state.
    pub fn new(id: impl Into<TrackId>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            position: 0,
            state: DownloadState::default(),
            auto_download: true,
        }
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// State-change notification emitted for every track transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    /// The track that changed.
    pub id: TrackId,
    /// State before the transition.
    pub previous: DownloadState,
    /// State after the transition.
    pub state: DownloadState,
}

/// Reason a track was not admitted into the download pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitReject {
    /// The track is not in the registry.
    UnknownTrack,
    /// The track opted out of bulk downloads.
    AutoDownloadDisabled,
    /// The track is not in an admissible state (already active or downloaded).
    NotEligible(DownloadState),
}

/// Authoritative, insertion-ordered set of tracks for one workspace.
///
/// IDs are unique; titles are not. Newly discovered remote items are inserted
/// at the front so the newest items surface first.
#[derive(Debug, Default)]
pub struct TrackRegistry {
    tracks: VecDeque<Track>,
    event_tx: Option<mpsc::UnboundedSender<TrackEvent>>,
}

impl TrackRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to state-change events. Replaces any previous subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TrackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_tx = Some(tx);
        rx
    }

    fn emit(&self, id: &TrackId, previous: DownloadState, state: DownloadState) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(TrackEvent {
                id: id.clone(),
                previous,
                state,
            });
        }
    }

    /// Number of tracks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Iterate over tracks in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// Find a track by its stable ID.
    #[must_use]
    pub fn get(&self, id: &TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| &t.id == id)
    }

    fn get_mut(&mut self, id: &TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| &t.id == id)
    }

    /// Whether the registry contains the given ID.
    #[must_use]
    pub fn contains(&self, id: &TrackId) -> bool {
        self.get(id).is_some()
    }

    /// The set of known stable IDs.
    #[must_use]
    pub fn ids(&self) -> HashSet<TrackId> {
        self.tracks.iter().map(|t| t.id.clone()).collect()
    }

    /// Number of tracks currently in the `Downloaded` state.
    #[must_use]
    pub fn downloaded_count(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.state == DownloadState::Downloaded)
            .count()
    }

    /// Point-in-time snapshot of all tracks, in registry order.
    ///
    /// Readers outside the core must use snapshots instead of holding the
    /// lock across their own processing.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }

    /// Insert a newly discovered track at the front of the registry.
    ///
    /// Duplicate IDs are rejected with a warning; the existing entry (and its
    /// in-flight state) is kept.
    pub fn insert_front(&mut self, track: Track) {
        if self.contains(&track.id) {
            warn!("Track {} already in registry, keeping existing entry", track.id);
            return;
        }
        self.tracks.push_front(track);
    }

    /// Append a track at the back, preserving a previously persisted order.
    pub fn push_back(&mut self, track: Track) {
        if self.contains(&track.id) {
            warn!("Track {} already in registry, keeping existing entry", track.id);
            return;
        }
        self.tracks.push_back(track);
    }

    /// Remove every track whose ID is in `ids`. Returns the number removed.
    pub fn remove_ids(&mut self, ids: &HashSet<TrackId>) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|t| !ids.contains(&t.id));
        before - self.tracks.len()
    }

    /// Recompute 1-based positions after a mutation.
    pub fn reindex(&mut self) {
        for (i, track) in self.tracks.iter_mut().enumerate() {
            track.position = i + 1;
        }
    }

    // -------------------------------------------------------------------------
    // Pool-owned transitions
    // -------------------------------------------------------------------------

    /// Atomic check-and-set for admission into the download pool.
    ///
    /// Succeeds only for `NotDownloaded` or `NeedsConversion` tracks with
    /// `auto_download` enabled, transitioning the track to `Queued` and
    /// returning the prior state so a cancelled task can restore it. The
    /// check and the transition happen under one registry lock, so two
    /// admission paths cannot race onto the same track.
    pub fn try_admit(&mut self, id: &TrackId) -> std::result::Result<DownloadState, AdmitReject> {
        let Some(track) = self.get_mut(id) else {
            return Err(AdmitReject::UnknownTrack);
        };
        if !track.auto_download {
            return Err(AdmitReject::AutoDownloadDisabled);
        }
        if !track.state.is_admissible() {
            return Err(AdmitReject::NotEligible(track.state));
        }
        let prior = track.state;
        track.state = DownloadState::Queued;
        let id = track.id.clone();
        self.emit(&id, prior, DownloadState::Queued);
        Ok(prior)
    }

    /// A worker picked the track up: `Queued` -> `Downloading`.
    pub fn mark_downloading(&mut self, id: &TrackId) -> bool {
        self.transition(id, DownloadState::Downloading, |s| s == DownloadState::Queued)
    }

    /// The fetched container mismatches the target: `Downloading` -> `Converting`.
    ///
    /// Conversion is only reachable through `Downloading`.
    pub fn mark_converting(&mut self, id: &TrackId) -> bool {
        self.transition(id, DownloadState::Converting, |s| {
            s == DownloadState::Downloading
        })
    }

    /// The task finished with a file in the target format.
    pub fn mark_downloaded(&mut self, id: &TrackId) -> bool {
        self.transition(id, DownloadState::Downloaded, |s| {
            matches!(s, DownloadState::Downloading | DownloadState::Converting)
        })
    }

    /// A task was cancelled or failed: restore the pre-admission state.
    pub fn revert(&mut self, id: &TrackId, prior: DownloadState) -> bool {
        self.transition(id, prior, DownloadState::is_active)
    }

    fn transition(
        &mut self,
        id: &TrackId,
        to: DownloadState,
        allowed: impl Fn(DownloadState) -> bool,
    ) -> bool {
        let Some(track) = self.get_mut(id) else {
            warn!("Transition to {to} requested for unknown track {id}");
            return false;
        };
        let from = track.state;
        if !allowed(from) {
            warn!("Ignoring transition {from} -> {to} for track {id}");
            return false;
        }
        track.state = to;
        let id = track.id.clone();
        self.emit(&id, from, to);
        true
    }

    // -------------------------------------------------------------------------
    // Reconciler-owned transitions (external filesystem observations)
    // -------------------------------------------------------------------------

    /// A file appeared in the workspace.
    ///
    /// Resolves the track by title stem. Active tracks are ignored: the pool
    /// owns their state while a task is live. A matching extension yields
    /// `Downloaded`; any other extension yields `NeedsConversion`.
    pub fn apply_external_create(
        &mut self,
        stem: &str,
        extension: &str,
        target: AudioFormat,
    ) -> Option<TrackEvent> {
        self.apply_external(stem, |state| {
            if AudioFormat::from_extension(extension) == Some(target) {
                match state {
                    DownloadState::Downloaded => None,
                    _ => Some(DownloadState::Downloaded),
                }
            } else {
                match state {
                    DownloadState::NeedsConversion => None,
                    _ => Some(DownloadState::NeedsConversion),
                }
            }
        })
    }

    /// A file in the target format was deleted from the workspace.
    ///
    /// Deletions of other extensions are not tracked; the expected local file
    /// is `<title>.<target extension>`.
    pub fn apply_external_delete(
        &mut self,
        stem: &str,
        extension: &str,
        target: AudioFormat,
    ) -> Option<TrackEvent> {
        if AudioFormat::from_extension(extension) != Some(target) {
            return None;
        }
        self.apply_external(stem, |state| match state {
            DownloadState::NotDownloaded => None,
            _ => Some(DownloadState::NotDownloaded),
        })
    }

    /// A file was renamed; `stem`/`extension` describe the new name.
    ///
    /// A rename onto a track's title with the target extension marks it
    /// `Downloaded`; a mismatched extension marks it `NeedsConversion`.
    pub fn apply_external_rename(
        &mut self,
        stem: &str,
        extension: &str,
        target: AudioFormat,
    ) -> Option<TrackEvent> {
        self.apply_external(stem, |state| {
            if AudioFormat::from_extension(extension) == Some(target) {
                match state {
                    DownloadState::Downloaded => None,
                    _ => Some(DownloadState::Downloaded),
                }
            } else {
                match state {
                    DownloadState::NeedsConversion => None,
                    _ => Some(DownloadState::NeedsConversion),
                }
            }
        })
    }

    /// Align inactive tracks' states with the files observed on disk.
    ///
    /// `files` maps file name stems to the set of extensions present in the
    /// workspace directory. Returns the number of tracks whose state changed.
    /// Active tracks are skipped; the pool owns their state.
    pub fn refresh_from_files(
        &mut self,
        files: &HashMap<String, HashSet<String>>,
        target: AudioFormat,
    ) -> usize {
        let mut changed = 0;
        for i in 0..self.tracks.len() {
            let (from, stem) = {
                let track = &self.tracks[i];
                (track.state, sanitize_filename(&track.title))
            };
            if from.is_active() {
                continue;
            }
            let to = match files.get(&stem) {
                Some(exts)
                    if exts
                        .iter()
                        .any(|e| AudioFormat::from_extension(e) == Some(target)) =>
                {
                    DownloadState::Downloaded
                }
                Some(exts) if exts.iter().any(|e| AudioFormat::is_supported_extension(e)) => {
                    DownloadState::NeedsConversion
                }
                _ => DownloadState::NotDownloaded,
            };
            if to != from {
                self.tracks[i].state = to;
                let id = self.tracks[i].id.clone();
                self.emit(&id, from, to);
                changed += 1;
            }
        }
        changed
    }

    /// Resolve a track by title and apply an external transition, honoring
    /// the active-task guard.
    ///
    /// Stems are compared against sanitized titles, since that is what the
    /// engine writes to disk. The first track with a matching stem wins;
    /// duplicate titles resolve to the first match.
    fn apply_external(
        &mut self,
        stem: &str,
        next: impl Fn(DownloadState) -> Option<DownloadState>,
    ) -> Option<TrackEvent> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| sanitize_filename(&t.title) == stem)?;
        let from = track.state;
        if from.is_active() {
            debug!(
                "Ignoring external event for track {} while {from}",
                track.id
            );
            return None;
        }
        let to = next(from)?;
        track.state = to;
        let id = track.id.clone();
        self.emit(&id, from, to);
        Some(TrackEvent {
            id,
            previous: from,
            state: to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, title: &str) -> Track {
        Track::new(id, title, format!("https://example.com/watch?v={id}"))
    }

    #[test]
    fn test_audio_format_extensions() {
        assert_eq!(AudioFormat::Mp3.extension(), "mp3");
        assert_eq!(AudioFormat::from_extension("M4A"), Some(AudioFormat::M4a));
        assert_eq!(AudioFormat::from_extension("flac"), None);
        assert!(AudioFormat::is_supported_extension("mp3"));
        assert!(!AudioFormat::is_supported_extension("txt"));
    }

    #[test]
    fn test_insert_front_orders_newest_first() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "First"));
        registry.insert_front(track("b", "Second"));
        registry.reindex();

        let ids: Vec<_> = registry.iter().map(|t| t.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(registry.get(&TrackId::from("b")).unwrap().position, 1);
        assert_eq!(registry.get(&TrackId::from("a")).unwrap().position, 2);
    }

    #[test]
    fn test_insert_front_rejects_duplicate_id() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Original"));
        registry
            .get_mut(&TrackId::from("a"))
            .unwrap()
            .state = DownloadState::Downloading;

        registry.insert_front(track("a", "Replacement"));

        assert_eq!(registry.len(), 1);
        let kept = registry.get(&TrackId::from("a")).unwrap();
        assert_eq!(kept.title, "Original");
        assert_eq!(kept.state, DownloadState::Downloading);
    }

    #[test]
    fn test_try_admit_check_and_set() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Song"));

        let prior = registry.try_admit(&TrackId::from("a")).unwrap();
        assert_eq!(prior, DownloadState::NotDownloaded);
        assert_eq!(
            registry.get(&TrackId::from("a")).unwrap().state,
            DownloadState::Queued
        );

        // Second admission must fail: the track is already live.
        assert_eq!(
            registry.try_admit(&TrackId::from("a")),
            Err(AdmitReject::NotEligible(DownloadState::Queued))
        );
    }

    #[test]
    fn test_try_admit_respects_auto_download() {
        let mut registry = TrackRegistry::new();
        let mut t = track("a", "Song");
        t.auto_download = false;
        registry.insert_front(t);

        assert_eq!(
            registry.try_admit(&TrackId::from("a")),
            Err(AdmitReject::AutoDownloadDisabled)
        );
    }

    #[test]
    fn test_try_admit_from_needs_conversion() {
        let mut registry = TrackRegistry::new();
        let mut t = track("a", "Song");
        t.state = DownloadState::NeedsConversion;
        registry.insert_front(t);

        let prior = registry.try_admit(&TrackId::from("a")).unwrap();
        assert_eq!(prior, DownloadState::NeedsConversion);
    }

    #[test]
    fn test_pool_transition_chain() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Song"));
        let id = TrackId::from("a");

        registry.try_admit(&id).unwrap();
        assert!(registry.mark_downloading(&id));
        assert!(registry.mark_converting(&id));
        assert!(registry.mark_downloaded(&id));
        assert_eq!(registry.get(&id).unwrap().state, DownloadState::Downloaded);
    }

    #[test]
    fn test_converting_only_reachable_from_downloading() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Song"));
        let id = TrackId::from("a");

        // NotDownloaded -> Converting is forbidden.
        assert!(!registry.mark_converting(&id));

        registry.try_admit(&id).unwrap();
        // Queued -> Converting is forbidden as well.
        assert!(!registry.mark_converting(&id));
        assert_eq!(registry.get(&id).unwrap().state, DownloadState::Queued);
    }

    #[test]
    fn test_revert_restores_prior_state() {
        let mut registry = TrackRegistry::new();
        let mut t = track("a", "Song");
        t.state = DownloadState::NeedsConversion;
        registry.insert_front(t);
        let id = TrackId::from("a");

        let prior = registry.try_admit(&id).unwrap();
        registry.mark_downloading(&id);
        assert!(registry.revert(&id, prior));
        assert_eq!(
            registry.get(&id).unwrap().state,
            DownloadState::NeedsConversion
        );
    }

    #[test]
    fn test_external_create_matching_extension() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Song"));

        let event = registry
            .apply_external_create("Song", "mp3", AudioFormat::Mp3)
            .unwrap();
        assert_eq!(event.state, DownloadState::Downloaded);
    }

    #[test]
    fn test_external_create_mismatched_extension() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Song"));

        let event = registry
            .apply_external_create("Song", "m4a", AudioFormat::Mp3)
            .unwrap();
        assert_eq!(event.state, DownloadState::NeedsConversion);
    }

    #[test]
    fn test_external_events_ignored_while_active() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Song"));
        let id = TrackId::from("a");
        registry.try_admit(&id).unwrap();
        registry.mark_downloading(&id);

        assert!(registry
            .apply_external_create("Song", "mp3", AudioFormat::Mp3)
            .is_none());
        assert!(registry
            .apply_external_delete("Song", "mp3", AudioFormat::Mp3)
            .is_none());
        assert!(registry
            .apply_external_rename("Song", "m4a", AudioFormat::Mp3)
            .is_none());
        assert_eq!(registry.get(&id).unwrap().state, DownloadState::Downloading);
    }

    #[test]
    fn test_external_delete_requires_target_extension() {
        let mut registry = TrackRegistry::new();
        let mut t = track("a", "Song");
        t.state = DownloadState::Downloaded;
        registry.insert_front(t);

        // Deleting an unrelated extension changes nothing.
        assert!(registry
            .apply_external_delete("Song", "txt", AudioFormat::Mp3)
            .is_none());

        let event = registry
            .apply_external_delete("Song", "mp3", AudioFormat::Mp3)
            .unwrap();
        assert_eq!(event.previous, DownloadState::Downloaded);
        assert_eq!(event.state, DownloadState::NotDownloaded);
    }

    #[test]
    fn test_external_rename_to_mismatched_extension() {
        let mut registry = TrackRegistry::new();
        let mut t = track("a", "Song");
        t.state = DownloadState::Downloaded;
        registry.insert_front(t);

        let event = registry
            .apply_external_rename("Song", "m4a", AudioFormat::Mp3)
            .unwrap();
        assert_eq!(event.state, DownloadState::NeedsConversion);
    }

    #[test]
    fn test_external_resolution_is_by_title_first_match() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Song"));
        registry.insert_front(track("b", "Song"));

        let event = registry
            .apply_external_create("Song", "mp3", AudioFormat::Mp3)
            .unwrap();
        // Front of the registry wins.
        assert_eq!(event.id, TrackId::from("b"));
        assert_eq!(
            registry.get(&TrackId::from("a")).unwrap().state,
            DownloadState::NotDownloaded
        );
    }

    #[test]
    fn test_remove_ids_and_counts() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "One"));
        registry.insert_front(track("b", "Two"));
        let mut t = track("c", "Three");
        t.state = DownloadState::Downloaded;
        registry.insert_front(t);

        assert_eq!(registry.downloaded_count(), 1);

        let removed = registry.remove_ids(&HashSet::from([TrackId::from("b")]));
        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains(&TrackId::from("b")));
    }

    #[test]
    fn test_events_emitted_on_transitions() {
        let mut registry = TrackRegistry::new();
        let mut rx = registry.subscribe();
        registry.insert_front(track("a", "Song"));
        let id = TrackId::from("a");

        registry.try_admit(&id).unwrap();
        registry.mark_downloading(&id);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.previous, DownloadState::NotDownloaded);
        assert_eq!(first.state, DownloadState::Queued);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.state, DownloadState::Downloading);
    }

    #[test]
    fn test_refresh_from_files() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Present"));
        registry.insert_front(track("b", "WrongFormat"));
        let mut gone = track("c", "Gone");
        gone.state = DownloadState::Downloaded;
        registry.insert_front(gone);
        let mut busy = track("d", "Busy");
        busy.state = DownloadState::Downloading;
        registry.insert_front(busy);

        let mut files: HashMap<String, HashSet<String>> = HashMap::new();
        files.insert("Present".to_string(), HashSet::from(["mp3".to_string()]));
        files.insert(
            "WrongFormat".to_string(),
            HashSet::from(["m4a".to_string()]),
        );
        files.insert("Busy".to_string(), HashSet::from(["mp3".to_string()]));

        let changed = registry.refresh_from_files(&files, AudioFormat::Mp3);
        assert_eq!(changed, 3);
        assert_eq!(
            registry.get(&TrackId::from("a")).unwrap().state,
            DownloadState::Downloaded
        );
        assert_eq!(
            registry.get(&TrackId::from("b")).unwrap().state,
            DownloadState::NeedsConversion
        );
        assert_eq!(
            registry.get(&TrackId::from("c")).unwrap().state,
            DownloadState::NotDownloaded
        );
        // Active tracks are never touched by a scan.
        assert_eq!(
            registry.get(&TrackId::from("d")).unwrap().state,
            DownloadState::Downloading
        );
    }

    #[test]
    fn test_external_matching_uses_sanitized_title() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Song: Live?"));

        let event = registry
            .apply_external_create("Song_ Live_", "mp3", AudioFormat::Mp3)
            .unwrap();
        assert_eq!(event.state, DownloadState::Downloaded);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut registry = TrackRegistry::new();
        registry.insert_front(track("a", "Song"));

        let snapshot = registry.snapshot();
        registry.try_admit(&TrackId::from("a")).unwrap();

        assert_eq!(snapshot[0].state, DownloadState::NotDownloaded);
    }
}
