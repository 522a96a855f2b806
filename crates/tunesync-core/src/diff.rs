//! Playlist diff engine.
//!
//! Computes the add/remove sets between the tracked registry and a freshly
//! fetched remote snapshot. Pure set algebra over stable IDs: no I/O, no side
//! effects, deterministic for a given pair of inputs.

use std::collections::HashSet;

use crate::fetch::PlaylistItem;
use crate::track::TrackId;

/// Result of diffing the registry against a remote snapshot.
#[derive(Debug, Clone, Default)]
pub struct PlaylistDiff {
    /// Remote items not yet tracked, ordered so that inserting each at the
    /// front of the registry leaves the newest item first.
    pub to_add: Vec<PlaylistItem>,
    /// Tracked IDs that disappeared from the remote playlist.
    pub to_remove: Vec<TrackId>,
}

impl PlaylistDiff {
    /// Whether the snapshot matches the registry exactly.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff the currently tracked IDs against a fetched remote snapshot.
///
/// Membership is decided purely by stable ID; titles never participate.
/// Unchanged items appear in neither list, so their registry entries (and any
/// in-flight download state) survive untouched.
///
/// `to_add` preserves the fetch order *reversed*: callers insert each new item
/// at position 0, so reversing here keeps newly discovered items surfacing
/// newest-first, matching the registry's insertion convention.
#[must_use]
pub fn diff(current: &HashSet<TrackId>, fetched: &[PlaylistItem]) -> PlaylistDiff {
    let fetched_ids: HashSet<TrackId> = fetched.iter().map(|item| item.track_id()).collect();

    let to_remove: Vec<TrackId> = current
        .iter()
        .filter(|id| !fetched_ids.contains(*id))
        .cloned()
        .collect();

    let mut to_add: Vec<PlaylistItem> = fetched
        .iter()
        .filter(|item| !current.contains(&item.track_id()))
        .cloned()
        .collect();
    to_add.reverse();

    PlaylistDiff { to_add, to_remove }
}
