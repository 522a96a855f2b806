//! Remote playlist fetch boundary.
//!
//! The mechanics of talking to the remote playlist service live behind the
//! [`PlaylistFetcher`] trait: the core only sees a paginated, cancellable
//! fetch that reports progress fractions and ends in a single terminal
//! outcome. A failed or cancelled fetch never yields partial results.
//!
//! Playlist URL parsing helpers live here too, since the workspace
//! configuration stores a playlist URL and derives the playlist ID from it.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::download::CancelFlag;
use crate::error::{Error, Result};
use crate::track::{Track, TrackId};

/// One remote playlist item: stable ID, title, and source locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Stable remote identifier.
    pub id: String,
    /// Item title.
    pub title: String,
    /// Source locator for the media.
    pub url: String,
}

impl PlaylistItem {
    /// The stable ID as a [`TrackId`].
    #[must_use]
    pub fn track_id(&self) -> TrackId {
        TrackId::new(self.id.clone())
    }

    /// Convert into a fresh [`Track`] in its initial state.
    #[must_use]
    pub fn into_track(self) -> Track {
        Track::new(self.id, self.title, self.url)
    }
}

/// Terminal outcome of one playlist fetch.
///
/// Cancellation is binary: a cancelled fetch carries no partial items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The fetch was cancelled before completing.
    Cancelled,
    /// The fetch completed with the full remote item set.
    Completed(Vec<PlaylistItem>),
}

/// Callback receiving monotonically non-decreasing progress fractions in [0, 1].
pub type FetchProgress = Box<dyn Fn(f64) + Send + Sync>;

/// Remote playlist source.
///
/// Implementations page through the remote playlist up to `max_items`,
/// reporting progress through the callback and observing `cancel` between
/// pages. The call is synchronous; the orchestrator runs it on a blocking
/// worker thread.
#[cfg_attr(test, mockall::automock)]
pub trait PlaylistFetcher: Send + Sync {
    /// Fetch the full item set for a playlist.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote service fails; cancellation is reported
    /// through [`FetchOutcome::Cancelled`], not as an error.
    fn fetch(
        &self,
        playlist_id: &str,
        max_items: usize,
        progress: FetchProgress,
        cancel: &CancelFlag,
    ) -> Result<FetchOutcome>;
}

#[allow(clippy::expect_used)]
static PLAYLIST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{2,64}$").expect("valid playlist id regex"));

/// Extract the playlist ID from a playlist URL.
///
/// Supported formats:
/// - `https://www.youtube.com/playlist?list=PLxxxxxxxx`
/// - `https://youtube.com/playlist?list=PLxxxxxxxx`
/// - `https://www.youtube.com/watch?v=xxxxx&list=PLxxxxxxxx`
/// - `https://youtu.be/xxxxx?list=PLxxxxxxxx`
///
/// # Errors
///
/// Returns [`Error::InvalidPlaylistUrl`] if the URL is not a playlist URL or
/// the embedded playlist ID is malformed.
pub fn extract_playlist_id(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::InvalidPlaylistUrl("URL cannot be empty".to_string()));
    }

    let url_lower = url.to_lowercase();
    if !url_lower.starts_with("http://") && !url_lower.starts_with("https://") {
        return Err(Error::InvalidPlaylistUrl(
            "URL must start with http:// or https://".to_string(),
        ));
    }
    if !url_lower.contains("youtube.com") && !url_lower.contains("youtu.be") {
        return Err(Error::InvalidPlaylistUrl(
            "URL must be a YouTube URL (youtube.com or youtu.be)".to_string(),
        ));
    }

    let Some(list_pos) = url_lower.find("list=") else {
        return Err(Error::InvalidPlaylistUrl(
            "URL does not contain a playlist".to_string(),
        ));
    };

    let rest = &url[list_pos + 5..];
    let end = rest.find(['&', '#']).unwrap_or(rest.len());
    let playlist_id = rest[..end].trim();

    if !PLAYLIST_ID_RE.is_match(playlist_id) {
        return Err(Error::InvalidPlaylistUrl(format!(
            "Malformed playlist ID: {playlist_id}"
        )));
    }

    Ok(playlist_id.to_string())
}

/// Sanitize a string for use as a filename stem.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

    let sanitized: String = name
        .chars()
        .map(|c| if invalid_chars.contains(&c) { '_' } else { c })
        .collect();

    // Trim whitespace and dots from ends
    let trimmed = sanitized.trim().trim_matches('.');

    // Limit length (leaving room for extension)
    if trimmed.len() > 200 {
        trimmed[..200].to_string()
    } else {
        trimmed.to_string()
    }
}
