//! Workspace directory watcher.
//!
//! Adapts the OS file-change notification backend (`notify`) into the
//! normalized, name-level event stream consumed by the reconciler. The rest
//! of the core depends only on [`FsChange`], never on backend quirks; a
//! backend failure surfaces as [`FsChange::WatchError`] instead of a panic.

use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Normalized, name-level change in the workspace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
    /// A file appeared.
    Created {
        /// File name without extension.
        stem: String,
        /// Extension without the leading dot; empty if none.
        extension: String,
    },
    /// A file was removed.
    Deleted {
        /// File name without extension.
        stem: String,
        /// Extension without the leading dot; empty if none.
        extension: String,
    },
    /// A file was renamed; the fields describe the new name.
    Renamed {
        /// New file name without extension.
        stem: String,
        /// New extension without the leading dot; empty if none.
        extension: String,
    },
    /// The notification backend failed; further events may have been lost.
    WatchError(String),
}

/// Start watching the workspace directory for name-level changes.
///
/// Returns the watcher handle (dropping it stops the watch) and the stream of
/// normalized events. Content and attribute writes are filtered out.
///
/// # Errors
///
/// Returns an error if the backend watcher cannot be created or the
/// directory cannot be watched.
pub fn start_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<FsChange>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in map_event(event) {
                    let _ = tx.send(change);
                }
            }
            Err(e) => {
                let _ = tx.send(FsChange::WatchError(e.to_string()));
            }
        })?;
    watcher.watch(root, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

/// Map a backend event onto normalized name-level changes.
fn map_event(event: Event) -> Vec<FsChange> {
    match event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter_map(|path| split_name(path))
            .map(|(stem, extension)| FsChange::Created { stem, extension })
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter_map(|path| split_name(path))
            .map(|(stem, extension)| FsChange::Deleted { stem, extension })
            .collect(),
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
            // The last path is the new name; single-path rename notifications
            // still resolve to the surviving name.
            event
                .paths
                .last()
                .and_then(|path| split_name(path))
                .map(|(stem, extension)| FsChange::Renamed { stem, extension })
                .into_iter()
                .collect()
        }
        // Content and attribute writes are not name changes.
        _ => Vec::new(),
    }
}

fn split_name(path: &Path) -> Option<(String, String)> {
    let stem = path.file_stem()?.to_str()?.to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    Some((stem, extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_maps_create_event() {
        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/workspace/Song Title.mp3")],
            attrs: notify::event::EventAttributes::default(),
        };
        assert_eq!(
            map_event(event),
            vec![FsChange::Created {
                stem: "Song Title".to_string(),
                extension: "mp3".to_string(),
            }]
        );
    }

    #[test]
    fn test_maps_remove_event() {
        let event = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/workspace/Song.m4a")],
            attrs: notify::event::EventAttributes::default(),
        };
        assert_eq!(
            map_event(event),
            vec![FsChange::Deleted {
                stem: "Song".to_string(),
                extension: "m4a".to_string(),
            }]
        );
    }

    #[test]
    fn test_maps_rename_to_new_name() {
        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Name(
                notify::event::RenameMode::Both,
            )),
            paths: vec![
                PathBuf::from("/workspace/Old.mp3"),
                PathBuf::from("/workspace/New.m4a"),
            ],
            attrs: notify::event::EventAttributes::default(),
        };
        assert_eq!(
            map_event(event),
            vec![FsChange::Renamed {
                stem: "New".to_string(),
                extension: "m4a".to_string(),
            }]
        );
    }

    #[test]
    fn test_ignores_content_writes() {
        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Any,
            )),
            paths: vec![PathBuf::from("/workspace/Song.mp3")],
            attrs: notify::event::EventAttributes::default(),
        };
        assert!(map_event(event).is_empty());
    }

    #[test]
    fn test_file_without_extension() {
        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/workspace/README")],
            attrs: notify::event::EventAttributes::default(),
        };
        assert_eq!(
            map_event(event),
            vec![FsChange::Created {
                stem: "README".to_string(),
                extension: String::new(),
            }]
        );
    }
}
