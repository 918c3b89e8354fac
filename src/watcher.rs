use crate::fs::{WatchEvent, WatchSink};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::Path;

/// Active `notify` registration for one file or directory.
///
/// Notifications stop when this is dropped.
pub struct PathWatcher {
    _watcher: RecommendedWatcher,
}

impl PathWatcher {
    /// Start watching `path`, forwarding classified notifications to `sink`.
    pub fn new(path: &Path, sink: WatchSink) -> notify::Result<Self> {
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(kind) = classify(&event.kind) {
                        sink(kind);
                    }
                }
                Err(e) => sink(WatchEvent::Error(e.to_string())),
            })?;

        watcher.watch(path, RecursiveMode::NonRecursive)?;

        Ok(Self { _watcher: watcher })
    }
}

/// Map a raw notify event onto what the tail engine cares about.
///
/// Renames and removals of a watched file both mean "the path may no longer
/// point at the tailed inode". Access events (open/close) carry no new data.
fn classify(kind: &EventKind) -> Option<WatchEvent> {
    match kind {
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Remove(_) => Some(WatchEvent::Rename),
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any | EventKind::Other => {
            Some(WatchEvent::Change)
        }
        EventKind::Access(_) => None,
    }
}
