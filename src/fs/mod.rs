//! Filesystem collaborator used by the tail engine.
//!
//! The engine never touches `std::fs` directly. Everything it needs from the
//! platform goes through [`Filesystem`], so tests can run the full state
//! machine against an in-memory double and inject failures at any step.

pub mod file_id;
pub mod os;

pub use file_id::FileId;
pub use os::OsFilesystem;

use std::io;
use std::path::{Path, PathBuf};

/// Identity and size of a file at the moment it was stat'ed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub id: FileId,
    pub size: u64,
}

/// One entry of a directory listing, used to find where a tracked file went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub path: PathBuf,
    pub id: FileId,
}

/// Notification delivered by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Content or metadata changed (for a directory watch: an entry appeared,
    /// disappeared or was renamed).
    Change,
    /// The watched file was renamed or removed. The new name is not reported,
    /// callers resolve it from a directory listing.
    Rename,
    /// The notification backend reported a failure.
    Error(String),
}

/// Callback invoked for every notification of a watch. Runs on the
/// notification backend's thread.
pub type WatchSink = Box<dyn Fn(WatchEvent) + Send + 'static>;

/// Platform services the tail engine depends on.
pub trait Filesystem: Send + 'static {
    /// Exclusive owner of one open descriptor.
    type Handle: Send;
    /// Keeps a watch registered; dropping it stops notifications.
    type Watch: Send;

    fn open(&self, path: &Path) -> io::Result<Self::Handle>;

    /// Read up to `len` bytes starting at `offset`. An empty result means
    /// there is nothing past `offset` right now.
    fn read_at(&self, handle: &Self::Handle, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    fn stat(&self, handle: &Self::Handle) -> io::Result<FileStat>;

    fn stat_path(&self, path: &Path) -> io::Result<FileStat>;

    /// Close the descriptor, returning any error the platform reports.
    fn close(&self, handle: Self::Handle) -> io::Result<()>;

    /// Watch a file or directory. Best effort: notifications may be
    /// coalesced, and on some platforms never arrive at all.
    fn watch(&self, path: &Path, sink: WatchSink) -> io::Result<Self::Watch>;

    fn list_directory(&self, dir: &Path) -> io::Result<Vec<DirectoryEntry>>;
}

/// Directory to list when resolving where `path` was renamed to.
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
