use crate::fs::FileId;
use std::path::PathBuf;

/// Live state of one open descriptor.
///
/// Owned and mutated only by the engine thread. A new session is created for
/// every successful open, so `position` starts at zero for each generation.
#[derive(Debug)]
pub struct TailSession<H> {
    /// Where the file is currently known to live. Changes when a rename is
    /// resolved without rotation survival.
    pub path: PathBuf,
    pub handle: H,
    /// Identity captured at open time.
    pub id: FileId,
    /// Next byte to read. Equals the number of bytes delivered for this file.
    pub position: u64,
    pub read_in_flight: bool,
    pub deletion_reported: bool,
    /// What the tracked path named when the deletion was reported, `None`
    /// if it was missing. Directory scans are skipped while it stays so.
    pub path_after_deletion: Option<FileId>,
    pub truncation_reported: bool,
}

impl<H> TailSession<H> {
    pub fn new(path: PathBuf, handle: H, id: FileId) -> Self {
        Self {
            path,
            handle,
            id,
            position: 0,
            read_in_flight: false,
            deletion_reported: false,
            path_after_deletion: None,
            truncation_reported: false,
        }
    }

    /// True if `name` is this session's current file name.
    pub fn has_file_name(&self, name: Option<&std::ffi::OsStr>) -> bool {
        name.is_some() && self.path.file_name() == name
    }
}
