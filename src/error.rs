//! Errors reported by a tail session.
//!
//! Every failure is scoped to one session and reaches the consumer as
//! [`TailEvent::Error`](crate::event::TailEvent::Error). Nothing here is fatal
//! to the process.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TailError {
    /// The file is missing or inaccessible.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {} at offset {offset}: {source}", path.display())]
    Read {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to close {}: {source}", path.display())]
    Close {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Listing the directory to find a renamed file failed.
    #[error("failed to resolve rename of {} in {}: {source}", path.display(), directory.display())]
    RenameResolution {
        path: PathBuf,
        directory: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Change notifications could not be registered or the backend failed.
    #[error("failed to watch {}: {message}", path.display())]
    Watch { path: PathBuf, message: String },

    #[error("failed to start tail thread: {0}")]
    Spawn(#[source] io::Error),

    /// Programmer error, e.g. asking for chunk offsets without offset tagging.
    #[error("usage error: {0}")]
    Usage(String),
}

impl TailError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        TailError::Usage(message.into())
    }

    /// True for an open failure caused by the path not existing (yet).
    pub fn is_not_found(&self) -> bool {
        matches!(self, TailError::Open { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
