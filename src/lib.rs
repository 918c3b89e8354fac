// Library interface for tailfollow
// Follows a growing file across rotations and splits it into records

pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod event;
pub mod fs;
pub mod signal;
pub mod splitter;
pub mod tailer;
pub mod watcher;

#[cfg(test)]
pub mod test_utils;

pub use config::TailConfig;
pub use error::TailError;
pub use event::{Chunk, ChunkData, TailEvent};
pub use splitter::{Record, RecordEvent, RecordSplitter, Records};
pub use tailer::{Tailer, UnfollowHandle};
