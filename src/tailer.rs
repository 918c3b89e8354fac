//! Consumer-facing handle for one tail session.

use crate::config::TailConfig;
use crate::engine::{Control, Engine};
use crate::error::TailError;
use crate::event::{Chunk, TailEvent};
use crate::fs::{Filesystem, OsFilesystem};
use crate::splitter::{RecordSplitter, Records};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cloneable request to stop a session, usable from other threads.
#[derive(Clone)]
pub struct UnfollowHandle {
    control: Sender<Control>,
    requested: Arc<AtomicBool>,
}

impl UnfollowHandle {
    /// Ask the session to stop. Only the first call has any effect.
    pub fn unfollow(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            let _ = self.control.send(Control::Unfollow);
        }
    }
}

/// A running tail session.
///
/// Events arrive on a single channel in the order they happened. Dropping
/// the tailer unfollows it and waits for its thread to finish.
pub struct Tailer {
    path: PathBuf,
    config: TailConfig,
    events: Receiver<TailEvent>,
    unfollow: UnfollowHandle,
    thread: Option<JoinHandle<()>>,
}

impl Tailer {
    /// Start tailing `path` on the real filesystem.
    pub fn start(path: impl Into<PathBuf>, config: TailConfig) -> Result<Self, TailError> {
        Self::with_filesystem(OsFilesystem, path, config)
    }

    /// Start tailing `path` through any [`Filesystem`].
    pub fn with_filesystem<F: Filesystem>(
        fs: F,
        path: impl Into<PathBuf>,
        config: TailConfig,
    ) -> Result<Self, TailError> {
        config.validate()?;
        let path = path.into();

        let (events_tx, events) = unbounded();
        let (control, control_rx) = unbounded();
        let (engine, signals) = Engine::new(fs, path.clone(), config.clone(), events_tx);

        let thread = thread::Builder::new()
            .name(format!("tail:{}", path.display()))
            .spawn(move || engine.run(control_rx, signals))
            .map_err(TailError::Spawn)?;

        Ok(Self {
            path,
            config,
            events,
            unfollow: UnfollowHandle {
                control,
                requested: Arc::new(AtomicBool::new(false)),
            },
            thread: Some(thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    /// The raw event channel, e.g. for use in `select!`.
    pub fn events(&self) -> &Receiver<TailEvent> {
        &self.events
    }

    /// Next event; `None` once the session is over and drained.
    pub fn recv(&self) -> Option<TailEvent> {
        self.events.recv().ok()
    }

    pub fn try_recv(&self) -> Option<TailEvent> {
        self.events.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<TailEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    pub fn iter(&self) -> impl Iterator<Item = TailEvent> + '_ {
        self.events.iter()
    }

    /// Stop following. Idempotent: the session emits `End` exactly once.
    pub fn unfollow(&self) {
        self.unfollow.unfollow();
    }

    pub fn unfollow_handle(&self) -> UnfollowHandle {
        self.unfollow.clone()
    }

    /// File offset of a chunk's first byte.
    pub fn position_for_chunk(&self, chunk: &Chunk) -> Result<u64, TailError> {
        if !self.config.tag_offsets {
            return Err(TailError::usage(
                "chunk offsets are only available with offset tagging enabled",
            ));
        }
        chunk
            .offset
            .ok_or_else(|| TailError::usage("chunk was not produced by this tailer"))
    }

    /// Turn this tailer into an iterator of delimiter-bounded records.
    pub fn records(self, delimiter: &[u8]) -> Result<Records, TailError> {
        if !self.config.tag_offsets {
            return Err(TailError::usage(
                "record splitting requires offset tagging",
            ));
        }
        if let Some(encoding) = self.config.encoding {
            return Err(TailError::usage(format!(
                "record splitting requires raw bytes, but encoding is {}",
                encoding
            )));
        }
        let splitter = RecordSplitter::new(delimiter)?;
        Ok(Records::new(self, splitter))
    }
}

impl Drop for Tailer {
    fn drop(&mut self) {
        self.unfollow();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
