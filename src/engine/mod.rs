//! The tail engine: one state machine per tailed path.
//!
//! An engine owns at most one open descriptor and drives every filesystem
//! call for its session from a single thread. Notifications, poll ticks and
//! control messages are funnelled into one `select!` loop, so reads, opens
//! and closes never overlap.
//!
//! ```text
//! Opening ──ok──> Attached ──rotation──> RotationPending ──path exists──> Opening
//!    │               │                          │
//!    └──fail──> Closed <──unfollow / drain──────┘
//! ```
//!
//! Watches are tagged with a generation number that changes on every open
//! and every rotation wait. Signals from an older generation describe a
//! descriptor or directory the engine no longer cares about and are dropped.

pub mod session;

pub use session::TailSession;

use crate::config::TailConfig;
use crate::encoding::TextDecoder;
use crate::error::TailError;
use crate::event::{Chunk, TailEvent};
use crate::fs::{parent_dir, Filesystem, WatchEvent, WatchSink};
use crossbeam::channel::{never, tick, unbounded, Receiver, Sender};
use crossbeam::select;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Opening,
    Attached,
    /// The old descriptor is closed; waiting for the path to exist again.
    RotationPending,
    Closed,
}

/// Requests from the consumer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Unfollow,
}

/// A watch notification stamped with the generation that registered it.
#[derive(Debug)]
pub struct WatchSignal {
    generation: u64,
    event: WatchEvent,
}

/// Outcome of reading until there is nothing left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    Idle,
    /// The file is now shorter than the read position.
    Truncated,
    /// An error was reported and the session closed.
    Failed,
}

/// The event channel plus the per-session decoding state.
struct Output {
    events: Sender<TailEvent>,
    decoder: Option<TextDecoder>,
    tag_offsets: bool,
    disconnected: bool,
}

impl Output {
    fn send(&mut self, event: TailEvent) {
        if self.disconnected {
            return;
        }
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
            self.disconnected = true;
        }
    }

    fn data(&mut self, bytes: Vec<u8>, offset: u64) {
        let offset = self.tag_offsets.then_some(offset);
        let chunk = match self.decoder.as_mut() {
            Some(decoder) => {
                let text = decoder.decode(&bytes);
                if text.is_empty() {
                    return;
                }
                Chunk::text(text, offset)
            }
            None => Chunk::bytes(bytes, offset),
        };
        self.send(TailEvent::Data(chunk));
    }

    /// Emit whatever the decoder still holds from the current file.
    fn flush_decoder(&mut self, offset: u64) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        let text = decoder.finish();
        if !text.is_empty() {
            let offset = self.tag_offsets.then_some(offset);
            self.send(TailEvent::Data(Chunk::text(text, offset)));
        }
    }
}

pub struct Engine<F: Filesystem> {
    fs: F,
    config: TailConfig,
    /// The configured path; the target of every (re)open.
    path: PathBuf,
    state: State,
    generation: u64,
    session: Option<TailSession<F::Handle>>,
    watch: Option<F::Watch>,
    signals: Sender<WatchSignal>,
    output: Output,
    ended: bool,
}

impl<F: Filesystem> Engine<F> {
    /// Build an engine. Returns the receiving end of its watch signals,
    /// to be handed back to [`Engine::run`].
    pub fn new(
        fs: F,
        path: PathBuf,
        config: TailConfig,
        events: Sender<TailEvent>,
    ) -> (Self, Receiver<WatchSignal>) {
        let (signals, signal_rx) = unbounded();
        let output = Output {
            events,
            decoder: config.encoding.map(TextDecoder::new),
            tag_offsets: config.tag_offsets,
            disconnected: false,
        };
        let engine = Self {
            fs,
            config,
            path,
            state: State::Opening,
            generation: 0,
            session: None,
            watch: None,
            signals,
            output,
            ended: false,
        };
        (engine, signal_rx)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn session(&self) -> Option<&TailSession<F::Handle>> {
        self.session.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn is_running(&self) -> bool {
        self.state != State::Closed && !self.output.disconnected
    }

    /// Drive the session until it closes or the consumer goes away.
    pub fn run(mut self, control: Receiver<Control>, signals: Receiver<WatchSignal>) {
        let ticker = match self.config.poll_interval {
            Some(interval) => tick(interval),
            None => never(),
        };

        self.open();
        while self.is_running() {
            select! {
                // A disconnected control channel means the handle is gone.
                recv(control) -> _ => self.unfollow(),
                recv(signals) -> signal => {
                    if let Ok(signal) = signal {
                        self.on_signal(signal);
                    }
                }
                recv(ticker) -> _ => self.poll(),
            }
        }
        self.release();
    }

    /// Initial open. A failure here is reported and ends the session.
    pub fn open(&mut self) {
        if self.attach(false) {
            self.sync(false);
        }
    }

    pub fn on_signal(&mut self, signal: WatchSignal) {
        if signal.generation != self.generation {
            trace!(
                generation = signal.generation,
                current = self.generation,
                "dropping stale watch signal"
            );
            return;
        }
        match (self.state, signal.event) {
            (_, WatchEvent::Error(message)) => {
                warn!(path = %self.path.display(), %message, "watch error");
                self.output.send(TailEvent::Error(TailError::Watch {
                    path: self.path.clone(),
                    message,
                }));
            }
            (State::Attached, WatchEvent::Change) => self.sync(false),
            (State::Attached, WatchEvent::Rename) => self.sync(true),
            (State::RotationPending, _) => self.try_reattach(),
            _ => {}
        }
    }

    /// Poll tick: pick up growth and renames that produced no notification.
    pub fn poll(&mut self) {
        match self.state {
            State::Attached => self.sync(false),
            State::RotationPending => self.try_reattach(),
            State::Opening | State::Closed => {}
        }
    }

    /// Stop following. Idempotent; `End` is sent exactly once.
    pub fn unfollow(&mut self) {
        if self.state == State::Closed {
            return;
        }
        debug!(path = %self.path.display(), "unfollow requested");
        self.shutdown();
    }

    /// Open, stat and register the watch as one step, so no signal for the
    /// new generation is handled before the session is fully set up.
    fn attach(&mut self, reattaching: bool) -> bool {
        let fallback = if reattaching {
            State::RotationPending
        } else {
            State::Closed
        };
        self.state = State::Opening;
        let path = self.path.clone();

        let handle = match self.fs.open(&path) {
            Ok(handle) => handle,
            Err(source) if reattaching && source.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "waiting for file to be created");
                self.state = fallback;
                return false;
            }
            Err(source) => {
                let error = TailError::Open { path, source };
                warn!(%error);
                self.output.send(TailEvent::Error(error));
                self.state = fallback;
                return false;
            }
        };

        let stat = match self.fs.stat(&handle) {
            Ok(stat) => stat,
            Err(source) => {
                let error = TailError::Stat {
                    path: path.clone(),
                    source,
                };
                warn!(%error);
                self.output.send(TailEvent::Error(error));
                self.close_handle(&path, handle);
                self.state = fallback;
                return false;
            }
        };

        self.generation += 1;
        self.watch = None;
        if self.config.follow && self.config.register_watches {
            self.register_watch(&path);
        }

        info!(path = %path.display(), id = %stat.id, size = stat.size, "opened");
        self.session = Some(TailSession::new(path.clone(), handle, stat.id));
        self.state = State::Attached;
        self.output.send(TailEvent::Opened { path, id: stat.id });
        true
    }

    fn register_watch(&mut self, path: &Path) {
        match self.fs.watch(path, self.watch_sink()) {
            Ok(watch) => self.watch = Some(watch),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to register watch");
                self.output.send(TailEvent::Error(TailError::Watch {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }));
            }
        }
    }

    fn watch_sink(&self) -> WatchSink {
        let signals = self.signals.clone();
        let generation = self.generation;
        Box::new(move |event| {
            let _ = signals.send(WatchSignal { generation, event });
        })
    }

    /// Read everything new, then verify the path still names the open file.
    ///
    /// Also runs right after an open, which catches a rotation that happened
    /// before the watch was in place.
    fn sync(&mut self, renamed: bool) {
        if self.state != State::Attached {
            return;
        }
        let drain = self.read_to_end();
        if drain == Drain::Failed {
            return;
        }
        if !self.config.follow {
            self.shutdown();
            return;
        }
        if drain == Drain::Truncated {
            self.on_truncated();
            if self.state != State::Attached {
                return;
            }
        }
        if renamed {
            self.resolve_rename();
        } else {
            self.check_path();
        }
    }

    fn read_to_end(&mut self) -> Drain {
        let Some(session) = self.session.as_mut() else {
            return Drain::Idle;
        };
        if session.read_in_flight {
            trace!("read already in flight");
            return Drain::Idle;
        }
        session.read_in_flight = true;

        let result = loop {
            let offset = session.position;
            let bytes = match self
                .fs
                .read_at(&session.handle, offset, self.config.chunk_size)
            {
                Ok(bytes) => bytes,
                Err(source) => {
                    break Err(TailError::Read {
                        path: session.path.clone(),
                        offset,
                        source,
                    })
                }
            };

            let empty = bytes.is_empty();
            if !empty {
                trace!(offset, len = bytes.len(), "read chunk");
                session.position += bytes.len() as u64;
                session.truncation_reported = false;
                self.output.data(bytes, offset);
            }

            // An empty read ends the drain even if the size says otherwise;
            // the next notification or poll tick retries.
            match self.fs.stat(&session.handle) {
                Ok(stat) if stat.size < session.position => break Ok(Drain::Truncated),
                Ok(stat) if stat.size > session.position && !empty => continue,
                Ok(_) => break Ok(Drain::Idle),
                Err(source) => {
                    break Err(TailError::Stat {
                        path: session.path.clone(),
                        source,
                    })
                }
            }
        };
        session.read_in_flight = false;

        match result {
            Ok(drain) => drain,
            Err(error) => {
                self.fail(error);
                Drain::Failed
            }
        }
    }

    fn on_truncated(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if self.config.survive_rotation {
            info!(path = %session.path.display(), "file truncated, reopening");
            self.begin_rotation();
        } else if !session.truncation_reported {
            session.truncation_reported = true;
            warn!(
                path = %session.path.display(),
                position = session.position,
                "file truncated, waiting for it to grow past the read position"
            );
        }
    }

    /// Stat the tracked path; a failure or a different file means rename.
    fn check_path(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let current = match self.fs.stat_path(&session.path) {
            Ok(stat) if stat.id == session.id => return,
            Ok(stat) => {
                debug!(path = %session.path.display(), id = %stat.id, "path now names another file");
                Some(stat.id)
            }
            Err(e) => {
                debug!(path = %session.path.display(), error = %e, "path no longer resolves");
                None
            }
        };
        if session.deletion_reported && session.path_after_deletion == current {
            trace!(path = %session.path.display(), "path unchanged since deletion");
            return;
        }

        self.resolve_rename();
        if let Some(session) = self.session.as_mut() {
            if session.deletion_reported {
                session.path_after_deletion = current;
            }
        }
    }

    /// Find the tracked file in its directory by identity.
    fn resolve_rename(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let directory = parent_dir(&session.path).to_path_buf();
        let entries = match self.fs.list_directory(&directory) {
            Ok(entries) => entries,
            Err(source) => {
                let error = TailError::RenameResolution {
                    path: session.path.clone(),
                    directory,
                    source,
                };
                warn!(%error);
                self.output.send(TailEvent::Error(error));
                return;
            }
        };

        let matches: Vec<_> = entries.iter().filter(|e| e.id == session.id).collect();
        if matches.is_empty() {
            if session.deletion_reported {
                return;
            }
            session.deletion_reported = true;
            info!(path = %session.path.display(), "tailed file deleted");
            self.output.send(TailEvent::Deleted {
                path: session.path.clone(),
            });
            if self.config.survive_rotation {
                self.begin_rotation();
            }
            return;
        }

        if matches
            .iter()
            .any(|entry| session.has_file_name(entry.path.file_name()))
        {
            debug!(path = %session.path.display(), "spurious rename notification");
            return;
        }
        let Some(name) = matches[0].path.file_name() else {
            return;
        };

        let to = session.path.with_file_name(name);
        let from = std::mem::replace(&mut session.path, to.clone());
        info!(from = %from.display(), to = %to.display(), "tailed file renamed");
        self.output.send(TailEvent::Rename { from, to });
        if self.config.survive_rotation {
            self.begin_rotation();
        }
    }

    /// Finish the old file, close it and wait for the path to reappear.
    fn begin_rotation(&mut self) {
        if self.read_to_end() == Drain::Failed {
            return;
        }
        let Some(session) = self.session.take() else {
            return;
        };
        self.output.flush_decoder(session.position);
        self.close_handle(&session.path, session.handle);

        self.watch = None;
        self.generation += 1;
        self.state = State::RotationPending;
        info!(path = %self.path.display(), "rotation detected, waiting for new file");

        if self.config.register_watches {
            let directory = parent_dir(&self.path).to_path_buf();
            self.register_watch(&directory);
        }
        self.try_reattach();
    }

    fn try_reattach(&mut self) {
        if self.state != State::RotationPending {
            return;
        }
        if self.attach(true) {
            self.sync(false);
        }
    }

    fn fail(&mut self, error: TailError) {
        warn!(%error, "tail session failed");
        self.output.send(TailEvent::Error(error));
        self.watch = None;
        if let Some(session) = self.session.take() {
            self.close_handle(&session.path, session.handle);
        }
        self.state = State::Closed;
    }

    fn shutdown(&mut self) {
        self.watch = None;
        if let Some(session) = self.session.take() {
            self.output.flush_decoder(session.position);
            self.close_handle(&session.path, session.handle);
        }
        self.state = State::Closed;
        if !self.ended {
            self.ended = true;
            info!(path = %self.path.display(), "tail ended");
            self.output.send(TailEvent::End);
        }
    }

    fn close_handle(&mut self, path: &Path, handle: F::Handle) {
        if let Err(source) = self.fs.close(handle) {
            let error = TailError::Close {
                path: path.to_path_buf(),
                source,
            };
            warn!(%error);
            self.output.send(TailEvent::Error(error));
        }
    }

    /// Close anything still open once the loop exits.
    fn release(&mut self) {
        self.watch = None;
        if let Some(session) = self.session.take() {
            if let Err(e) = self.fs.close(session.handle) {
                warn!(path = %session.path.display(), error = %e, "failed to close");
            }
        }
    }
}
