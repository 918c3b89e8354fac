//! Delimiter-based record splitting over offset-tagged chunks.

use crate::error::TailError;
use crate::event::{Chunk, ChunkData, TailEvent};
use crate::fs::FileId;
use crate::tailer::Tailer;
use memchr::memmem::Finder;
use std::collections::VecDeque;
use std::path::PathBuf;

/// One delimiter-bounded segment of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record bytes including the trailing delimiter, if one was seen.
    pub data: Vec<u8>,
    /// File offset of the first byte.
    pub offset: u64,
    delimiter_len: usize,
}

impl Record {
    /// The record without its trailing delimiter.
    pub fn body(&self) -> &[u8] {
        &self.data[..self.data.len() - self.delimiter_len]
    }

    /// False for a partial record flushed at the end of a stream.
    pub fn is_terminated(&self) -> bool {
        self.delimiter_len > 0
    }
}

/// Re-segments a byte stream at a delimiter.
///
/// Bytes after the last delimiter accumulate until the next chunk completes
/// them or [`finish`](Self::finish) flushes them as a partial record.
pub struct RecordSplitter {
    finder: Finder<'static>,
    pending: Vec<u8>,
    /// Offset of `pending[0]`.
    start: u64,
    /// Index in `pending` where the next delimiter search begins.
    scan_from: usize,
}

impl RecordSplitter {
    pub fn new(delimiter: &[u8]) -> Result<Self, TailError> {
        if delimiter.is_empty() {
            return Err(TailError::usage("record delimiter must not be empty"));
        }
        Ok(Self {
            finder: Finder::new(delimiter).into_owned(),
            pending: Vec::new(),
            start: 0,
            scan_from: 0,
        })
    }

    pub fn delimiter(&self) -> &[u8] {
        self.finder.needle()
    }

    /// Offset of the first byte not yet emitted in a record.
    pub fn pending_offset(&self) -> u64 {
        self.start
    }

    /// Feed bytes read at `offset`, returning every record they complete.
    ///
    /// An offset that does not continue the pending bytes (a new file after
    /// rotation) flushes the pending bytes as a partial record first.
    pub fn push(&mut self, bytes: &[u8], offset: u64) -> Vec<Record> {
        let mut records = Vec::new();
        if !self.pending.is_empty() && offset != self.start + self.pending.len() as u64 {
            records.extend(self.finish());
        }
        if self.pending.is_empty() {
            self.start = offset;
            self.scan_from = 0;
        }
        self.pending.extend_from_slice(bytes);

        let delimiter_len = self.finder.needle().len();
        let mut emitted = 0;
        let mut from = self.scan_from;
        while let Some(found) = self.finder.find(&self.pending[from..]) {
            let end = from + found + delimiter_len;
            records.push(Record {
                data: self.pending[emitted..end].to_vec(),
                offset: self.start + emitted as u64,
                delimiter_len,
            });
            emitted = end;
            from = end;
        }

        self.pending.drain(..emitted);
        self.start += emitted as u64;
        // A delimiter may straddle this chunk and the next one.
        self.scan_from = self.pending.len().saturating_sub(delimiter_len - 1);
        records
    }

    /// Feed a chunk from a tailer running with offset tagging.
    pub fn push_chunk(&mut self, chunk: &Chunk) -> Result<Vec<Record>, TailError> {
        let offset = chunk
            .offset
            .ok_or_else(|| TailError::usage("record splitting requires offset-tagged chunks"))?;
        match &chunk.data {
            ChunkData::Bytes(bytes) => Ok(self.push(bytes, offset)),
            ChunkData::Text(_) => Err(TailError::usage(
                "record splitting requires raw byte chunks",
            )),
        }
    }

    /// Flush pending bytes as a final, unterminated record.
    pub fn finish(&mut self) -> Option<Record> {
        if self.pending.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.pending);
        let record = Record {
            offset: self.start,
            data,
            delimiter_len: 0,
        };
        self.start += record.data.len() as u64;
        self.scan_from = 0;
        Some(record)
    }
}

/// What a [`Records`] iterator yields.
#[derive(Debug)]
pub enum RecordEvent {
    Opened { path: PathBuf, id: FileId },
    Record(Record),
    Rename { from: PathBuf, to: PathBuf },
    Deleted { path: PathBuf },
    Error(TailError),
    End,
}

/// Records of a running tailer, in stream order.
///
/// Ends after [`RecordEvent::End`], or without it when the session stopped
/// after an error. The partial record is flushed in both cases.
pub struct Records {
    tailer: Tailer,
    splitter: RecordSplitter,
    ready: VecDeque<RecordEvent>,
    done: bool,
}

impl Records {
    pub(crate) fn new(tailer: Tailer, splitter: RecordSplitter) -> Self {
        Self {
            tailer,
            splitter,
            ready: VecDeque::new(),
            done: false,
        }
    }

    pub fn tailer(&self) -> &Tailer {
        &self.tailer
    }

    pub fn unfollow(&self) {
        self.tailer.unfollow();
    }

    fn flush(&mut self) {
        if let Some(record) = self.splitter.finish() {
            self.ready.push_back(RecordEvent::Record(record));
        }
    }

    fn handle(&mut self, event: Option<TailEvent>) {
        match event {
            Some(TailEvent::Data(chunk)) => match self.splitter.push_chunk(&chunk) {
                Ok(records) => self
                    .ready
                    .extend(records.into_iter().map(RecordEvent::Record)),
                Err(error) => self.ready.push_back(RecordEvent::Error(error)),
            },
            Some(TailEvent::Opened { path, id }) => {
                self.ready.push_back(RecordEvent::Opened { path, id })
            }
            Some(TailEvent::Rename { from, to }) => {
                self.ready.push_back(RecordEvent::Rename { from, to })
            }
            Some(TailEvent::Deleted { path }) => {
                self.ready.push_back(RecordEvent::Deleted { path })
            }
            Some(TailEvent::Error(error)) => self.ready.push_back(RecordEvent::Error(error)),
            Some(TailEvent::End) => {
                self.flush();
                self.ready.push_back(RecordEvent::End);
                self.done = true;
            }
            None => {
                self.flush();
                self.done = true;
            }
        }
    }
}

impl Iterator for Records {
    type Item = RecordEvent;

    fn next(&mut self) -> Option<RecordEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            if self.done {
                return None;
            }
            let event = self.tailer.recv();
            self.handle(event);
        }
    }
}
