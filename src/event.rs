use crate::error::TailError;
use crate::fs::FileId;
use std::path::PathBuf;

/// Payload of a chunk: raw bytes, or text when the session has an encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkData {
    Bytes(Vec<u8>),
    Text(String),
}

impl ChunkData {
    /// Bytes as delivered; for text this is its UTF-8 form.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ChunkData::Bytes(bytes) => bytes,
            ChunkData::Text(text) => text.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// A run of bytes read from the tailed file in one read call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: ChunkData,
    /// File position of the first byte. Only set with offset tagging.
    pub offset: Option<u64>,
}

impl Chunk {
    pub fn bytes(data: Vec<u8>, offset: Option<u64>) -> Self {
        Self {
            data: ChunkData::Bytes(data),
            offset,
        }
    }

    pub fn text(data: String, offset: Option<u64>) -> Self {
        Self {
            data: ChunkData::Text(data),
            offset,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }
}

/// Everything a tail session reports, in the order it happened.
#[derive(Debug)]
pub enum TailEvent {
    /// A descriptor was opened, initially or after a rotation.
    Opened { path: PathBuf, id: FileId },
    Data(Chunk),
    /// The tailed file was found under a new name.
    Rename { from: PathBuf, to: PathBuf },
    /// The tailed file disappeared from its directory.
    Deleted { path: PathBuf },
    /// No more events will follow. Sent exactly once, after `unfollow` or the
    /// first drain of a non-following session.
    End,
    Error(TailError),
}

impl TailEvent {
    pub fn is_end(&self) -> bool {
        matches!(self, TailEvent::End)
    }
}
