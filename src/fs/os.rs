//! [`Filesystem`] backed by the real operating system.

use super::{DirectoryEntry, FileId, FileStat, Filesystem, WatchSink};
use crate::watcher::PathWatcher;
use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Real filesystem: std files, positional reads, `notify` watches.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    type Handle = File;
    type Watch = PathWatcher;

    fn open(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    fn read_at(&self, handle: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = read_at(handle, &mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn stat(&self, handle: &File) -> io::Result<FileStat> {
        let metadata = handle.metadata()?;
        Ok(FileStat {
            id: FileId::from_metadata(&metadata),
            size: metadata.len(),
        })
    }

    fn stat_path(&self, path: &Path) -> io::Result<FileStat> {
        let metadata = fs::metadata(path)?;
        Ok(FileStat {
            id: FileId::from_metadata(&metadata),
            size: metadata.len(),
        })
    }

    fn close(&self, handle: File) -> io::Result<()> {
        close(handle)
    }

    fn watch(&self, path: &Path, sink: WatchSink) -> io::Result<PathWatcher> {
        PathWatcher::new(path, sink).map_err(io::Error::other)
    }

    fn list_directory(&self, dir: &Path) -> io::Result<Vec<DirectoryEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            // Entries can vanish between readdir and stat; skip those.
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            entries.push(DirectoryEntry {
                path: entry.path(),
                id: FileId::from_metadata(&metadata),
            });
        }
        Ok(entries)
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    loop {
        match file.read_at(buf, offset) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Close the descriptor and report what `close(2)` says, which dropping a
/// `File` would discard.
#[cfg(unix)]
fn close(file: File) -> io::Result<()> {
    use std::os::unix::io::IntoRawFd;

    let fd = file.into_raw_fd();
    // SAFETY: `fd` was just released from an owned `File`, nothing else
    // refers to it and it is closed exactly once here.
    let rc = unsafe { libc::close(fd) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn close(file: File) -> io::Result<()> {
    drop(file);
    Ok(())
}
