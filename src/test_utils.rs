//! Shared test doubles: an in-memory [`Filesystem`] and a log writing fixture.

use crate::fs::{parent_dir, DirectoryEntry, FileId, FileStat, Filesystem, WatchEvent, WatchSink};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use xxhash_rust::xxh3::xxh3_64;

/// Device number reported for every mock file.
pub const MOCK_DEV: u64 = 1;

/// Operations that can be made to fail with [`MockFilesystem::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Open,
    Read,
    Stat,
    StatPath,
    Close,
    Watch,
    List,
}

/// Descriptor of a mock file. Keeps reading the inode after renames and
/// removals, like a POSIX descriptor.
#[derive(Debug, PartialEq, Eq)]
pub struct MockHandle {
    ino: u64,
}

impl MockHandle {
    pub fn ino(&self) -> u64 {
        self.ino
    }
}

enum WatchTarget {
    File(u64),
    Dir(PathBuf),
}

struct Registration {
    id: u64,
    target: WatchTarget,
    sink: WatchSink,
}

/// Guard for a mock watch; dropping it unregisters the sink.
pub struct MockWatch {
    id: u64,
    state: Arc<Mutex<MockState>>,
}

impl Drop for MockWatch {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.watches.retain(|w| w.id != self.id);
        }
    }
}

#[derive(Default)]
struct MockState {
    files: HashMap<u64, Vec<u8>>,
    names: HashMap<PathBuf, u64>,
    dirs: HashSet<PathBuf>,
    next_ino: u64,
    next_watch: u64,
    watches: Vec<Registration>,
    auto_notify: bool,
    failures: HashMap<MockOp, VecDeque<io::ErrorKind>>,
    open_handles: usize,
    reads: usize,
    lists: usize,
    /// Bytes `stat` reports beyond what reads return, per inode.
    size_slack: HashMap<u64, u64>,
    reads_in_flight: usize,
    max_reads_in_flight: usize,
}

impl MockState {
    fn take_failure(&mut self, op: MockOp) -> io::Result<()> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(kind) => Err(io::Error::new(kind, format!("injected {:?} failure", op))),
            None => Ok(()),
        }
    }

    fn ino_of(&self, path: &Path) -> io::Result<u64> {
        self.names
            .get(path)
            .copied()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn fire_file(&self, ino: u64, event: WatchEvent) {
        if !self.auto_notify {
            return;
        }
        for watch in &self.watches {
            if matches!(watch.target, WatchTarget::File(watched) if watched == ino) {
                (watch.sink)(event.clone());
            }
        }
    }

    fn fire_dir(&self, dir: &Path) {
        if !self.auto_notify {
            return;
        }
        for watch in &self.watches {
            if matches!(&watch.target, WatchTarget::Dir(watched) if watched == dir) {
                (watch.sink)(WatchEvent::Change);
            }
        }
    }
}

/// In-memory filesystem with inodes, failure injection and notifications.
///
/// Mutations fire notifications the way inotify does: file watches follow
/// the inode, directory watches see entries appear and disappear.
#[derive(Clone)]
pub struct MockFilesystem {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFilesystem {
    pub fn new() -> Self {
        let state = MockState {
            next_ino: 100,
            auto_notify: true,
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Create a file with a fresh inode, replacing any existing name.
    pub fn create(&self, path: impl AsRef<Path>, data: &[u8]) -> FileId {
        let path = path.as_ref();
        let mut state = self.lock();
        let ino = state.next_ino;
        state.next_ino += 1;
        state.files.insert(ino, data.to_vec());
        state.names.insert(path.to_path_buf(), ino);
        let dir = parent_dir(path).to_path_buf();
        state.dirs.insert(dir.clone());
        state.fire_dir(&dir);
        FileId::new(MOCK_DEV, ino)
    }

    pub fn create_dir(&self, dir: impl AsRef<Path>) {
        self.lock().dirs.insert(dir.as_ref().to_path_buf());
    }

    pub fn append(&self, path: impl AsRef<Path>, data: &[u8]) {
        let mut state = self.lock();
        let ino = state.ino_of(path.as_ref()).unwrap();
        state.files.get_mut(&ino).unwrap().extend_from_slice(data);
        state.fire_file(ino, WatchEvent::Change);
    }

    /// Append through an inode, as a writer holding an unlinked file does.
    pub fn append_to(&self, id: FileId, data: &[u8]) {
        let mut state = self.lock();
        state.files.get_mut(&id.ino()).unwrap().extend_from_slice(data);
        state.fire_file(id.ino(), WatchEvent::Change);
    }

    /// Make `stat` on the file report `extra` bytes that reads never return,
    /// like size metadata running ahead of the data.
    pub fn inflate_size(&self, path: impl AsRef<Path>, extra: u64) {
        let mut state = self.lock();
        let ino = state.ino_of(path.as_ref()).unwrap();
        state.size_slack.insert(ino, extra);
    }

    pub fn truncate(&self, path: impl AsRef<Path>, len: usize) {
        let mut state = self.lock();
        let ino = state.ino_of(path.as_ref()).unwrap();
        state.files.get_mut(&ino).unwrap().truncate(len);
        state.fire_file(ino, WatchEvent::Change);
    }

    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) {
        let (from, to) = (from.as_ref(), to.as_ref());
        let mut state = self.lock();
        let ino = state.names.remove(from).unwrap();
        state.names.insert(to.to_path_buf(), ino);
        state.dirs.insert(parent_dir(to).to_path_buf());
        state.fire_file(ino, WatchEvent::Rename);
        state.fire_dir(parent_dir(from));
        if parent_dir(from) != parent_dir(to) {
            state.fire_dir(parent_dir(to));
        }
    }

    /// Unlink a name. Open handles keep reading the inode.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.lock();
        let ino = state.names.remove(path).unwrap();
        state.fire_file(ino, WatchEvent::Rename);
        state.fire_dir(parent_dir(path));
    }

    /// Deliver `event` to every watch on `path` regardless of auto notification.
    pub fn notify(&self, path: impl AsRef<Path>, event: WatchEvent) {
        let path = path.as_ref();
        let state = self.lock();
        let ino = state.names.get(path).copied();
        for watch in &state.watches {
            let hit = match &watch.target {
                WatchTarget::File(watched) => Some(*watched) == ino,
                WatchTarget::Dir(dir) => dir == path,
            };
            if hit {
                (watch.sink)(event.clone());
            }
        }
    }

    /// Turn automatic notifications on mutations on or off.
    pub fn set_auto_notify(&self, enabled: bool) {
        self.lock().auto_notify = enabled;
    }

    /// Make the next call of `op` fail with `kind`. Failures queue up.
    pub fn fail_next(&self, op: MockOp, kind: io::ErrorKind) {
        self.lock().failures.entry(op).or_default().push_back(kind);
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let state = self.lock();
        let ino = state.names.get(path.as_ref())?;
        state.files.get(ino).cloned()
    }

    pub fn watch_count(&self) -> usize {
        self.lock().watches.len()
    }

    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn lists(&self) -> usize {
        self.lock().lists
    }

    pub fn max_reads_in_flight(&self) -> usize {
        self.lock().max_reads_in_flight
    }
}

impl Filesystem for MockFilesystem {
    type Handle = MockHandle;
    type Watch = MockWatch;

    fn open(&self, path: &Path) -> io::Result<MockHandle> {
        let mut state = self.lock();
        state.take_failure(MockOp::Open)?;
        let ino = state.ino_of(path)?;
        state.open_handles += 1;
        Ok(MockHandle { ino })
    }

    fn read_at(&self, handle: &MockHandle, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        {
            let mut state = self.lock();
            state.reads += 1;
            state.reads_in_flight += 1;
            state.max_reads_in_flight = state.max_reads_in_flight.max(state.reads_in_flight);
        }
        thread::yield_now();
        let mut state = self.lock();
        state.reads_in_flight -= 1;
        state.take_failure(MockOp::Read)?;
        let data = state
            .files
            .get(&handle.ino)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn stat(&self, handle: &MockHandle) -> io::Result<FileStat> {
        let mut state = self.lock();
        state.take_failure(MockOp::Stat)?;
        let slack = state.size_slack.get(&handle.ino).copied().unwrap_or(0);
        let size = state.files.get(&handle.ino).map_or(0, Vec::len) as u64 + slack;
        Ok(FileStat {
            id: FileId::new(MOCK_DEV, handle.ino),
            size,
        })
    }

    fn stat_path(&self, path: &Path) -> io::Result<FileStat> {
        let mut state = self.lock();
        state.take_failure(MockOp::StatPath)?;
        let ino = state.ino_of(path)?;
        let size = state.files.get(&ino).map_or(0, Vec::len) as u64;
        Ok(FileStat {
            id: FileId::new(MOCK_DEV, ino),
            size,
        })
    }

    fn close(&self, _handle: MockHandle) -> io::Result<()> {
        let mut state = self.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
        state.take_failure(MockOp::Close)
    }

    fn watch(&self, path: &Path, sink: WatchSink) -> io::Result<MockWatch> {
        let mut state = self.lock();
        state.take_failure(MockOp::Watch)?;
        let target = match state.names.get(path) {
            Some(ino) => WatchTarget::File(*ino),
            None if state.dirs.contains(path) => WatchTarget::Dir(path.to_path_buf()),
            None => return Err(io::Error::from(io::ErrorKind::NotFound)),
        };
        let id = state.next_watch;
        state.next_watch += 1;
        state.watches.push(Registration { id, target, sink });
        Ok(MockWatch {
            id,
            state: Arc::clone(&self.state),
        })
    }

    fn list_directory(&self, dir: &Path) -> io::Result<Vec<DirectoryEntry>> {
        let mut state = self.lock();
        state.lists += 1;
        state.take_failure(MockOp::List)?;
        if !state.dirs.contains(dir) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        let mut entries: Vec<DirectoryEntry> = state
            .names
            .iter()
            .filter(|(name, _)| parent_dir(name) == dir)
            .map(|(name, ino)| DirectoryEntry {
                path: name.clone(),
                id: FileId::new(MOCK_DEV, *ino),
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

/// Appends identifiable `<id>:foo:bar` lines to a real file, flushing and
/// syncing after every line so a tailer sees each one separately.
pub struct LogFileGenerator {
    file: File,
    path: PathBuf,
    seed: u64,
    lines: Vec<String>,
}

impl LogFileGenerator {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let seed = xxh3_64(path.to_string_lossy().as_bytes());
        Ok(Self {
            file,
            path,
            seed,
            lines: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one line and return it, including the trailing newline.
    pub fn write_line(&mut self) -> io::Result<String> {
        let n = self.lines.len() as u64;
        let id = xxh3_64(&(self.seed ^ n).to_le_bytes());
        let line = format!("{:08x}:foo:bar\n", id as u32);
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_all()?;
        self.lines.push(line.clone());
        Ok(line)
    }

    /// Write `count` lines, pausing `interval` between them.
    pub fn write_lines(&mut self, count: usize, interval: Duration) -> io::Result<()> {
        for i in 0..count {
            if i > 0 {
                thread::sleep(interval);
            }
            self.write_line()?;
        }
        Ok(())
    }

    /// Every line written so far, in order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mock_rename_keeps_inode() {
        let fs = MockFilesystem::new();
        let id = fs.create("/logs/app.log", b"abc");
        fs.rename("/logs/app.log", "/logs/app.log.1");

        assert_eq!(fs.stat_path(Path::new("/logs/app.log.1")).unwrap().id, id);
        assert!(fs.stat_path(Path::new("/logs/app.log")).is_err());
    }

    #[test]
    fn test_mock_handle_survives_remove() {
        let fs = MockFilesystem::new();
        fs.create("/logs/app.log", b"abc");
        let handle = fs.open(Path::new("/logs/app.log")).unwrap();
        fs.remove("/logs/app.log");

        assert_eq!(fs.read_at(&handle, 1, 10).unwrap(), b"bc");
    }

    #[test]
    fn test_mock_injected_failure_is_one_shot() {
        let fs = MockFilesystem::new();
        fs.create("/logs/app.log", b"abc");
        fs.fail_next(MockOp::Open, io::ErrorKind::PermissionDenied);

        let err = fs.open(Path::new("/logs/app.log")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(fs.open(Path::new("/logs/app.log")).is_ok());
    }

    #[test]
    fn test_mock_watch_unregisters_on_drop() {
        let fs = MockFilesystem::new();
        fs.create("/logs/app.log", b"");
        let (tx, rx) = crossbeam::channel::unbounded();
        let watch = fs
            .watch(
                Path::new("/logs/app.log"),
                Box::new(move |event| {
                    let _ = tx.send(event);
                }),
            )
            .unwrap();

        fs.append("/logs/app.log", b"x");
        assert_eq!(rx.try_recv(), Ok(WatchEvent::Change));

        drop(watch);
        assert_eq!(fs.watch_count(), 0);
        fs.append("/logs/app.log", b"y");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_mock_list_directory() {
        let fs = MockFilesystem::new();
        let a = fs.create("/logs/a.log", b"");
        fs.create("/other/b.log", b"");

        let entries = fs.list_directory(Path::new("/logs")).unwrap();
        assert_eq!(
            entries,
            vec![DirectoryEntry {
                path: PathBuf::from("/logs/a.log"),
                id: a
            }]
        );
    }

    #[test]
    fn test_generator_writes_identifiable_lines() {
        let dir = TempDir::new().unwrap();
        let mut generator = LogFileGenerator::create(dir.path().join("gen.log")).unwrap();
        generator.write_lines(3, Duration::ZERO).unwrap();

        let content = std::fs::read_to_string(generator.path()).unwrap();
        assert_eq!(content, generator.lines().concat());
        for line in generator.lines() {
            assert_eq!(line.len(), 17);
            assert!(line.ends_with(":foo:bar\n"));
        }
        assert_ne!(generator.lines()[0], generator.lines()[1]);
    }
}
