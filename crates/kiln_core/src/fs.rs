//! File System Abstraction
//!
//! The engine never touches `std::fs` directly. Everything goes through the
//! [`FileSystem`] trait so hosts can redirect asset lookups (packed archives,
//! virtual mounts, test fixtures).
//!
//! Two backends are bundled:
//!
//! | Backend | Use case |
//! |---------|----------|
//! | [`DiskFileSystem`]   | Native builds, searches a list of root directories |
//! | [`MemoryFileSystem`] | Tools and tests, files live in memory with a manual clock |

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::hash::normalize_name;

/// Last-modified timestamp reported by a [`FileSystem`].
pub type FileTime = SystemTime;

/// File system contract consumed by the resource and shader layers.
pub trait FileSystem: Send + Sync {
    /// Resolves a logical name to a full path, `None` when nothing matches.
    fn find(&self, logical: &str) -> Option<PathBuf>;

    /// Full path a new file named `logical` is written to.
    fn resolve_write(&self, logical: &str) -> PathBuf;

    /// Reads the whole file at `full`.
    fn read(&self, full: &Path) -> io::Result<Vec<u8>>;

    /// Opens `full` for writing, truncating any existing content.
    fn write(&self, full: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Last modification time, `None` when the file does not exist.
    fn mod_time(&self, full: &Path) -> Option<FileTime>;

    /// Creates `path` and its parents. Returns `true` when the directory exists afterwards.
    fn create_dir(&self, path: &Path) -> bool;

    /// Reads `full` as UTF-8 text.
    fn read_text(&self, full: &Path) -> io::Result<String> {
        let bytes = self.read(full)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

// ============================================================================
// Disk backend
// ============================================================================

/// Native file system searching a list of root directories in order.
pub struct DiskFileSystem {
    roots: Vec<PathBuf>,
}

impl DiskFileSystem {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            roots: vec![root.as_ref().to_path_buf()],
        }
    }

    /// Adds another search root with lower priority than the existing ones.
    #[must_use]
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        self.roots.push(root.as_ref().to_path_buf());
        self
    }

    #[inline]
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl FileSystem for DiskFileSystem {
    fn find(&self, logical: &str) -> Option<PathBuf> {
        let direct = Path::new(logical);
        if direct.is_absolute() {
            return direct.is_file().then(|| direct.to_path_buf());
        }

        let normalized = normalize_name(logical);
        self.roots
            .iter()
            .map(|root| root.join(&normalized))
            .find(|candidate| candidate.is_file())
    }

    fn resolve_write(&self, logical: &str) -> PathBuf {
        let direct = Path::new(logical);
        if direct.is_absolute() {
            return direct.to_path_buf();
        }
        let normalized = normalize_name(logical);
        match self.roots.first() {
            Some(root) => root.join(normalized),
            None => PathBuf::from(normalized),
        }
    }

    fn read(&self, full: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(full)
    }

    fn write(&self, full: &Path) -> io::Result<Box<dyn Write + Send>> {
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(full)?;
        Ok(Box::new(io::BufWriter::new(file)))
    }

    fn mod_time(&self, full: &Path) -> Option<FileTime> {
        std::fs::metadata(full).and_then(|m| m.modified()).ok()
    }

    fn create_dir(&self, path: &Path) -> bool {
        std::fs::create_dir_all(path).is_ok()
    }
}

// ============================================================================
// Memory backend
// ============================================================================

struct MemoryFile {
    bytes: Vec<u8>,
    modified: FileTime,
}

#[derive(Default)]
struct MemoryInner {
    files: FxHashMap<PathBuf, MemoryFile>,
    dirs: FxHashSet<PathBuf>,
    clock: u64,
}

impl MemoryInner {
    fn tick(&mut self) -> FileTime {
        self.clock += 1;
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.clock)
    }
}

/// In-memory file system.
///
/// Every write advances an internal clock by one second, so modification
/// times are strictly increasing and reload detection is deterministic.
#[derive(Clone, Default)]
pub struct MemoryFileSystem {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a file, stamping it with the next clock tick.
    pub fn insert(&self, name: &str, contents: impl Into<Vec<u8>>) {
        let mut guard = self.inner.write();
        let modified = guard.tick();
        guard.files.insert(
            PathBuf::from(normalize_name(name)),
            MemoryFile {
                bytes: contents.into(),
                modified,
            },
        );
    }

    /// Bumps the modification time without changing the content.
    pub fn touch(&self, name: &str) -> bool {
        let mut guard = self.inner.write();
        let modified = guard.tick();
        match guard.files.get_mut(Path::new(&normalize_name(name))) {
            Some(file) => {
                file.modified = modified;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        self.inner
            .write()
            .files
            .remove(Path::new(&normalize_name(name)))
            .is_some()
    }

    /// Raw bytes of a file, mainly for assertions.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.inner
            .read()
            .files
            .get(Path::new(&normalize_name(name)))
            .map(|f| f.bytes.clone())
    }

    #[must_use]
    pub fn has_dir(&self, name: &str) -> bool {
        self.inner
            .read()
            .dirs
            .contains(Path::new(&normalize_name(name)))
    }
}

fn memory_key(path: &Path) -> PathBuf {
    PathBuf::from(normalize_name(&path.to_string_lossy()))
}

impl FileSystem for MemoryFileSystem {
    fn find(&self, logical: &str) -> Option<PathBuf> {
        let key = PathBuf::from(normalize_name(logical));
        self.inner.read().files.contains_key(&key).then_some(key)
    }

    fn resolve_write(&self, logical: &str) -> PathBuf {
        PathBuf::from(normalize_name(logical))
    }

    fn read(&self, full: &Path) -> io::Result<Vec<u8>> {
        self.inner
            .read()
            .files
            .get(&memory_key(full))
            .map(|f| f.bytes.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, full.display().to_string()))
    }

    fn write(&self, full: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(MemoryWriter {
            key: memory_key(full),
            buffer: Vec::new(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn mod_time(&self, full: &Path) -> Option<FileTime> {
        self.inner
            .read()
            .files
            .get(&memory_key(full))
            .map(|f| f.modified)
    }

    fn create_dir(&self, path: &Path) -> bool {
        self.inner.write().dirs.insert(memory_key(path));
        true
    }
}

/// Buffered writer that publishes its content when flushed or dropped.
struct MemoryWriter {
    key: PathBuf,
    buffer: Vec<u8>,
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryWriter {
    fn publish(&mut self) {
        let mut guard = self.inner.write();
        let modified = guard.tick();
        guard.files.insert(
            self.key.clone(),
            MemoryFile {
                bytes: self.buffer.clone(),
                modified,
            },
        );
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.publish();
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_find_normalizes_names() {
        let fs = MemoryFileSystem::new();
        fs.insert("shaders/common.glsl", "float x;");
        let full = fs.find("shaders/./lib/../common.glsl").unwrap();
        assert_eq!(fs.read_text(&full).unwrap(), "float x;");
        assert!(fs.find("shaders/missing.glsl").is_none());
    }

    #[test]
    fn memory_mod_time_advances_on_every_write() {
        let fs = MemoryFileSystem::new();
        fs.insert("a.glsl", "1");
        let full = fs.find("a.glsl").unwrap();
        let first = fs.mod_time(&full).unwrap();
        fs.insert("a.glsl", "2");
        let second = fs.mod_time(&full).unwrap();
        assert!(second > first);
        assert!(fs.touch("a.glsl"));
        assert!(fs.mod_time(&full).unwrap() > second);
    }

    #[test]
    fn memory_writer_publishes_on_drop() {
        let fs = MemoryFileSystem::new();
        {
            let mut out = fs.write(Path::new("cache/blob.bin")).unwrap();
            out.write_all(b"abc").unwrap();
        }
        assert_eq!(fs.contents("cache/blob.bin").unwrap(), b"abc");
    }

    #[test]
    fn disk_finds_files_under_roots() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("shaders")).unwrap();
        std::fs::write(dir.path().join("shaders/a.glsl"), "void main(){}").unwrap();

        let fs = DiskFileSystem::new(dir.path());
        let full = fs.find("shaders\\a.glsl").unwrap();
        assert_eq!(fs.read_text(&full).unwrap(), "void main(){}");
        assert!(fs.mod_time(&full).is_some());
        assert!(fs.find("shaders/b.glsl").is_none());
    }

    #[test]
    fn disk_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DiskFileSystem::new(dir.path());
        let target = dir.path().join("cache/nested/out.bin");
        {
            let mut out = fs.write(&target).unwrap();
            out.write_all(&[1, 2, 3]).unwrap();
            out.flush().unwrap();
        }
        assert_eq!(std::fs::read(&target).unwrap(), vec![1, 2, 3]);
    }
}
