//! Storage backends for run directories.
//!
//! The training loop only touches disk through [`RunStorage`], so tests can
//! drive interrupt and resume cycles against [`MemoryStorage`].

use crate::error::{Result, TtsError};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Minimal filesystem capability used by experiment runs.
pub trait RunStorage: Send + Sync {
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Replace `path` with `bytes` so readers see either the old or the new
    /// content, never a partial file.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// File names directly inside `dir`, sorted.
    fn list(&self, dir: &Path) -> Result<Vec<String>>;

    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl RunStorage for FsStorage {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| TtsError::storage(path, e))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        // The temp file lives next to the target so the rename stays on one filesystem.
        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| TtsError::storage(dir, e))?;
        file.write_all(bytes)
            .and_then(|()| file.as_file().sync_all())
            .map_err(|e| TtsError::storage(file.path(), e))?;
        file.persist(path)
            .map_err(|e| TtsError::storage(path, e.error))?;
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| TtsError::storage(path, e))
    }

    fn list(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| TtsError::storage(dir, e))? {
            let entry = entry.map_err(|e| TtsError::storage(dir, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if let (true, Some(name)) = (is_file, entry.file_name().to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(TtsError::storage(path, e)),
            _ => Ok(()),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, Vec<u8>>,
}

/// In-process storage for tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned map is still consistent: every mutation is a single insert or retain.
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Every stored file path, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        self.lock().files.keys().cloned().collect()
    }

    /// Overwrite a file without the atomic path, for corruption tests.
    pub fn put_raw(&self, path: &Path, bytes: Vec<u8>) {
        self.lock().files.insert(path.to_path_buf(), bytes);
    }
}

impl RunStorage for MemoryStorage {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        for ancestor in path.ancestors().filter(|p| !p.as_os_str().is_empty()) {
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock();
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        if !parent.as_os_str().is_empty() && !state.dirs.contains(parent) {
            return Err(TtsError::storage(parent, "directory does not exist"));
        }
        state.files.insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| TtsError::storage(path, "no such file"))
    }

    fn list(&self, dir: &Path) -> Result<Vec<String>> {
        let state = self.lock();
        if !state.dirs.contains(dir) {
            return Err(TtsError::storage(dir, "no such directory"));
        }
        Ok(state
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        state.dirs.retain(|d| !d.starts_with(path));
        state.files.retain(|f, _| !f.starts_with(path));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.lock();
        state.dirs.contains(path) || state.files.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn RunStorage, root: &Path) {
        let run = root.join("run-a");
        storage.create_dir_all(&run).expect("mkdir");
        storage
            .write_atomic(&run.join("b.bin"), b"second")
            .expect("write b");
        storage
            .write_atomic(&run.join("a.bin"), b"first")
            .expect("write a");
        storage
            .write_atomic(&run.join("a.bin"), b"replaced")
            .expect("overwrite a");
        assert_eq!(storage.list(&run).expect("list"), vec!["a.bin", "b.bin"]);
        assert_eq!(storage.read(&run.join("a.bin")).expect("read"), b"replaced");
        assert!(storage.exists(&run));
        storage.remove_dir_all(&run).expect("remove");
        assert!(!storage.exists(&run));
        assert!(!storage.exists(&run.join("a.bin")));
    }

    #[test]
    fn filesystem_storage_lists_and_removes() {
        let dir = tempfile::tempdir().expect("tempdir");
        exercise(&FsStorage, dir.path());
    }

    #[test]
    fn memory_storage_behaves_like_filesystem() {
        exercise(&MemoryStorage::new(), Path::new("/runs"));
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("checkpoint.bin");
        FsStorage.write_atomic(&target, &[1, 2, 3]).expect("write");
        let names = FsStorage.list(dir.path()).expect("list");
        assert_eq!(names, vec!["checkpoint.bin"]);
    }

    #[test]
    fn memory_write_requires_parent_directory() {
        let storage = MemoryStorage::new();
        let err = storage
            .write_atomic(Path::new("/missing/file"), b"x")
            .expect_err("no parent");
        assert!(matches!(err, TtsError::Storage { .. }));
    }
}
