//! File-based storage backend for persistent storage.
//!
//! The backend owns a directory with the following layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! └─ store.json        # JSON object of every key/value pair
//! ```
//!
//! Every mutation rewrites `store.json` with the write-then-rename pattern so
//! a crash leaves either the old or the new snapshot on disk, never a mix.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const DATA_FILE: &str = "store.json";
const DATA_TEMP: &str = "store.json.tmp";

/// A directory-backed storage backend.
///
/// This backend provides persistent storage using OS file APIs.
/// Data survives process restarts.
///
/// # Durability
///
/// Each `set_string`/`remove_key` returns only after the new snapshot has
/// been written, fsynced and atomically renamed into place.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads. The `LOCK`
/// file additionally keeps a second process from opening the same directory.
///
/// # Example
///
/// ```no_run
/// use harbor_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("harbor_data")).unwrap();
/// backend.set_string("k", "persistent value").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a file backend in the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another process holds the lock (returns `Locked`)
    /// - The existing data file cannot be parsed (returns `Corrupted`)
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(StorageError::corrupted(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let entries = Self::load(&path.join(DATA_FILE))?;
        debug!(path = %path.display(), entries = entries.len(), "opened file backend");

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the data file.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.path.join(DATA_FILE)
    }

    fn load(data_path: &Path) -> StorageResult<BTreeMap<String, String>> {
        if !data_path.exists() {
            return Ok(BTreeMap::new());
        }

        let mut file = File::open(data_path)?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;

        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&data)
            .map_err(|e| StorageError::corrupted(format!("invalid data file: {e}")))
    }

    /// Writes a full snapshot atomically.
    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let temp_path = self.path.join(DATA_TEMP);
        let data = serde_json::to_vec(entries)
            .map_err(|e| StorageError::corrupted(format!("cannot encode snapshot: {e}")))?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.data_path())?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journaling covers rename durability
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove_key(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.write();
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn list_all_keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        let entries = self.entries.read();
        self.persist(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_set_and_get() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.set_string("k", "v").unwrap();
        assert_eq!(backend.get_string("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn file_persistence_across_reopen() {
        let dir = tempdir().unwrap();

        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.set_string("a", "1").unwrap();
            backend.set_string("b", "2").unwrap();
            backend.remove_key("a").unwrap();
        }

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.get_string("a").unwrap(), None);
        assert_eq!(backend.get_string("b").unwrap().as_deref(), Some("2"));
        assert_eq!(backend.list_all_keys().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = FileBackend::open(dir.path()).unwrap();

        let second = FileBackend::open(dir.path());
        assert!(matches!(second, Err(StorageError::Locked)));
    }

    #[test]
    fn file_creates_nested_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let backend = FileBackend::open(&nested).unwrap();
        backend.set_string("k", "v").unwrap();
        assert!(backend.data_path().exists());
    }

    #[test]
    fn file_corrupted_data_file_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(DATA_FILE), b"{not json").unwrap();

        let result = FileBackend::open(dir.path());
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_empty_data_file_opens_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(DATA_FILE), b"").unwrap();

        let backend = FileBackend::open(dir.path()).unwrap();
        assert!(backend.list_all_keys().unwrap().is_empty());
    }

    #[test]
    fn file_flush_succeeds() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.set_string("k", "v").unwrap();
        assert!(backend.flush().is_ok());
    }
}
