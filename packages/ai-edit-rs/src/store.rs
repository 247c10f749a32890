use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::warn;

pub const DEFAULT_STORAGE_KEY: &str = "markdown-content";

const LOCK_FILE: &str = ".store.lock";
const DOCUMENT_EXTENSION: &str = "md";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key-value persistence for the document's current value.
pub trait DocumentStore: Send + Sync {
    fn load(&self, key: &str) -> StoreResult<Option<String>>;
    fn save(&self, key: &str, value: &str) -> StoreResult<()>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).load(key)
    }

    fn save(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).save(key, value)
    }
}

/// Stored value for `key`, or `initial` when nothing is stored or the store
/// cannot be read.
pub fn load_or_initial(store: &dyn DocumentStore, key: &str, initial: &str) -> String {
    match store.load(key) {
        Ok(Some(value)) => value,
        Ok(None) => initial.to_string(),
        Err(error) => {
            warn!(%error, key, "failed to load stored document, using initial value");
            initial.to_string()
        }
    }
}

/// One file per key under a root directory. Writes go through a temp file
/// and a rename so readers never observe a partial document.
pub struct FileDocumentStore {
    root_dir: PathBuf,
    lock_path: PathBuf,
}

impl FileDocumentStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let root_dir = root_dir.into();
        fs::create_dir_all(&root_dir)?;
        let lock_path = root_dir.join(LOCK_FILE);
        Ok(Self {
            root_dir,
            lock_path,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn document_path(&self, key: &str) -> StoreResult<PathBuf> {
        let key = sanitize_key(key)?;
        Ok(self.root_dir.join(format!("{key}.{DOCUMENT_EXTENSION}")))
    }
}

impl DocumentStore for FileDocumentStore {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.document_path(key)?;
        if !path.exists() {
            return Ok(None);
        }

        let _lock = lock_file(&self.lock_path, false)?;
        Ok(Some(fs::read_to_string(&path)?))
    }

    fn save(&self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.document_path(key)?;
        let _lock = lock_file(&self.lock_path, true)?;

        let mut temp = NamedTempFile::new_in(&self.root_dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path).map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> StoreResult<BTreeMap<String, String>> {
        let entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.clone())
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub(crate) fn sanitize_key(key: &str) -> StoreResult<&str> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.contains('/') || key.contains('\\') {
        return Err(StoreError::InvalidKey(format!(
            "{key} contains a path separator"
        )));
    }
    if key.contains("..") {
        return Err(StoreError::InvalidKey(format!(
            "{key} contains parent traversal"
        )));
    }
    Ok(key)
}

fn lock_file(lock_path: &Path, write: bool) -> StoreResult<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?;

    if write {
        file.lock_exclusive()?;
    } else {
        file.lock_shared()?;
    }

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::new(dir.path()).unwrap();

        assert_eq!(store.load(DEFAULT_STORAGE_KEY).unwrap(), None);
        store.save(DEFAULT_STORAGE_KEY, "# One").unwrap();
        store.save(DEFAULT_STORAGE_KEY, "# Two").unwrap();
        assert_eq!(
            store.load(DEFAULT_STORAGE_KEY).unwrap().as_deref(),
            Some("# Two")
        );
        assert!(dir.path().join("markdown-content.md").exists());
    }

    #[test]
    fn file_store_rejects_unsafe_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::new(dir.path()).unwrap();
        for key in ["", "../escape", "a/b", "a\\b"] {
            assert!(matches!(store.save(key, "x"), Err(StoreError::InvalidKey(_))), "{key}");
        }
    }

    #[test]
    fn load_falls_back_to_initial_value() {
        let store = MemoryDocumentStore::new();
        assert_eq!(load_or_initial(&store, "doc", "initial"), "initial");
        store.save("doc", "saved").unwrap();
        assert_eq!(load_or_initial(&store, "doc", "initial"), "saved");
    }

    #[test]
    fn shared_store_sees_writes_through_arc() {
        let store = Arc::new(MemoryDocumentStore::new());
        let handle: Box<dyn DocumentStore> = Box::new(Arc::clone(&store));
        handle.save("doc", "value").unwrap();
        assert_eq!(store.entries().unwrap().get("doc").map(String::as_str), Some("value"));
    }
}
