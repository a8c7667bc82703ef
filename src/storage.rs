//! Durable key-value backends for ringtone preferences.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage quota exceeded: {required} bytes needed, {quota} allowed")]
    QuotaExceeded { required: usize, quota: usize },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One change in a batch write. `None` removes the key.
pub type Change = (String, Option<String>);

/// A durable string-to-string map.
///
/// `write_batch` is all-or-nothing: on error the previous contents are left
/// untouched.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn write_batch(&self, changes: Vec<Change>) -> Result<(), StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write_batch(vec![(key.to_string(), Some(value.to_string()))])
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.write_batch(vec![(key.to_string(), None)])
    }
}

fn apply_changes(
    current: &BTreeMap<String, String>,
    changes: Vec<Change>,
    quota: Option<usize>,
) -> Result<BTreeMap<String, String>, StoreError> {
    let mut next = current.clone();
    for (key, value) in changes {
        match value {
            Some(value) => {
                next.insert(key, value);
            }
            None => {
                next.remove(&key);
            }
        }
    }

    if let Some(quota) = quota {
        let required: usize = next.iter().map(|(k, v)| k.len() + v.len()).sum();
        if required > quota {
            return Err(StoreError::QuotaExceeded { required, quota });
        }
    }

    Ok(next)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Volatile store, used in tests and when no path is configured
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota: Some(quota),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn write_batch(&self, changes: Vec<Change>) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        let next = apply_changes(&entries, changes, self.quota)?;
        *entries = next;
        Ok(())
    }
}

/// JSON object on disk, rewritten atomically on every batch
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed.
    /// A missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P, quota: Option<usize>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "preference file opened");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            quota,
        })
    }

    /// Like [`FileStore::open`], but a corrupt file is moved aside to
    /// `<name>.corrupt` and an empty store is opened in its place.
    pub fn open_or_recover<P: AsRef<Path>>(
        path: P,
        quota: Option<usize>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        match Self::open(path, quota) {
            Err(StoreError::Corrupt(e)) => {
                let mut backup = path.as_os_str().to_owned();
                backup.push(".corrupt");
                let backup = PathBuf::from(backup);
                tracing::warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    "preference file is corrupt, starting empty: {e}"
                );
                std::fs::rename(path, &backup)?;
                Self::open(path, quota)
            }
            result => result,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, entries)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn write_batch(&self, changes: Vec<Change>) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        let next = apply_changes(&entries, changes, self.quota)?;
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("ringInternal"), None);

        store.set("ringInternal", "ring3.wav").unwrap();
        assert_eq!(store.get("ringInternal").as_deref(), Some("ring3.wav"));

        store.remove("ringInternal").unwrap();
        assert_eq!(store.get("ringInternal"), None);

        // Removing twice is fine
        store.remove("ringInternal").unwrap();
    }

    #[test]
    fn test_quota_rejects_whole_batch() {
        let store = MemoryStore::with_quota(40);
        store.set("a", "small").unwrap();

        let result = store.write_batch(vec![
            ("b".to_string(), Some("x".repeat(10))),
            ("c".to_string(), Some("y".repeat(100))),
        ]);
        assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));
        assert_eq!(store.get("a").as_deref(), Some("small"));
        assert_eq!(store.get("b"), None);
    }

    #[test]
    fn test_quota_counts_replacements_not_additions() {
        let store = MemoryStore::with_quota(20);
        store.set("key", &"v".repeat(15)).unwrap();
        store.set("key", &"w".repeat(15)).unwrap();
        assert_eq!(store.get("key").unwrap(), "w".repeat(15));
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let store = FileStore::open(&path, None).unwrap();
        store.set("ringExternal", "iphone.mp3").unwrap();
        store.set("ringInternal", "ring4.wav").unwrap();
        store.remove("ringInternal").unwrap();
        drop(store);

        let reopened = FileStore::open(&path, None).unwrap();
        assert_eq!(reopened.get("ringExternal").as_deref(), Some("iphone.mp3"));
        assert_eq!(reopened.get("ringInternal"), None);
    }

    #[test]
    fn test_file_store_quota_leaves_file_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");

        let store = FileStore::open(&path, Some(64)).unwrap();
        store.set("ringExternal", "iphone.mp3").unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let result = store.set("ringInternal", &"z".repeat(200));
        assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert_eq!(store.get("ringInternal"), None);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileStore::open(&path, None),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_file_store_recovers_from_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{\"ringInternal\": ").unwrap();

        let store = FileStore::open_or_recover(&path, None).unwrap();
        assert_eq!(store.get("ringInternal"), None);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("prefs.json.corrupt")).unwrap(),
            "{\"ringInternal\": "
        );

        // The recovered store is usable and persists
        store.set("ringInternal", "ring3.wav").unwrap();
        let reopened = FileStore::open_or_recover(&path, None).unwrap();
        assert_eq!(reopened.get("ringInternal").as_deref(), Some("ring3.wav"));
    }

    #[test]
    fn test_file_store_empty_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "").unwrap();

        let store = FileStore::open(&path, None).unwrap();
        assert_eq!(store.get("ringExternal"), None);
    }
}
