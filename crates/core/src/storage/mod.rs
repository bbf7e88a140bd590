//! Small JSON blobs persisted under logical keys, mirroring browser local storage.

pub mod conversions;
pub mod favorites;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub const CONVERSION_HISTORY_KEY: &str = "conversionHistory";
pub const FAVORITE_PAIRS_KEY: &str = "favoriteCurrencyPairs";
pub const FAVORITE_NEWS_KEY: &str = "favoriteNews";

pub const DEFAULT_STATE_PATH: &str = "fxdash-state.json";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn set(&self, key: &str, value: String) -> anyhow::Result<()>;
}

/// Loads `key`, falling back to `T::default()` when absent or unreadable.
pub fn load_or_default<T>(store: &dyn KeyValueStore, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return T::default(),
        Err(err) => {
            tracing::warn!(key, error = %err, "state read failed; using empty default");
            return T::default();
        }
    };

    serde_json::from_str(&raw).unwrap_or_else(|err| {
        tracing::warn!(key, error = %err, "state entry is corrupted; using empty default");
        T::default()
    })
}

pub fn save<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value).with_context(|| format!("serialize {key} failed"))?;
    store.set(key, raw)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// All keys in one JSON object file. Writes go to a temp file, then rename.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// A missing or corrupted file opens as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<BTreeMap<String, String>>(&text)
                .unwrap_or_else(|err| {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "state file is corrupted; starting empty"
                    );
                    BTreeMap::new()
                }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "state file unreadable; starting empty"
                );
                BTreeMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(entries).context("serialize state file failed")?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)
            .with_context(|| format!("write {} failed", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {} failed", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStore::open(&path);
        save(&store, FAVORITE_NEWS_KEY, &vec!["a", "b"]).unwrap();
        drop(store);

        let reopened = FileStore::open(&path);
        let loaded: Vec<String> = load_or_default(&reopened, FAVORITE_NEWS_KEY);
        assert_eq!(loaded, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn corrupted_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStore::open(&path);
        assert_eq!(store.get(CONVERSION_HISTORY_KEY).unwrap(), None);
    }

    #[test]
    fn corrupted_entry_falls_back_to_default() {
        let store = MemoryStore::new();
        store
            .set(CONVERSION_HISTORY_KEY, "[{\"broken\":".to_string())
            .unwrap();
        let loaded: Vec<u32> = load_or_default(&store, CONVERSION_HISTORY_KEY);
        assert!(loaded.is_empty());
    }

    #[test]
    fn missing_entry_is_default() {
        let store = MemoryStore::new();
        let loaded: Vec<u32> = load_or_default(&store, FAVORITE_PAIRS_KEY);
        assert!(loaded.is_empty());
    }
}
