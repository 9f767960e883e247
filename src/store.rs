// src/store.rs
//! Keyed persistence for tracks and geofences

use crate::error::{GpsError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::BTreeMap,
    marker::PhantomData,
    path::{Path, PathBuf},
};
use tracing::warn;

/// Anything stored under a string id.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// One record per entity, keyed by id.
pub trait Store<T: Keyed> {
    /// Insert or overwrite the record with `value.key()`.
    fn put(&mut self, value: &T) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<T>>;
    /// Returns whether a record was removed.
    fn delete(&mut self, key: &str) -> Result<bool>;
    fn list(&self) -> Result<Vec<T>>;
}

/// Volatile store, mostly for tests and one-shot runs.
#[derive(Debug, Clone)]
pub struct MemoryStore<T> {
    records: BTreeMap<String, T>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed + Clone> Store<T> for MemoryStore<T> {
    fn put(&mut self, value: &T) -> Result<()> {
        self.records.insert(value.key().to_string(), value.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<T>> {
        Ok(self.records.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        Ok(self.records.remove(key).is_some())
    }

    fn list(&self) -> Result<Vec<T>> {
        Ok(self.records.values().cloned().collect())
    }
}

/// One pretty-printed JSON file per record under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore<T> {
    dir: PathBuf,
    _record: PhantomData<T>,
}

impl<T> JsonFileStore<T> {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _record: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(GpsError::Other(format!("Invalid record id {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl<T: Keyed + Serialize + DeserializeOwned> Store<T> for JsonFileStore<T> {
    fn put(&mut self, value: &T) -> Result<()> {
        let path = self.path_for(value.key())?;
        std::fs::create_dir_all(&self.dir)?;

        let contents = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(GpsError::Io(e)),
        }
    }

    fn list(&self) -> Result<Vec<T>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = std::fs::read_to_string(&path)
                .map_err(GpsError::from)
                .and_then(|contents| serde_json::from_str(&contents).map_err(GpsError::from));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
    }

    impl Keyed for Note {
        fn key(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    fn exercise(store: &mut impl Store<Note>) {
        assert!(store.get("a").unwrap().is_none());

        store.put(&note("a", "first")).unwrap();
        store.put(&note("b", "second")).unwrap();
        store.put(&note("a", "overwritten")).unwrap();

        assert_eq!(store.get("a").unwrap(), Some(note("a", "overwritten")));
        assert_eq!(store.list().unwrap().len(), 2);

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.list().unwrap(), vec![note("b", "second")]);
    }

    #[test]
    fn test_memory_store() {
        exercise(&mut MemoryStore::<Note>::new());
    }

    #[test]
    fn test_json_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: JsonFileStore<Note> = JsonFileStore::new(dir.path().join("notes"));
        exercise(&mut store);
        assert!(dir.path().join("notes").join("b.json").exists());
    }

    #[test]
    fn test_json_store_list_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Note> = JsonFileStore::new(dir.path().join("nothing"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_json_store_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: JsonFileStore<Note> = JsonFileStore::new(dir.path());
        store.put(&note("ok", "fine")).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        assert_eq!(store.list().unwrap(), vec![note("ok", "fine")]);
    }

    #[test]
    fn test_json_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: JsonFileStore<Note> = JsonFileStore::new(dir.path());
        assert!(store.put(&note("../escape", "x")).is_err());
        assert!(store.get("").is_err());
        assert!(store.delete("a/b").is_err());
    }
}
