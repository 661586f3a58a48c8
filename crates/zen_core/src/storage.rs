use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

pub const TASKS_KEY: &str = "zenplan_tasks";
pub const HABITS_KEY: &str = "zenplan_habits";
pub const EVENTS_KEY: &str = "zenplan_events";

pub const ALL_KEYS: [&str; 3] = [TASKS_KEY, HABITS_KEY, EVENTS_KEY];

/// Durable string-keyed storage. Implementations must fully replace the
/// previous value on `set`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Stores each key as `<key>.json` inside a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("unable to create data directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        fs::write(&path, value).with_context(|| format!("failed to write {}", path.display()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// What to do when a stored collection cannot be read or parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptDataPolicy {
    /// Log a warning and start from the default value.
    #[default]
    FallbackToDefault,
    /// Surface the failure to whoever is loading.
    Fail,
}

/// JSON persistence for the three state slices on top of a [`KeyValueStore`].
pub struct Persistence {
    backend: Arc<dyn KeyValueStore>,
    policy: CorruptDataPolicy,
}

impl Persistence {
    pub fn new(backend: Arc<dyn KeyValueStore>, policy: CorruptDataPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> CorruptDataPolicy {
        self.policy
    }

    /// Load `key`, returning `default()` when nothing has been stored yet.
    pub fn load<T, F>(&self, key: &str, default: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> T,
    {
        let parsed = self.backend.get(key).and_then(|raw| match raw {
            Some(raw) => serde_json::from_str::<T>(&raw)
                .map(Some)
                .with_context(|| format!("stored value for `{key}` is not valid")),
            None => Ok(None),
        });

        match parsed {
            Ok(Some(value)) => {
                debug!(key, "loaded stored collection");
                Ok(value)
            }
            Ok(None) => {
                debug!(key, "nothing stored, using default");
                Ok(default())
            }
            Err(err) => match self.policy {
                CorruptDataPolicy::FallbackToDefault => {
                    warn!(key, error = %format!("{err:#}"), "discarding unreadable collection");
                    Ok(default())
                }
                CorruptDataPolicy::Fail => Err(err),
            },
        }
    }

    pub fn save<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("failed to serialize `{key}`"))?;
        self.backend.set(key, &raw)?;
        debug!(key, bytes = raw.len(), "persisted collection");
        Ok(())
    }

    pub fn clear_all(&self) -> Result<()> {
        for key in ALL_KEYS {
            self.backend.remove(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{seed_habits, Habit};

    fn memory_persistence(policy: CorruptDataPolicy) -> (Arc<MemoryStore>, Persistence) {
        let backend = Arc::new(MemoryStore::new());
        let persistence = Persistence::new(backend.clone(), policy);
        (backend, persistence)
    }

    #[test]
    fn absent_key_yields_default() {
        let (_, persistence) = memory_persistence(CorruptDataPolicy::Fail);
        let habits: Vec<Habit> = persistence.load(HABITS_KEY, seed_habits).unwrap();
        assert_eq!(habits, seed_habits());
    }

    #[test]
    fn empty_array_is_not_replaced_by_seed() {
        let (backend, persistence) = memory_persistence(CorruptDataPolicy::Fail);
        backend.set(HABITS_KEY, "[]").unwrap();
        let habits: Vec<Habit> = persistence.load(HABITS_KEY, seed_habits).unwrap();
        assert!(habits.is_empty());
    }

    #[test]
    fn corrupt_value_falls_back_when_configured() {
        let (backend, persistence) = memory_persistence(CorruptDataPolicy::FallbackToDefault);
        backend.set(HABITS_KEY, "{not json").unwrap();
        let habits: Vec<Habit> = persistence.load(HABITS_KEY, seed_habits).unwrap();
        assert_eq!(habits.len(), 3);
    }

    #[test]
    fn corrupt_value_errors_under_fail_policy() {
        let (backend, persistence) = memory_persistence(CorruptDataPolicy::Fail);
        backend.set(HABITS_KEY, "[{\"id\": 7}]").unwrap();
        let result: Result<Vec<Habit>> = persistence.load(HABITS_KEY, seed_habits);
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains(HABITS_KEY));
    }

    #[test]
    fn save_overwrites_and_clear_removes_all_keys() {
        let (backend, persistence) = memory_persistence(CorruptDataPolicy::Fail);
        persistence.save(HABITS_KEY, &seed_habits()).unwrap();
        persistence.save(HABITS_KEY, &Vec::<Habit>::new()).unwrap();
        assert_eq!(backend.get(HABITS_KEY).unwrap().as_deref(), Some("[]"));

        persistence.save(TASKS_KEY, &Vec::<Habit>::new()).unwrap();
        persistence.clear_all().unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn file_store_treats_missing_file_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path().join("nested")).expect("open store");
        assert_eq!(store.get(TASKS_KEY).unwrap(), None);
        store.set(TASKS_KEY, "[]").unwrap();
        assert_eq!(store.get(TASKS_KEY).unwrap().as_deref(), Some("[]"));
        assert!(store.root().join("zenplan_tasks.json").exists());
        store.remove(TASKS_KEY).unwrap();
        store.remove(TASKS_KEY).unwrap();
        assert_eq!(store.get(TASKS_KEY).unwrap(), None);
    }
}
