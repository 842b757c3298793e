// Whole-document JSON persistence, one file per collection.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode collection `{collection}`: {source}")]
    Encode {
        collection: Collection,
        source: serde_json::Error,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// The documents the application persists. Each collection is read and
/// replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Players,
    Lineup,
    Field,
    Configurations,
    Games,
    GameStats,
    AiSettings,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Players,
        Collection::Lineup,
        Collection::Field,
        Collection::Configurations,
        Collection::Games,
        Collection::GameStats,
        Collection::AiSettings,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Players => "players",
            Collection::Lineup => "lineup",
            Collection::Field => "field",
            Collection::Configurations => "configurations",
            Collection::Games => "games",
            Collection::GameStats => "game_stats",
            Collection::AiSettings => "ai_settings",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

/// Synchronous key-value persistence keyed by collection.
pub trait DocumentStore: Send + Sync {
    /// Load a collection's document. `Ok(None)` when it has never been saved.
    fn load(&self, collection: Collection) -> Result<Option<Value>, StoreError>;

    /// Replace a collection's document.
    fn save(&self, collection: Collection, document: &Value) -> Result<(), StoreError>;
}

/// Load and deserialize a collection. Missing documents yield `None`.
pub fn load_collection<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
) -> Result<Option<T>, StoreError> {
    let Some(value) = store.load(collection)? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| StoreError::Parse {
            path: PathBuf::from(collection.file_name()),
            source,
        })
}

/// Serialize and save a collection.
pub fn save_collection<T: Serialize + ?Sized>(
    store: &dyn DocumentStore,
    collection: Collection,
    document: &T,
) -> Result<(), StoreError> {
    let value =
        serde_json::to_value(document).map_err(|source| StoreError::Encode { collection, source })?;
    store.save(collection, &value)
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// Stores each collection as a pretty-printed JSON file in `data_dir`.
///
/// Writes go to `<name>.json.tmp` first and are renamed over the target so a
/// crash mid-write never leaves a truncated document behind.
pub struct JsonFileStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (or create) the data directory.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir).map_err(|source| StoreError::Write {
            path: data_dir.clone(),
            source,
        })?;
        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, collection: Collection) -> PathBuf {
        self.data_dir.join(collection.file_name())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("write lock poisoned".into()))
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self, collection: Collection) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(collection);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        let value = serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(Some(value))
    }

    fn save(&self, collection: Collection, document: &Value) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let path = self.path_for(collection);
        let tmp_path = self.data_dir.join(format!("{}.tmp", collection.file_name()));

        let text = serde_json::to_string_pretty(document)
            .map_err(|source| StoreError::Encode { collection, source })?;
        std::fs::write(&tmp_path, text).map_err(|source| StoreError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;

        debug!(collection = collection.name(), "saved document");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory store for tests. `set_fail_writes(true)` makes every `save`
/// fail so callers' rollback paths can be exercised.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<Collection, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn documents(&self) -> Result<MutexGuard<'_, HashMap<Collection, Value>>, StoreError> {
        self.documents
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self, collection: Collection) -> Result<Option<Value>, StoreError> {
        Ok(self.documents()?.get(&collection).cloned())
    }

    fn save(&self, collection: Collection, document: &Value) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "writes disabled (collection `{collection}`)"
            )));
        }
        self.documents()?.insert(collection, document.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Slot {
        slot_number: u8,
        player_id: Option<String>,
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dugout_store_{name}_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn file_store_missing_document_is_none() {
        let dir = scratch_dir("missing");
        let store = JsonFileStore::open(&dir).unwrap();
        assert!(store.load(Collection::Players).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_store_save_then_load() {
        let dir = scratch_dir("save_load");
        let store = JsonFileStore::open(&dir).unwrap();

        let doc = json!([{ "slot_number": 1, "player_id": "p1" }]);
        store.save(Collection::Lineup, &doc).unwrap();

        assert_eq!(store.load(Collection::Lineup).unwrap(), Some(doc));
        assert!(dir.join("lineup.json").exists());
        assert!(!dir.join("lineup.json.tmp").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_store_overwrites_whole_document() {
        let dir = scratch_dir("overwrite");
        let store = JsonFileStore::open(&dir).unwrap();

        store.save(Collection::Games, &json!([1, 2, 3])).unwrap();
        store.save(Collection::Games, &json!([])).unwrap();

        assert_eq!(store.load(Collection::Games).unwrap(), Some(json!([])));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_store_reports_corrupt_document() {
        let dir = scratch_dir("corrupt");
        let store = JsonFileStore::open(&dir).unwrap();
        std::fs::write(dir.join("players.json"), "{not json").unwrap();

        let err = store.load(Collection::Players).unwrap_err();
        match err {
            StoreError::Parse { path, .. } => assert!(path.ends_with("players.json")),
            other => panic!("expected Parse, got: {other}"),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn typed_helpers_round_trip_through_memory_store() {
        let store = MemoryStore::new();
        let slots = vec![
            Slot { slot_number: 1, player_id: Some("a".into()) },
            Slot { slot_number: 2, player_id: None },
        ];
        save_collection(&store, Collection::Lineup, &slots).unwrap();

        let loaded: Option<Vec<Slot>> = load_collection(&store, Collection::Lineup).unwrap();
        assert_eq!(loaded, Some(slots));
    }

    #[test]
    fn typed_load_of_wrong_shape_is_parse_error() {
        let store = MemoryStore::new();
        store.save(Collection::Lineup, &json!({ "oops": true })).unwrap();

        let err = load_collection::<Vec<Slot>>(&store, Collection::Lineup).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn memory_store_fail_writes_keeps_previous_document() {
        let store = MemoryStore::new();
        store.save(Collection::Field, &json!(["before"])).unwrap();

        store.set_fail_writes(true);
        assert!(store.save(Collection::Field, &json!(["after"])).is_err());
        assert_eq!(store.load(Collection::Field).unwrap(), Some(json!(["before"])));

        store.set_fail_writes(false);
        store.save(Collection::Field, &json!(["after"])).unwrap();
        assert_eq!(store.load(Collection::Field).unwrap(), Some(json!(["after"])));
    }

    #[test]
    fn collection_file_names() {
        assert_eq!(Collection::GameStats.file_name(), "game_stats.json");
        assert_eq!(Collection::AiSettings.to_string(), "ai_settings");
        assert_eq!(Collection::ALL.len(), 7);
    }
}
