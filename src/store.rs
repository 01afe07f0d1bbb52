//! Persistent key-value storage for offline state
//!
//! ## Table of Contents
//! - **KeyValueStore**: Trait for storage backends
//! - **MemoryStore**: In-memory store (default, and for tests)
//! - **FileStore**: JSON-file persistent storage
//!
//! The offline queue and the local interaction store both sit on this
//! trait. `FileStore` writes through to disk on every mutation: the
//! durability guarantee for queued writes matters more than latency here.

use crate::error::{ApiError, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Trait for storage backends
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a value
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a key
    async fn remove(&self, key: &str) -> Result<()>;

    /// List keys with a prefix
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Store name for logging
    fn name(&self) -> &str;
}

/// Get and deserialize JSON from the store.
///
/// Records use `#[serde(default)]` on newer fields, so blobs written by
/// older versions still load (additive migration on read).
pub async fn store_get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes)?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Serialize and set JSON in the store
pub async fn store_set_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, bytes).await
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new memory store
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut data = self.data.write().await;
        data.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let data = self.data.read().await;
        Ok(data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// File-based persistent storage.
///
/// One JSON file holds the whole key space; every mutation rewrites it
/// before returning, so completed writes survive a process restart.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl FileStore {
    /// Open or create a file store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ApiError::unknown(format!("failed to read store: {}", e)))?;
            match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        %err,
                        "Discarding unparseable store file, starting empty"
                    );
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        info!(path = %path.display(), "File store opened");

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    async fn persist(&self) -> Result<()> {
        let data = self.data.read().await;
        let contents = serde_json::to_string(&*data)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ApiError::unknown(format!("failed to create dir: {}", e)))?;
        }

        // Write to a sibling temp file and rename, so a crash mid-write
        // leaves the previous state intact.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .map_err(|e| ApiError::unknown(format!("failed to write store: {}", e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| ApiError::unknown(format!("failed to replace store: {}", e)))?;

        debug!(path = %self.path.display(), "File store persisted");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        {
            let mut data = self.data.write().await;
            data.insert(key.to_string(), value);
        }
        self.persist().await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        {
            let mut data = self.data.write().await;
            data.remove(key);
        }
        self.persist().await
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let data = self.data.read().await;
        Ok(data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Type alias for a shared store
pub type BoxedKeyValueStore = Arc<dyn KeyValueStore>;

/// Create a memory store
pub fn memory_store() -> BoxedKeyValueStore {
    Arc::new(MemoryStore::new()) as BoxedKeyValueStore
}

/// Key prefixes for persisted record kinds
pub mod keys {
    /// Offline queue item prefix
    pub const QUEUE: &str = "gamedeck/queue";
    /// Local interaction record prefix
    pub const INTERACTIONS: &str = "gamedeck/interactions";

    /// Build a queue item key
    pub fn queue_item(id: &str) -> String {
        format!("{}/{}", QUEUE, id)
    }

    /// Key for the local likes set
    pub fn likes() -> String {
        format!("{}/likes", INTERACTIONS)
    }

    /// Key for the local bookmarks set
    pub fn bookmarks() -> String {
        format!("{}/bookmarks", INTERACTIONS)
    }

    /// Key for the local ratings map
    pub fn ratings() -> String {
        format!("{}/ratings", INTERACTIONS)
    }

    /// Key for the local play-session log
    pub fn play_sessions() -> String {
        format!("{}/sessions", INTERACTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();

        store.set("key1", b"value1".to_vec()).await.unwrap();
        let value = store.get("key1").await.unwrap();
        assert_eq!(value, Some(b"value1".to_vec()));

        store.remove("key1").await.unwrap();
        let value = store.get("key1").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_prefix() {
        let store = MemoryStore::new();

        store.set("prefix/a", b"1".to_vec()).await.unwrap();
        store.set("prefix/b", b"2".to_vec()).await.unwrap();
        store.set("other/c", b"3".to_vec()).await.unwrap();

        let keys = store.list_prefix("prefix/").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"prefix/a".to_string()));
        assert!(keys.contains(&"prefix/b".to_string()));
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::new();

        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct TestData {
            name: String,
            value: i32,
        }

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        store_set_json(&store, "json_key", &data).await.unwrap();
        let loaded: Option<TestData> = store_get_json(&store, "json_key").await.unwrap();
        assert_eq!(loaded, Some(data));
    }

    #[tokio::test]
    async fn test_legacy_record_missing_fields() {
        let store = MemoryStore::new();

        #[derive(Debug, Serialize, serde::Deserialize)]
        struct Record {
            game_id: String,
            #[serde(default)]
            source: String,
        }

        // A blob written before `source` existed still loads.
        store
            .set("legacy", br#"{"game_id":"g1"}"#.to_vec())
            .await
            .unwrap();
        let loaded: Option<Record> = store_get_json(&store, "legacy").await.unwrap();
        let record = loaded.unwrap();
        assert_eq!(record.game_id, "g1");
        assert_eq!(record.source, "");
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.set("k", b"v".to_vec()).await.unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_corrupt_store_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json {{{").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.get("k").await.unwrap().is_none());

        // The store stays usable: mutations persist past the bad file.
        store.set("k", b"v".to_vec()).await.unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(keys::queue_item("abc"), "gamedeck/queue/abc");
        assert_eq!(keys::likes(), "gamedeck/interactions/likes");
        assert_eq!(keys::ratings(), "gamedeck/interactions/ratings");
    }
}
