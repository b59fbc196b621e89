//! Object store abstraction
//!
//! The backing store is content-addressed: every get/put is keyed by the
//! 20-byte object digest, so readers can treat the store as an immutable
//! snapshot and caches keyed by id never need invalidation.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::object::{Commit, ObjectId, ObjectKind, Tree};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(ObjectId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Generic object store interface
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get raw object payload by id
    async fn get(&self, id: ObjectId) -> Result<Bytes>;

    /// Check if an object exists
    async fn exists(&self, id: ObjectId) -> Result<bool>;

    /// Insert an object payload, returning its id
    async fn put(&self, kind: ObjectKind, data: Bytes) -> Result<ObjectId>;

    /// Make previously inserted objects durable
    async fn flush(&self) -> Result<()>;
}

/// Typed helpers shared by all stores.
pub async fn load_commit(store: &dyn ObjectStore, id: ObjectId) -> Result<Commit> {
    let data = store.get(id).await?;
    Ok(Commit::from_bytes(&data)?)
}

pub async fn load_tree(store: &dyn ObjectStore, id: ObjectId) -> Result<Tree> {
    let data = store.get(id).await?;
    Ok(Tree::from_bytes(&data)?)
}

pub async fn put_tree(store: &dyn ObjectStore, tree: &Tree) -> Result<ObjectId> {
    store.put(ObjectKind::Tree, Bytes::from(tree.to_bytes()?)).await
}

pub async fn put_commit(store: &dyn ObjectStore, commit: &Commit) -> Result<ObjectId> {
    store
        .put(ObjectKind::Commit, Bytes::from(commit.to_bytes()?))
        .await
}

/// Persistent store backed by a Fjall LSM keyspace
///
/// The same keyspace also carries the server's metadata partition (branch
/// refs, revision maps, lock tables); see [`MetaStore`].
pub struct FjallStore {
    keyspace: fjall::Keyspace,
    objects: fjall::PartitionHandle,
    meta: fjall::PartitionHandle,
}

impl FjallStore {
    /// Open or create a store under the given directory.
    pub fn open(path: &Path) -> Result<Self> {
        let keyspace = fjall::Config::new(path)
            .open()
            .map_err(|e| StorageError::Database(format!("failed to open keyspace: {e}")))?;
        let objects = keyspace
            .open_partition("objects", fjall::PartitionCreateOptions::default())
            .map_err(|e| StorageError::Database(format!("failed to open objects: {e}")))?;
        let meta = keyspace
            .open_partition("meta", fjall::PartitionCreateOptions::default())
            .map_err(|e| StorageError::Database(format!("failed to open meta: {e}")))?;
        Ok(Self {
            keyspace,
            objects,
            meta,
        })
    }

    /// Metadata key-value view of the same keyspace.
    pub fn meta(&self) -> MetaStore {
        MetaStore {
            keyspace: self.keyspace.clone(),
            partition: self.meta.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for FjallStore {
    async fn get(&self, id: ObjectId) -> Result<Bytes> {
        self.objects
            .get(id.as_bytes())
            .map_err(|e| StorageError::Database(format!("get failed: {e}")))?
            .map(|v| Bytes::from(v.to_vec()))
            .ok_or(StorageError::NotFound(id))
    }

    async fn exists(&self, id: ObjectId) -> Result<bool> {
        self.objects
            .contains_key(id.as_bytes())
            .map_err(|e| StorageError::Database(format!("exists check failed: {e}")))
    }

    async fn put(&self, kind: ObjectKind, data: Bytes) -> Result<ObjectId> {
        let id = ObjectId::for_object(kind, &data);
        self.objects
            .insert(id.as_bytes(), data.as_ref())
            .map_err(|e| StorageError::Database(format!("put failed: {e}")))?;
        Ok(id)
    }

    async fn flush(&self) -> Result<()> {
        self.keyspace
            .persist(fjall::PersistMode::SyncAll)
            .map_err(|e| StorageError::Database(format!("persist failed: {e}")))
    }
}

/// Durable key-value access for server metadata.
///
/// Keys are versioned by their callers (`locks.<repo>.<schema>`,
/// `revs.<branch>.<schema>`) so schema changes coexist with old data.
#[derive(Clone)]
pub struct MetaStore {
    keyspace: fjall::Keyspace,
    partition: fjall::PartitionHandle,
}

impl MetaStore {
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .partition
            .get(key)
            .map_err(|e| StorageError::Database(format!("meta get failed: {e}")))?
            .map(|v| v.to_vec()))
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.partition
            .insert(key, value)
            .map_err(|e| StorageError::Database(format!("meta put failed: {e}")))
    }

    /// Write and immediately make durable.
    pub fn put_durable(&self, key: &str, value: &[u8]) -> Result<()> {
        self.put(key, value)?;
        self.keyspace
            .persist(fjall::PersistMode::SyncAll)
            .map_err(|e| StorageError::Database(format!("persist failed: {e}")))
    }
}

/// In-memory store for tests and the `cache = in-memory` configuration.
#[derive(Default)]
pub struct MemoryStore {
    objects: parking_lot::RwLock<HashMap<ObjectId, Bytes>>,
    meta: Arc<parking_lot::RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata map sharing this store's lifetime.
    pub fn meta(&self) -> MemoryMetaStore {
        MemoryMetaStore {
            map: self.meta.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, id: ObjectId) -> Result<Bytes> {
        self.objects
            .read()
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    async fn exists(&self, id: ObjectId) -> Result<bool> {
        Ok(self.objects.read().contains_key(&id))
    }

    async fn put(&self, kind: ObjectKind, data: Bytes) -> Result<ObjectId> {
        let id = ObjectId::for_object(kind, &data);
        self.objects.write().insert(id, data);
        Ok(id)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory metadata table.
#[derive(Clone, Default)]
pub struct MemoryMetaStore {
    map: Arc<parking_lot::RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryMetaStore {
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    pub fn put_durable(&self, key: &str, value: &[u8]) -> Result<()> {
        self.put(key, value)
    }
}

/// Either metadata backend, selected by configuration.
#[derive(Clone)]
pub enum KeyValueStore {
    Fjall(MetaStore),
    Memory(MemoryMetaStore),
}

impl KeyValueStore {
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self {
            KeyValueStore::Fjall(s) => s.get(key),
            KeyValueStore::Memory(s) => s.get(key),
        }
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        match self {
            KeyValueStore::Fjall(s) => s.put(key, value),
            KeyValueStore::Memory(s) => s.put(key, value),
        }
    }

    pub fn put_durable(&self, key: &str, value: &[u8]) -> Result<()> {
        match self {
            KeyValueStore::Fjall(s) => s.put_durable(key, value),
            KeyValueStore::Memory(s) => s.put_durable(key, value),
        }
    }
}
