//! Process-local document store with optimistic concurrency control.
//!
//! Each document carries a version that is bumped on every write (deletes keep a
//! tombstone version). A session records the version of every document it reads and the
//! commit is rejected if any of them moved in the meantime.
//!
//! Exclusive sessions hold the store's write lock from their first read until they
//! finish, so they always commit and every other session waits for them.

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use super::{DocumentKey, DocumentStore, StoreSession, WriteOp};
use crate::dao::storage::{StorageError, StorageResult};

#[derive(Debug, Default)]
struct Versioned {
    version: u64,
    value: Option<Value>,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<DocumentKey, Versioned>,
}

impl MemoryState {
    fn version_of(&self, key: &DocumentKey) -> u64 {
        self.documents.get(key).map_or(0, |doc| doc.version)
    }

    fn write(&mut self, key: DocumentKey, value: Option<Value>) {
        let slot = self.documents.entry(key).or_default();
        slot.version += 1;
        slot.value = value;
    }
}

/// In-memory [`DocumentStore`] used for tests and single-node deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<RwLock<MemoryState>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a document outside of any transaction.
    pub async fn document(&self, collection: &str, key: &str) -> Option<Value> {
        let guard = self.inner.read().await;
        guard
            .documents
            .get(&DocumentKey::new(collection, key))
            .and_then(|doc| doc.value.clone())
    }

    /// Write a document outside of any transaction, invalidating concurrent readers.
    pub async fn insert(&self, collection: &str, key: &str, value: Value) {
        let mut guard = self.inner.write().await;
        guard.write(DocumentKey::new(collection, key), Some(value));
    }

    /// Keys of the live documents stored in `collection`.
    pub async fn keys(&self, collection: &str) -> Vec<String> {
        let guard = self.inner.read().await;
        let mut keys: Vec<String> = guard
            .documents
            .iter()
            .filter(|(key, doc)| key.collection == collection && doc.value.is_some())
            .map(|(key, _)| key.key.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreSession>>> {
        let session = MemorySession {
            inner: self.inner.clone(),
            reads: HashMap::new(),
        };
        Box::pin(async move { Ok(Box::new(session) as Box<dyn StoreSession>) })
    }

    fn begin_exclusive(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreSession>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.write_owned().await;
            Ok(Box::new(ExclusiveSession { guard }) as Box<dyn StoreSession>)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

struct MemorySession {
    inner: Arc<RwLock<MemoryState>>,
    reads: HashMap<DocumentKey, u64>,
}

impl StoreSession for MemorySession {
    fn get<'a>(
        &'a mut self,
        key: &'a DocumentKey,
    ) -> BoxFuture<'a, StorageResult<Option<Value>>> {
        Box::pin(async move {
            let guard = self.inner.read().await;
            let version = guard.version_of(key);
            let value = guard.documents.get(key).and_then(|doc| doc.value.clone());
            drop(guard);

            // The first observed version is the one validated at commit time.
            self.reads.entry(key.clone()).or_insert(version);
            Ok(value)
        })
    }

    fn commit(
        self: Box<Self>,
        writes: Vec<(DocumentKey, WriteOp)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move {
            let mut guard = self.inner.write().await;

            if let Some((key, _)) = self
                .reads
                .iter()
                .find(|(key, seen)| guard.version_of(key) != **seen)
            {
                return Err(StorageError::conflict(&key.collection, &key.key));
            }

            for (key, op) in writes {
                match op {
                    WriteOp::Put(value) => guard.write(key, Some(value)),
                    WriteOp::Delete => guard.write(key, None),
                }
            }
            Ok(())
        })
    }

    fn abort(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

struct ExclusiveSession {
    guard: OwnedRwLockWriteGuard<MemoryState>,
}

impl StoreSession for ExclusiveSession {
    fn get<'a>(
        &'a mut self,
        key: &'a DocumentKey,
    ) -> BoxFuture<'a, StorageResult<Option<Value>>> {
        let value = self
            .guard
            .documents
            .get(key)
            .and_then(|doc| doc.value.clone());
        Box::pin(async move { Ok(value) })
    }

    fn commit(
        mut self: Box<Self>,
        writes: Vec<(DocumentKey, WriteOp)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        for (key, op) in writes {
            match op {
                WriteOp::Put(value) => self.guard.write(key, Some(value)),
                WriteOp::Delete => self.guard.write(key, None),
            }
        }
        Box::pin(async { Ok(()) })
    }

    fn abort(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}
