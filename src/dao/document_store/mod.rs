//! Transactional document store abstraction and the retry loop that drives it.
//!
//! Every read and write of the coordinator goes through a [`Transaction`]. The store
//! validates at commit time that nothing the transaction read was changed by somebody
//! else; when it was, the commit fails with [`StorageError::Conflict`] and
//! [`run_transaction`] replays the whole unit of work against a fresh snapshot. Replays
//! open their session with [`DocumentStore::begin_exclusive`], so on backends that support
//! it a transaction loses at most one race.

pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::fmt;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::dao::storage::{StorageError, StorageResult};

/// Default number of attempts before a contended transaction is given up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Fully qualified address of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    /// Collection name, e.g. `team` or `system`.
    pub collection: String,
    /// Document identifier inside the collection.
    pub key: String,
}

impl DocumentKey {
    /// Build a key from its parts.
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

/// Buffered mutation applied when a transaction commits.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or fully replace the document.
    Put(Value),
    /// Remove the document if it exists.
    Delete,
}

/// Backend able to open transactional sessions.
pub trait DocumentStore: Send + Sync {
    /// Open a session for one transaction attempt.
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreSession>>>;
    /// Open a session that no concurrent commit can invalidate until it finishes.
    ///
    /// Backends without such a mode hand out a regular session.
    fn begin_exclusive(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreSession>>> {
        self.begin()
    }
    /// Check that the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// One attempt of a transaction against a backend.
pub trait StoreSession: Send {
    /// Read a document as seen by this attempt.
    fn get<'a>(&'a mut self, key: &'a DocumentKey)
    -> BoxFuture<'a, StorageResult<Option<Value>>>;
    /// Atomically apply `writes`, failing with a conflict when the read set went stale.
    fn commit(self: Box<Self>, writes: Vec<(DocumentKey, WriteOp)>)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Discard the attempt without writing anything.
    fn abort(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Errors that can tell the retry loop whether replaying the attempt makes sense.
pub trait Retryable {
    /// True when the failure came from a concurrent commit.
    fn is_conflict(&self) -> bool;
}

impl Retryable for StorageError {
    fn is_conflict(&self) -> bool {
        StorageError::is_conflict(self)
    }
}

/// Bounded replay budget for contended transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` attempts (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Read view plus write buffer of a single transaction attempt.
///
/// Reads observe the attempt's own buffered writes first. Writes are only sent to the
/// backend on commit, so a failing unit of work never leaves partial state behind.
pub struct Transaction {
    session: Box<dyn StoreSession>,
    writes: IndexMap<DocumentKey, WriteOp>,
    attempt: u32,
}

impl Transaction {
    fn new(session: Box<dyn StoreSession>, attempt: u32) -> Self {
        Self {
            session,
            writes: IndexMap::new(),
            attempt,
        }
    }

    /// One-based attempt counter.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Read a raw document.
    pub async fn get(&mut self, collection: &str, key: &str) -> StorageResult<Option<Value>> {
        let key = DocumentKey::new(collection, key);
        if let Some(pending) = self.writes.get(&key) {
            return Ok(match pending {
                WriteOp::Put(value) => Some(value.clone()),
                WriteOp::Delete => None,
            });
        }
        self.session.get(&key).await
    }

    /// Stage a full replacement of a document.
    pub fn put(&mut self, collection: &str, key: &str, value: Value) {
        self.writes
            .insert(DocumentKey::new(collection, key), WriteOp::Put(value));
    }

    /// Stage the removal of a document.
    pub fn delete(&mut self, collection: &str, key: &str) {
        self.writes
            .insert(DocumentKey::new(collection, key), WriteOp::Delete);
    }

    /// Writes staged so far, in staging order.
    pub fn pending_writes(&self) -> impl Iterator<Item = (&DocumentKey, &WriteOp)> {
        self.writes.iter()
    }

    async fn commit(self) -> StorageResult<()> {
        let writes = self.writes.into_iter().collect();
        self.session.commit(writes).await
    }

    async fn abort(self) {
        self.session.abort().await
    }
}

/// Run `work` inside a transaction, replaying it on conflicts until `policy` is exhausted.
///
/// `work` must only act through the transaction it receives: it is re-executed from
/// scratch on every attempt. When the budget runs out the last conflict is returned.
pub async fn run_transaction<T, E, F>(
    store: &dyn DocumentStore,
    policy: RetryPolicy,
    mut work: F,
) -> Result<T, E>
where
    T: Send,
    E: From<StorageError> + Retryable + Send,
    F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, Result<T, E>> + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let session = if attempt == 1 {
            store.begin().await?
        } else {
            store.begin_exclusive().await?
        };
        let mut tx = Transaction::new(session, attempt);

        let result = match work(&mut tx).await {
            Ok(value) => tx.commit().await.map(|()| value).map_err(E::from),
            Err(err) => {
                tx.abort().await;
                Err(err)
            }
        };

        match result {
            Err(err) if err.is_conflict() && attempt < policy.max_attempts => {
                debug!(attempt, "transaction conflict; replaying on a fresh snapshot");
            }
            other => return other,
        }
    }
}
