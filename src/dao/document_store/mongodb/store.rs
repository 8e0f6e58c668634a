use std::sync::Arc;

use futures::future::BoxFuture;
use mongodb::{
    Client, ClientSession, Collection, Database,
    bson::doc,
    error::{Error as MongoError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::warn;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
};
use crate::dao::{
    document_store::{DocumentKey, DocumentStore, StoreSession, WriteOp},
    membership::MEMBERSHIP_COLLECTION,
    storage::{StorageError, StorageResult},
    team::TEAM_COLLECTION,
};

const COLLECTIONS: [&str; 2] = [TEAM_COLLECTION, MEMBERSHIP_COLLECTION];

/// Stored shape of a document: the key lives in `_id`, the body is kept as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(flatten)]
    body: Map<String, Value>,
}

impl MongoDocument {
    /// Wrap a document body; only JSON objects can be stored.
    fn new(key: &DocumentKey, value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(body) => Ok(Self {
                id: key.key.clone(),
                body,
            }),
            other => Err(StorageError::Corrupt {
                collection: key.collection.clone(),
                key: key.key.clone(),
                message: format!("document body must be an object, got `{other}`"),
            }),
        }
    }
}

/// [`DocumentStore`] backed by MongoDB replica-set transactions.
#[derive(Clone)]
pub struct MongoDocumentStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoDocumentStore {
    /// Establish a connection to MongoDB and make sure the collections exist.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_collections().await?;
        Ok(store)
    }

    /// Replace the client after a connectivity loss.
    pub async fn try_reconnect(&self) -> StorageResult<()> {
        self.inner.reconnect().await.map_err(Into::into)
    }

    // Collections cannot be created implicitly inside a transaction on older servers.
    async fn ensure_collections(&self) -> MongoResult<()> {
        let database = self.database().await;
        let existing = database
            .list_collection_names()
            .await
            .map_err(|source| MongoDaoError::EnsureCollection {
                collection: COLLECTIONS[0],
                source,
            })?;

        for collection in COLLECTIONS {
            if existing.iter().any(|name| name == collection) {
                continue;
            }
            database
                .create_collection(collection)
                .await
                .map_err(|source| MongoDaoError::EnsureCollection { collection, source })?;
        }
        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn begin_session(&self) -> StorageResult<MongoSession> {
        let client = self.client().await;
        let database = self.database().await;

        let mut session = client
            .start_session()
            .await
            .map_err(|source| classify(source, |source| MongoDaoError::StartTransaction { source }))?;
        session
            .start_transaction()
            .await
            .map_err(|source| classify(source, |source| MongoDaoError::StartTransaction { source }))?;

        Ok(MongoSession { database, session })
    }
}

impl DocumentStore for MongoDocumentStore {
    fn begin(&self) -> BoxFuture<'static, StorageResult<Box<dyn StoreSession>>> {
        let store = self.clone();
        Box::pin(async move {
            let session = store.begin_session().await?;
            Ok(Box::new(session) as Box<dyn StoreSession>)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }
}

struct MongoSession {
    database: Database,
    session: ClientSession,
}

impl MongoSession {
    fn collection(&self, name: &str) -> Collection<MongoDocument> {
        self.database.collection::<MongoDocument>(name)
    }

    async fn apply(
        &mut self,
        key: &DocumentKey,
        document: Option<MongoDocument>,
    ) -> Result<(), MongoError> {
        let collection = self.collection(&key.collection);
        let filter = doc! { "_id": key.key.as_str() };
        match document {
            Some(document) => {
                collection
                    .replace_one(filter, &document)
                    .upsert(true)
                    .session(&mut self.session)
                    .await?;
            }
            None => {
                collection
                    .delete_one(filter)
                    .session(&mut self.session)
                    .await?;
            }
        }
        Ok(())
    }

    async fn commit_with_retry(&mut self) -> Result<(), MongoError> {
        match self.session.commit_transaction().await {
            Err(err) if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) => {
                warn!(error = %err, "commit outcome unknown; retrying commit once");
                self.session.commit_transaction().await
            }
            other => other,
        }
    }

    async fn abort_quietly(&mut self) {
        if let Err(err) = self.session.abort_transaction().await {
            warn!(error = %err, "failed to abort MongoDB transaction");
        }
    }
}

impl StoreSession for MongoSession {
    fn get<'a>(
        &'a mut self,
        key: &'a DocumentKey,
    ) -> BoxFuture<'a, StorageResult<Option<Value>>> {
        Box::pin(async move {
            let collection = self.collection(&key.collection);
            let found = collection
                .find_one(doc! { "_id": key.key.as_str() })
                .session(&mut self.session)
                .await
                .map_err(|source| {
                    classify(source, |source| MongoDaoError::Load {
                        collection: key.collection.clone(),
                        key: key.key.clone(),
                        source,
                    })
                })?;

            Ok(found.map(|document| Value::Object(document.body)))
        })
    }

    fn commit(
        mut self: Box<Self>,
        writes: Vec<(DocumentKey, WriteOp)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move {
            for (key, op) in writes {
                let document = match op {
                    WriteOp::Put(value) => match MongoDocument::new(&key, value) {
                        Ok(document) => Some(document),
                        Err(err) => {
                            self.abort_quietly().await;
                            return Err(err);
                        }
                    },
                    WriteOp::Delete => None,
                };
                if let Err(source) = self.apply(&key, document).await {
                    self.abort_quietly().await;
                    return Err(classify(source, |source| MongoDaoError::Write {
                        collection: key.collection.clone(),
                        key: key.key.clone(),
                        source,
                    }));
                }
            }

            self.commit_with_retry()
                .await
                .map_err(|source| classify(source, |source| MongoDaoError::Commit { source }))
        })
    }

    fn abort(mut self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.abort_quietly().await })
    }
}

/// Map transient transaction failures to conflicts so the caller replays the attempt.
fn classify(
    source: MongoError,
    wrap: impl FnOnce(MongoError) -> MongoDaoError,
) -> StorageError {
    if source.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        warn!(error = %source, "transient MongoDB transaction error");
        return StorageError::conflict("transaction", "transient");
    }
    wrap(source).into()
}
