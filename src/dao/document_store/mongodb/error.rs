use mongodb::error::Error as MongoError;
use thiserror::Error;

/// Result alias for the MongoDB backend.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures of the MongoDB backend.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        #[source]
        source: MongoError,
    },
    /// The driver rejected the client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// The server never answered during start-up.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Number of pings sent.
        attempts: u32,
        #[source]
        source: MongoError,
    },
    /// A liveness ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// A collection required by transactions could not be created.
    #[error("failed to ensure collection `{collection}`")]
    EnsureCollection {
        /// Collection name.
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    /// Opening a session or starting a transaction failed.
    #[error("failed to start MongoDB transaction")]
    StartTransaction {
        #[source]
        source: MongoError,
    },
    /// Reading a document failed.
    #[error("failed to load `{collection}/{key}`")]
    Load {
        /// Collection name.
        collection: String,
        /// Document key.
        key: String,
        #[source]
        source: MongoError,
    },
    /// Writing a document failed.
    #[error("failed to write `{collection}/{key}`")]
    Write {
        /// Collection name.
        collection: String,
        /// Document key.
        key: String,
        #[source]
        source: MongoError,
    },
    /// Committing the transaction failed.
    #[error("failed to commit MongoDB transaction")]
    Commit {
        #[source]
        source: MongoError,
    },
}
