/// Transactional document store abstraction and backends.
pub mod document_store;
/// Typed accessor for membership documents.
pub mod membership;
/// Persisted record definitions.
pub mod models;
/// Storage error types shared by every backend.
pub mod storage;
/// Typed accessor for team roster documents.
pub mod team;
