//! Typed access to team roster documents stored in the `team` collection.

use crate::dao::{
    document_store::Transaction,
    models::{TeamRecord, decode, encode},
    storage::StorageResult,
};

/// Collection holding one roster document per team, keyed by team id.
pub const TEAM_COLLECTION: &str = "team";

/// Load the team `team_id`, if it exists.
pub async fn load(tx: &mut Transaction, team_id: &str) -> StorageResult<Option<TeamRecord>> {
    tx.get(TEAM_COLLECTION, team_id)
        .await?
        .map(|value| decode(TEAM_COLLECTION, team_id, value))
        .transpose()
}

/// Stage a full replacement of the team `team_id`.
pub fn store(tx: &mut Transaction, team_id: &str, record: &TeamRecord) -> StorageResult<()> {
    let value = encode(TEAM_COLLECTION, team_id, record)?;
    tx.put(TEAM_COLLECTION, team_id, value);
    Ok(())
}

/// Stage the removal of the team `team_id`.
pub fn delete(tx: &mut Transaction, team_id: &str) {
    tx.delete(TEAM_COLLECTION, team_id);
}
