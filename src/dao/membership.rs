//! Typed access to membership documents stored in the `system` collection.

use crate::dao::{
    document_store::Transaction,
    models::{MembershipRecord, decode, encode},
    storage::StorageResult,
};

/// Collection holding one membership document per user, keyed by user id.
pub const MEMBERSHIP_COLLECTION: &str = "system";

/// Load the membership of `user_id`; users that never joined anything get an empty record.
pub async fn load(tx: &mut Transaction, user_id: &str) -> StorageResult<MembershipRecord> {
    match tx.get(MEMBERSHIP_COLLECTION, user_id).await? {
        Some(value) => decode(MEMBERSHIP_COLLECTION, user_id, value),
        None => Ok(MembershipRecord::default()),
    }
}

/// Stage a full replacement of the membership of `user_id`.
pub fn store(tx: &mut Transaction, user_id: &str, record: &MembershipRecord) -> StorageResult<()> {
    let value = encode(MEMBERSHIP_COLLECTION, user_id, record)?;
    tx.put(MEMBERSHIP_COLLECTION, user_id, value);
    Ok(())
}
