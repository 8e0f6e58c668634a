use std::collections::BTreeSet;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::OffsetDateTime;

use crate::dao::storage::{StorageError, StorageResult};

/// Roster size used when the creator does not ask for a specific one.
pub const DEFAULT_MAXIMUM_MEMBERS: u32 = 10;

/// Stable identifier of a user, as produced by the identity resolver.
pub type UserId = String;
/// Identifier of a team document.
pub type TeamId = String;

/// Per-user pointer to the team the user currently belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    /// Team the user belongs to, if any.
    #[serde(default)]
    pub team_id: Option<TeamId>,
    /// Last time the user left or was removed from a team.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_left_team: Option<OffsetDateTime>,
}

impl MembershipRecord {
    /// Membership of a user who just left a team at `now`.
    pub fn departed(now: OffsetDateTime) -> Self {
        Self {
            team_id: None,
            last_left_team: Some(now),
        }
    }
}

/// Roster of a team together with its join secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRecord {
    /// Creator of the team. Never changes.
    pub owner: UserId,
    /// Shared join secret.
    pub password: String,
    /// Upper bound on the roster size.
    #[serde(default = "default_maximum_members")]
    pub maximum_members: u32,
    /// Current members, owner included.
    pub members: BTreeSet<UserId>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TeamRecord {
    /// Fresh team whose only member is its owner.
    pub fn founded_by(
        owner: UserId,
        password: String,
        maximum_members: u32,
        now: OffsetDateTime,
    ) -> Self {
        let members = BTreeSet::from([owner.clone()]);
        Self {
            owner,
            password,
            maximum_members,
            members,
            created_at: now,
        }
    }

    /// Whether `user_id` is on the roster.
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }

    /// Whether `user_id` created the team.
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner == user_id
    }

    /// Whether one more member fits.
    pub fn has_room(&self) -> bool {
        self.members.len() < self.maximum_members as usize
    }
}

fn default_maximum_members() -> u32 {
    DEFAULT_MAXIMUM_MEMBERS
}

pub(crate) fn decode<T: DeserializeOwned>(
    collection: &str,
    key: &str,
    value: Value,
) -> StorageResult<T> {
    serde_json::from_value(value).map_err(|err| StorageError::Corrupt {
        collection: collection.to_owned(),
        key: key.to_owned(),
        message: err.to_string(),
    })
}

pub(crate) fn encode<T: Serialize>(collection: &str, key: &str, record: &T) -> StorageResult<Value> {
    serde_json::to_value(record).map_err(|err| StorageError::Corrupt {
        collection: collection.to_owned(),
        key: key.to_owned(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn membership_uses_camel_case_and_nulls() {
        let record = MembershipRecord::departed(datetime!(2024-03-01 12:00 UTC));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"teamId": null, "lastLeftTeam": "2024-03-01T12:00:00Z"})
        );
    }

    #[test]
    fn missing_membership_fields_default_to_none() {
        let record: MembershipRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(record, MembershipRecord::default());
    }

    #[test]
    fn team_defaults_maximum_members() {
        let team: TeamRecord = serde_json::from_value(json!({
            "owner": "o",
            "password": "p",
            "members": ["o", "m", "o"],
            "createdAt": "2024-03-01T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(team.maximum_members, DEFAULT_MAXIMUM_MEMBERS);
        assert_eq!(team.members.len(), 2);
        assert!(team.is_owner("o"));
        assert!(team.is_member("m"));
        assert!(team.has_room());
    }

    #[test]
    fn full_roster_has_no_room() {
        let mut team = TeamRecord::founded_by(
            "o".into(),
            "p".into(),
            2,
            datetime!(2024-03-01 12:00 UTC),
        );
        assert!(team.has_room());
        team.members.insert("m".into());
        assert!(!team.has_room());
    }
}
