//! Request and response payloads of the team operations.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;
use validator::Validate;

use super::format_timestamp;
use crate::dao::models::{MembershipRecord, TeamRecord};

/// Payload of `createTeam`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeamRequest {
    /// Join secret; a strong one is generated when omitted or blank.
    #[serde(default)]
    #[validate(length(max = 256))]
    pub password: Option<String>,
    /// Roster size limit, owner included. Defaults to 10.
    #[serde(default)]
    #[validate(range(min = 1, max = 1000))]
    pub maximum_members: Option<u32>,
}

/// Result of `createTeam`. The password is only echoed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CreateTeamResponse {
    /// Identifier of the new team.
    pub team: String,
    /// Join secret to share with future members.
    pub password: String,
}

/// Payload of `joinTeam`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
pub struct JoinTeamRequest {
    /// Team to join.
    #[serde(default)]
    #[validate(length(max = 128))]
    pub id: Option<String>,
    /// Join secret of the team.
    #[serde(default)]
    #[validate(length(max = 256))]
    pub password: Option<String>,
}

/// Result of `joinTeam`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct JoinTeamResponse {
    /// Always `true`.
    pub joined: bool,
}

/// Result of `leaveTeam`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LeaveTeamResponse {
    /// Always `true`.
    pub left: bool,
}

/// Payload of `kickTeamMember`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
pub struct KickTeamMemberRequest {
    /// User to remove from the caller's team.
    #[serde(default)]
    #[validate(length(max = 128))]
    pub kicked: Option<String>,
}

/// Result of `kickTeamMember`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct KickTeamMemberResponse {
    /// Always `true`.
    pub kicked: bool,
}

/// The caller's own membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MembershipResponse {
    /// Current team, if any.
    pub team_id: Option<String>,
    /// RFC 3339 time the caller last left a team.
    pub last_left_team: Option<String>,
    /// Seconds until the caller may create a team again.
    pub cooldown_remaining_secs: u64,
}

/// Roster of a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeamDetailsResponse {
    /// Team identifier.
    pub id: String,
    /// User who created the team.
    pub owner: String,
    /// Roster size limit, owner included.
    pub maximum_members: u32,
    /// Members in lexicographic order.
    pub members: Vec<String>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Join secret, only present when the caller is a member.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl MembershipResponse {
    /// Project a membership record, computing the cooldown left at `now`.
    pub fn from_record(record: MembershipRecord, cooldown: Duration, now: OffsetDateTime) -> Self {
        let cooldown_remaining_secs = record
            .last_left_team
            .map(|left| cooldown - (now - left))
            .filter(|remaining| remaining.is_positive())
            .map(|remaining| remaining.as_seconds_f64().ceil() as u64)
            .unwrap_or(0);

        Self {
            team_id: record.team_id,
            last_left_team: record.last_left_team.map(format_timestamp),
            cooldown_remaining_secs,
        }
    }
}

impl TeamDetailsResponse {
    /// Project a team record; the password is only kept when `reveal_password` is set.
    pub fn from_record(id: String, record: TeamRecord, reveal_password: bool) -> Self {
        Self {
            id,
            owner: record.owner,
            maximum_members: record.maximum_members,
            members: record.members.into_iter().collect(),
            created_at: format_timestamp(record.created_at),
            password: reveal_password.then_some(record.password),
        }
    }
}
