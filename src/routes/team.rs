use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::request::Parts,
    routing::{get, post},
};
use axum_valid::{Valid, ValidRejection};

use crate::{
    dao::models::UserId,
    dto::team::{
        CreateTeamRequest, CreateTeamResponse, JoinTeamRequest, JoinTeamResponse,
        KickTeamMemberRequest, KickTeamMemberResponse, LeaveTeamResponse, MembershipResponse,
        TeamDetailsResponse,
    },
    error::{AppError, ErrorBody},
    state::SharedState,
};

type ValidJson<T> = Result<Valid<Json<T>>, ValidRejection<JsonRejection>>;

/// Team lifecycle endpoints. Every route requires a resolved caller.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/teams", post(create_team))
        .route("/teams/join", post(join_team))
        .route("/teams/leave", post(leave_team))
        .route("/teams/kick", post(kick_team_member))
        .route("/teams/me", get(my_membership))
        .route("/teams/{id}", get(team_details))
}

/// Verified identity of the user issuing the request.
#[derive(Debug, Clone)]
pub struct Caller(pub UserId);

impl FromRequestParts<SharedState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        state
            .identity()
            .resolve(&parts.headers)
            .map(Caller)
            .map_err(|err| AppError::unauthenticated(err.to_string()))
    }
}

/// Create a team owned by the caller.
#[utoipa::path(
    post,
    path = "/teams",
    tag = "team",
    params(("X-User-Id" = String, Header, description = "Verified user id of the caller")),
    request_body = CreateTeamRequest,
    responses(
        (status = 200, description = "Team created", body = CreateTeamResponse),
        (status = 400, description = "Malformed request", body = ErrorBody),
        (status = 401, description = "Caller unknown", body = ErrorBody),
        (status = 412, description = "Caller already in a team or cooling down", body = ErrorBody)
    )
)]
pub async fn create_team(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    payload: ValidJson<CreateTeamRequest>,
) -> Result<Json<CreateTeamResponse>, AppError> {
    let Valid(Json(request)) = payload?;
    let created = state.coordinator().create_team(&caller, request).await?;
    Ok(Json(created))
}

/// Join an existing team using its password.
#[utoipa::path(
    post,
    path = "/teams/join",
    tag = "team",
    params(("X-User-Id" = String, Header, description = "Verified user id of the caller")),
    request_body = JoinTeamRequest,
    responses(
        (status = 200, description = "Joined", body = JoinTeamResponse),
        (status = 401, description = "Caller unknown or wrong password", body = ErrorBody),
        (status = 404, description = "Team not found", body = ErrorBody),
        (status = 412, description = "Caller already in a team", body = ErrorBody),
        (status = 429, description = "Team is full", body = ErrorBody)
    )
)]
pub async fn join_team(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    payload: ValidJson<JoinTeamRequest>,
) -> Result<Json<JoinTeamResponse>, AppError> {
    let Valid(Json(request)) = payload?;
    Ok(Json(state.coordinator().join_team(&caller, request).await?))
}

/// Leave the caller's team, disbanding it when the caller owns it.
#[utoipa::path(
    post,
    path = "/teams/leave",
    tag = "team",
    params(("X-User-Id" = String, Header, description = "Verified user id of the caller")),
    responses(
        (status = 200, description = "Left", body = LeaveTeamResponse),
        (status = 401, description = "Caller unknown", body = ErrorBody),
        (status = 412, description = "Caller is not in a team", body = ErrorBody)
    )
)]
pub async fn leave_team(
    State(state): State<SharedState>,
    Caller(caller): Caller,
) -> Result<Json<LeaveTeamResponse>, AppError> {
    Ok(Json(state.coordinator().leave_team(&caller).await?))
}

/// Remove a member from the team owned by the caller.
#[utoipa::path(
    post,
    path = "/teams/kick",
    tag = "team",
    params(("X-User-Id" = String, Header, description = "Verified user id of the caller")),
    request_body = KickTeamMemberRequest,
    responses(
        (status = 200, description = "Member removed", body = KickTeamMemberResponse),
        (status = 400, description = "Missing member or self-kick", body = ErrorBody),
        (status = 403, description = "Caller does not own the team", body = ErrorBody),
        (status = 404, description = "Member not in the team", body = ErrorBody),
        (status = 412, description = "Caller is not in a team", body = ErrorBody)
    )
)]
pub async fn kick_team_member(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    payload: ValidJson<KickTeamMemberRequest>,
) -> Result<Json<KickTeamMemberResponse>, AppError> {
    let Valid(Json(request)) = payload?;
    Ok(Json(
        state
            .coordinator()
            .kick_team_member(&caller, request)
            .await?,
    ))
}

/// The caller's membership and remaining creation cooldown.
#[utoipa::path(
    get,
    path = "/teams/me",
    tag = "team",
    params(("X-User-Id" = String, Header, description = "Verified user id of the caller")),
    responses(
        (status = 200, description = "Membership", body = MembershipResponse),
        (status = 401, description = "Caller unknown", body = ErrorBody)
    )
)]
pub async fn my_membership(
    State(state): State<SharedState>,
    Caller(caller): Caller,
) -> Result<Json<MembershipResponse>, AppError> {
    Ok(Json(state.coordinator().membership(&caller).await?))
}

/// Roster of a team. Only members see the password.
#[utoipa::path(
    get,
    path = "/teams/{id}",
    tag = "team",
    params(
        ("X-User-Id" = String, Header, description = "Verified user id of the caller"),
        ("id" = String, Path, description = "Identifier of the team")
    ),
    responses(
        (status = 200, description = "Team", body = TeamDetailsResponse),
        (status = 401, description = "Caller unknown", body = ErrorBody),
        (status = 404, description = "Team not found", body = ErrorBody)
    )
)]
pub async fn team_details(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<TeamDetailsResponse>, AppError> {
    Ok(Json(state.coordinator().team_details(&caller, &id).await?))
}
