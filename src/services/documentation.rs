use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document of the team coordinator.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::team::create_team,
        crate::routes::team::join_team,
        crate::routes::team::leave_team,
        crate::routes::team::kick_team_member,
        crate::routes::team::my_membership,
        crate::routes::team::team_details,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::team::CreateTeamRequest,
            crate::dto::team::CreateTeamResponse,
            crate::dto::team::JoinTeamRequest,
            crate::dto::team::JoinTeamResponse,
            crate::dto::team::LeaveTeamResponse,
            crate::dto::team::KickTeamMemberRequest,
            crate::dto::team::KickTeamMemberResponse,
            crate::dto::team::MembershipResponse,
            crate::dto::team::TeamDetailsResponse,
            crate::error::ErrorBody,
            crate::error::ErrorKind,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "team", description = "Team membership operations"),
    )
)]
pub struct ApiDoc;
