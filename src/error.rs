use std::fmt;

use axum::{Json, extract::rejection::JsonRejection, http::StatusCode, response::IntoResponse};
use axum_valid::{ValidRejection, ValidationRejection};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::{
    dao::{
        document_store::Retryable,
        models::{TeamId, UserId},
        storage::StorageError,
    },
    services::token_generator::TokenError,
};

/// Caller-visible classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Missing caller identity or wrong join password.
    Unauthenticated,
    /// Missing or malformed required field.
    InvalidArgument,
    /// Operation not allowed in the current membership/team state.
    FailedPrecondition,
    /// Referenced team or member does not exist.
    NotFound,
    /// Owner-only action attempted by someone else.
    PermissionDenied,
    /// Team is full.
    ResourceExhausted,
    /// Contention did not settle within the retry budget; safe to retry.
    Aborted,
    /// Unexpected store or generator failure.
    Internal,
}

impl ErrorKind {
    /// Wire code, e.g. `failed-precondition`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::FailedPrecondition => "failed-precondition",
            ErrorKind::NotFound => "not-found",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::ResourceExhausted => "resource-exhausted",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while executing a team operation.
#[derive(Debug, Error)]
pub enum TeamError {
    /// No usable caller identity, or the join password did not match.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// A required field is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation is not valid given the current state.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    /// The referenced team or member does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The team is at capacity.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// The document store failed.
    #[error("storage failure")]
    Storage(#[from] StorageError),
    /// No secure token could be generated.
    #[error("token generation failed")]
    Token(#[from] TokenError),
}

impl TeamError {
    /// Classification reported to the caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TeamError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            TeamError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            TeamError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            TeamError::NotFound(_) => ErrorKind::NotFound,
            TeamError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            TeamError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            TeamError::Storage(err) if err.is_conflict() => ErrorKind::Aborted,
            TeamError::Storage(_) | TeamError::Token(_) => ErrorKind::Internal,
        }
    }

    /// Human readable summary safe to show to the caller.
    pub fn summary(&self) -> String {
        match self {
            TeamError::Unauthenticated(message)
            | TeamError::InvalidArgument(message)
            | TeamError::FailedPrecondition(message)
            | TeamError::NotFound(message)
            | TeamError::PermissionDenied(message)
            | TeamError::ResourceExhausted(message) => message.clone(),
            TeamError::Storage(err) if err.is_conflict() => {
                "the team changed too often while processing the request; retry".into()
            }
            TeamError::Storage(_) | TeamError::Token(_) => "internal error".into(),
        }
    }

    /// Underlying failure message for internal errors, kept out of responses.
    pub fn detail(&self) -> Option<String> {
        match self {
            TeamError::Storage(err) => Some(err.to_string()),
            TeamError::Token(err) => Some(err.to_string()),
            _ => None,
        }
    }
}

impl Retryable for TeamError {
    fn is_conflict(&self) -> bool {
        matches!(self, TeamError::Storage(err) if err.is_conflict())
    }
}

/// Coordinator operation names, as used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `createTeam`
    CreateTeam,
    /// `joinTeam`
    JoinTeam,
    /// `leaveTeam`
    LeaveTeam,
    /// `kickTeamMember`
    KickTeamMember,
    /// Membership read.
    Membership,
    /// Team details read.
    TeamDetails,
}

impl Operation {
    /// Operation name.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::CreateTeam => "createTeam",
            Operation::JoinTeam => "joinTeam",
            Operation::LeaveTeam => "leaveTeam",
            Operation::KickTeamMember => "kickTeamMember",
            Operation::Membership => "membership",
            Operation::TeamDetails => "teamDetails",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed coordinator call, tagged with what was attempted and by whom.
#[derive(Debug, Error)]
#[error("{operation} failed for caller `{caller}`")]
pub struct OperationError {
    /// Failing operation.
    pub operation: Operation,
    /// Caller of the operation.
    pub caller: UserId,
    /// Team involved, when known.
    pub team_id: Option<TeamId>,
    /// What went wrong.
    #[source]
    pub source: TeamError,
}

impl OperationError {
    /// Classification reported to the caller.
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Caller-facing summary.
    pub message: String,
}

impl AppError {
    /// Error for a request without a usable caller identity.
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unauthenticated,
            message: message.into(),
        }
    }

    /// Error for a request body or parameter that cannot be used.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidArgument,
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_argument(rejection.body_text())
    }
}

impl From<ValidRejection<JsonRejection>> for AppError {
    fn from(rejection: ValidRejection<JsonRejection>) -> Self {
        match rejection {
            ValidationRejection::Valid(errors) => Self::invalid_argument(errors.to_string()),
            ValidationRejection::Inner(inner) => inner.into(),
        }
    }
}

impl From<OperationError> for AppError {
    fn from(err: OperationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.source.summary(),
        }
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Failure classification.
    pub code: ErrorKind,
    /// Human readable summary.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.kind {
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Aborted => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            code: self.kind,
            message: self.message,
        });

        (status, payload).into_response()
    }
}
