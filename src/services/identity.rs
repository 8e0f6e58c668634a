//! Resolution of the caller's user id from request metadata.

use axum::http::{HeaderMap, HeaderName};
use thiserror::Error;

use crate::dao::models::UserId;

/// Header carrying the user id once an upstream gateway has verified the caller.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Failure to establish who is calling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// No credential was supplied.
    #[error("missing caller identity")]
    Missing,
    /// A credential was supplied but could not be used.
    #[error("malformed caller identity")]
    Malformed,
}

/// Maps request metadata to a stable user id.
pub trait IdentityResolver: Send + Sync {
    /// Resolve the caller, or explain why that is impossible.
    fn resolve(&self, headers: &HeaderMap) -> Result<UserId, IdentityError>;
}

/// Trusts the user id set by a verifying gateway in a request header.
#[derive(Debug, Clone)]
pub struct TrustedHeaderResolver {
    header: HeaderName,
}

impl Default for TrustedHeaderResolver {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static(USER_ID_HEADER),
        }
    }
}

impl TrustedHeaderResolver {
    /// Resolver reading `header` instead of [`USER_ID_HEADER`].
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl IdentityResolver for TrustedHeaderResolver {
    fn resolve(&self, headers: &HeaderMap) -> Result<UserId, IdentityError> {
        let value = headers.get(&self.header).ok_or(IdentityError::Missing)?;
        let user_id = value
            .to_str()
            .map_err(|_| IdentityError::Malformed)?
            .trim();

        if user_id.is_empty() {
            return Err(IdentityError::Missing);
        }
        Ok(user_id.to_owned())
    }
}
