use serde::Serialize;
use utoipa::ToSchema;

/// Payload of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" when the document store answered, "degraded" otherwise.
    pub status: &'static str,
    /// Name of the configured document store backend.
    pub store: &'static str,
}

impl HealthResponse {
    /// The store answered its health check.
    pub fn ok(store: &'static str) -> Self {
        Self { status: "ok", store }
    }

    /// The store could not be reached.
    pub fn degraded(store: &'static str) -> Self {
        Self {
            status: "degraded",
            store,
        }
    }
}
