use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the document store and report whether it answered.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let store = state.coordinator().store();
    match store.health_check().await {
        Ok(()) => HealthResponse::ok(state.store_backend()),
        Err(err) => {
            warn!(error = %err, "document store health check failed");
            HealthResponse::degraded(state.store_backend())
        }
    }
}
