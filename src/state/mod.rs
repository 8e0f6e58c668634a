use std::sync::Arc;

use crate::services::{identity::IdentityResolver, team_coordinator::TeamCoordinator};

/// Handle shared by every request handler.
pub type SharedState = Arc<AppState>;

/// Long-lived collaborators of the HTTP adapter. Owns the coordinator and thereby the store.
pub struct AppState {
    coordinator: TeamCoordinator,
    identity: Arc<dyn IdentityResolver>,
    store_backend: &'static str,
}

impl AppState {
    /// Wrap the collaborators in a [`SharedState`].
    pub fn new(
        coordinator: TeamCoordinator,
        identity: Arc<dyn IdentityResolver>,
        store_backend: &'static str,
    ) -> SharedState {
        Arc::new(Self {
            coordinator,
            identity,
            store_backend,
        })
    }

    /// Team state transitions.
    pub fn coordinator(&self) -> &TeamCoordinator {
        &self.coordinator
    }

    /// Resolver applied to every request before the coordinator is called.
    pub fn identity(&self) -> &dyn IdentityResolver {
        self.identity.as_ref()
    }

    /// Name of the configured store backend, reported by the health check.
    pub fn store_backend(&self) -> &'static str {
        self.store_backend
    }
}
