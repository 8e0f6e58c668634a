//! Library crate for team-coordinator, exposing modules for the binaries and integration tests.

/// Configuration file and environment handling.
pub mod config;
/// Persistence: document store, records and typed accessors.
pub mod dao;
/// Request and response payloads.
pub mod dto;
/// Error kinds and their HTTP rendering.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Coordinator, token generation, identity and supporting services.
pub mod services;
/// Shared application state.
pub mod state;
