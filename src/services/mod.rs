/// Time sources for cooldowns and timestamps.
pub mod clock;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Caller identity resolution.
pub mod identity;
/// Transactional team state transitions.
pub mod team_coordinator;
/// Secure team identifiers and passwords.
pub mod token_generator;
