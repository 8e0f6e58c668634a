//! Application-level configuration loading: coordinator tunables and store selection.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use time::Duration;
use tracing::{info, warn};

use crate::{
    dao::{document_store::RetryPolicy, models::DEFAULT_MAXIMUM_MEMBERS},
    services::{
        team_coordinator::{CoordinatorSettings, DEFAULT_COOLDOWN},
        token_generator::PasswordFallback,
    },
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TEAM_COORDINATOR_CONFIG_PATH";
/// Environment variable selecting the document store backend.
const STORE_BACKEND_ENV: &str = "STORE_BACKEND";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    settings: CoordinatorSettings,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path())
    }

    /// Load the configuration stored at `path`, falling back to built-in defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        cooldown_secs = app_config.settings.cooldown.whole_seconds(),
                        max_attempts = app_config.settings.retry.max_attempts,
                        "loaded coordinator settings from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Settings handed to the team coordinator.
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        self.settings
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    cooldown_secs: Option<u32>,
    default_maximum_members: Option<u32>,
    max_transaction_attempts: Option<u32>,
    password_fallback: Option<PasswordFallback>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let settings = CoordinatorSettings {
            cooldown: value
                .cooldown_secs
                .map(|secs| Duration::seconds(i64::from(secs)))
                .unwrap_or(DEFAULT_COOLDOWN),
            default_maximum_members: value
                .default_maximum_members
                .filter(|limit| *limit >= 1)
                .unwrap_or(DEFAULT_MAXIMUM_MEMBERS),
            retry: value
                .max_transaction_attempts
                .map(RetryPolicy::new)
                .unwrap_or_default(),
            password_fallback: value.password_fallback.unwrap_or_default(),
        };
        Self { settings }
    }
}

/// Which document store the server runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local store; state is lost on restart.
    Memory,
    /// MongoDB with multi-document transactions.
    Mongo,
}

impl StoreBackend {
    /// Name reported by the health check.
    pub fn as_str(self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Mongo => "mongo",
        }
    }

    /// Read `STORE_BACKEND`, defaulting to MongoDB whenever a connection string is set.
    pub fn from_env(mongo_uri: Option<&str>) -> Self {
        let requested = env::var(STORE_BACKEND_ENV).ok();
        Self::select(requested.as_deref(), mongo_uri.is_some())
    }

    fn select(requested: Option<&str>, mongo_configured: bool) -> Self {
        match requested.map(str::trim) {
            Some(name) if name.eq_ignore_ascii_case("memory") => StoreBackend::Memory,
            Some(name) if name.eq_ignore_ascii_case("mongo") => StoreBackend::Mongo,
            Some(other) if !other.is_empty() => {
                warn!(backend = other, "unknown store backend; using the in-memory store");
                StoreBackend::Memory
            }
            _ if mongo_configured => StoreBackend::Mongo,
            _ => StoreBackend::Memory,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
