//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::Duration;
use progress_sync_core::ConflictPolicy;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    /// How the store re-merges writes that arrive with a stale version.
    pub merge_policy: ConflictPolicy,
    /// Devices unseen for longer than this are listed as inactive.
    pub device_inactive_after: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = std::env::var("CORS_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Load Sync Settings ---
        let policy_str =
            std::env::var("STORE_MERGE_POLICY").unwrap_or_else(|_| "most_progress".to_string());
        let merge_policy = parse_merge_policy(&policy_str)?;

        let hours_str =
            std::env::var("DEVICE_INACTIVE_AFTER_HOURS").unwrap_or_else(|_| "24".to_string());
        let hours = hours_str.parse::<u32>().map_err(|e| {
            ConfigError::InvalidValue("DEVICE_INACTIVE_AFTER_HOURS".to_string(), e.to_string())
        })?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            merge_policy,
            device_inactive_after: Duration::hours(i64::from(hours)),
        })
    }
}

/// The store has nobody to ask, so `user_choice` is not a valid store policy.
pub fn parse_merge_policy(raw: &str) -> Result<ConflictPolicy, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue("STORE_MERGE_POLICY".to_string(), reason);
    let policy = raw.parse::<ConflictPolicy>().map_err(invalid)?;
    if policy == ConflictPolicy::UserChoice {
        return Err(invalid("user_choice needs a user and cannot run in the store".to_string()));
    }
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_policy_rejects_user_choice() {
        assert_eq!(parse_merge_policy("merge_data").unwrap(), ConflictPolicy::MergeData);
        assert_eq!(parse_merge_policy("latest_wins").unwrap(), ConflictPolicy::LatestWins);
        assert!(matches!(
            parse_merge_policy("user_choice"),
            Err(ConfigError::InvalidValue(..))
        ));
        assert!(parse_merge_policy("newest").is_err());
    }
}
