//! Server configuration module
//! Handles dynamic configuration parameters for the typing race server

use crate::constants::{
    DEFAULT_COUNTDOWN_MS, DEFAULT_HOST, DEFAULT_MATCH_GROUP_SIZE, DEFAULT_MAX_CONNECTIONS_PER_IP,
    DEFAULT_MIN_PLAYERS, DEFAULT_PORT, DEFAULT_RACE_TIMEOUT_SECS, MAX_RACE_PLAYERS,
    PROGRESS_LIMIT, PROGRESS_WINDOW_MS, ROOM_ACTION_LIMIT, ROOM_ACTION_WINDOW_MS,
    ROOM_CREATE_LIMIT, ROOM_CREATE_WINDOW_MS,
};
use crate::error::{KeyclashError, Result};
use std::env;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Secret for verifying pre-issued race tokens. When absent the server
    /// only starts in development mode and decodes tokens without
    /// signature verification.
    pub token_secret: Option<String>,
    /// Development mode (relaxes the token secret requirement)
    pub development_mode: bool,
    /// Maximum concurrent connections per source IP address
    pub max_connections_per_ip: usize,
    /// Progress updates allowed per window
    pub progress_limit: u32,
    pub progress_window_ms: u64,
    /// Room joins/leaves and queue operations allowed per window
    pub room_action_limit: u32,
    pub room_action_window_ms: u64,
    /// Room creations allowed per window
    pub room_create_limit: u32,
    pub room_create_window_ms: u64,
    /// Pre-race countdown duration in milliseconds
    pub countdown_ms: u64,
    /// Players required before a waiting room starts its countdown
    pub min_players: usize,
    /// Players per matchmade race
    pub match_group_size: usize,
    /// Hard ceiling on race duration once active
    pub race_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        panic!("ServerConfig::default() is not allowed for security reasons. Use ServerConfig::from_env() instead.");
    }
}

impl ServerConfig {
    /// Create a test configuration - DANGEROUS: Only for testing!
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            token_secret: Some("unit-test-signing-key-0123456789abcdef".to_string()),
            development_mode: true,
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
            progress_limit: PROGRESS_LIMIT,
            progress_window_ms: PROGRESS_WINDOW_MS,
            room_action_limit: ROOM_ACTION_LIMIT,
            room_action_window_ms: ROOM_ACTION_WINDOW_MS,
            room_create_limit: ROOM_CREATE_LIMIT,
            room_create_window_ms: ROOM_CREATE_WINDOW_MS,
            countdown_ms: DEFAULT_COUNTDOWN_MS,
            min_players: DEFAULT_MIN_PLAYERS,
            match_group_size: DEFAULT_MATCH_GROUP_SIZE,
            race_timeout_secs: DEFAULT_RACE_TIMEOUT_SECS,
        }
    }

    /// Validate that the token secret meets security requirements
    fn validate_token_secret(secret: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(KeyclashError::ConfigError(
                "Token secret must be at least 32 characters long".to_string(),
            ));
        }

        // Check for insecure default or example values
        let insecure_patterns = [
            "your-secret-key",
            "change-this",
            "INSECURE-DEFAULT-FOR-TESTING-ONLY",
            "test-secret",
            "default",
            "secret",
            "password",
            "12345",
        ];

        for pattern in &insecure_patterns {
            if secret.contains(pattern) {
                return Err(KeyclashError::ConfigError(format!(
                    "Token secret contains insecure pattern '{}'. Please use a secure random secret generated with: openssl rand -base64 32",
                    pattern
                )));
            }
        }

        // Ensure some complexity
        if secret.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(KeyclashError::ConfigError(
                "Token secret should contain mixed characters (letters, numbers, symbols) for security".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("KEYCLASH_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = env::var("KEYCLASH_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let development_mode = env::var("KEYCLASH_DEVELOPMENT_MODE")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false); // SECURITY: Default to false (production mode)

        let token_secret = env::var("KEYCLASH_TOKEN_SECRET").ok();

        match &token_secret {
            Some(secret) => Self::validate_token_secret(secret)?,
            None if development_mode => {
                log::warn!(
                    "KEYCLASH_TOKEN_SECRET not set; tokens will be decoded WITHOUT signature verification (development mode)"
                );
            }
            None => {
                return Err(KeyclashError::ConfigError(
                    "KEYCLASH_TOKEN_SECRET environment variable is required in production. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                ));
            }
        }

        let max_connections_per_ip = env::var("KEYCLASH_MAX_CONN_PER_IP")
            .ok()
            .and_then(|c| c.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP);

        let progress_limit = env::var("KEYCLASH_LIMIT_PROGRESS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(PROGRESS_LIMIT);
        let progress_window_ms = env::var("KEYCLASH_LIMIT_PROGRESS_WINDOW_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(PROGRESS_WINDOW_MS);

        let room_action_limit = env::var("KEYCLASH_LIMIT_ROOM_ACTION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(ROOM_ACTION_LIMIT);
        let room_action_window_ms = env::var("KEYCLASH_LIMIT_ROOM_ACTION_WINDOW_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(ROOM_ACTION_WINDOW_MS);

        let room_create_limit = env::var("KEYCLASH_LIMIT_ROOM_CREATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(ROOM_CREATE_LIMIT);
        let room_create_window_ms = env::var("KEYCLASH_LIMIT_ROOM_CREATE_WINDOW_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(ROOM_CREATE_WINDOW_MS);

        let countdown_ms = env::var("KEYCLASH_COUNTDOWN_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_COUNTDOWN_MS);

        let min_players = env::var("KEYCLASH_MIN_PLAYERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MIN_PLAYERS);

        let match_group_size = env::var("KEYCLASH_GROUP_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MATCH_GROUP_SIZE);

        let race_timeout_secs = env::var("KEYCLASH_RACE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RACE_TIMEOUT_SECS);

        if port == 0 {
            return Err(KeyclashError::ConfigError(
                "KEYCLASH_PORT must be nonzero".to_string(),
            ));
        }
        if max_connections_per_ip == 0 {
            return Err(KeyclashError::ConfigError(
                "KEYCLASH_MAX_CONN_PER_IP must be nonzero".to_string(),
            ));
        }
        if progress_limit == 0 || room_action_limit == 0 || room_create_limit == 0 {
            return Err(KeyclashError::ConfigError(
                "Rate limit budgets must be nonzero".to_string(),
            ));
        }
        if progress_window_ms == 0 || room_action_window_ms == 0 || room_create_window_ms == 0 {
            return Err(KeyclashError::ConfigError(
                "Rate limit windows must be nonzero".to_string(),
            ));
        }
        if min_players < 2 {
            return Err(KeyclashError::ConfigError(
                "KEYCLASH_MIN_PLAYERS must be at least 2".to_string(),
            ));
        }
        if match_group_size < 2 || match_group_size > MAX_RACE_PLAYERS {
            return Err(KeyclashError::ConfigError(format!(
                "KEYCLASH_GROUP_SIZE must be between 2 and {}",
                MAX_RACE_PLAYERS
            )));
        }
        if race_timeout_secs == 0 {
            return Err(KeyclashError::ConfigError(
                "KEYCLASH_RACE_TIMEOUT_SECS must be nonzero".to_string(),
            ));
        }

        Ok(Self {
            host,
            port,
            token_secret,
            development_mode,
            max_connections_per_ip,
            progress_limit,
            progress_window_ms,
            room_action_limit,
            room_action_window_ms,
            room_create_limit,
            room_create_window_ms,
            countdown_ms,
            min_players,
            match_group_size,
            race_timeout_secs,
        })
    }
}
