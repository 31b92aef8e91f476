//! Bot configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use rtrp::{ClientConfig, GameType, TimestampMode, TokenPlacement};
use std::time::Duration;

/// Values given on the command line. They win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub room_id: Option<String>,
    pub auto_play: Option<bool>,
}

/// Complete bot configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Base URL of the HTTP API (login, profile, room listing)
    pub api_url: String,
    /// WebSocket endpoint of the room server
    pub ws_url: String,
    /// Account credentials
    pub email: String,
    pub password: String,
    /// Room to join right after connecting
    pub room_id: Option<String>,
    pub game_type: GameType,
    pub token_placement: TokenPlacement,
    pub timestamp_mode: TimestampMode,
    /// Take a free seat as soon as a room join completes
    pub auto_join: bool,
    /// Let the decision policy act on our turn
    pub auto_play: bool,
    pub http_timeout: Duration,
}

impl BotConfig {
    /// Load configuration from `.env`, the environment, and CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns error if credentials are missing or a variable cannot be parsed
    pub fn from_env(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let api_url = overrides
            .api_url
            .or_else(|| std::env::var("RTRP_API_URL").ok())
            .unwrap_or_else(|| "http://localhost:8080".to_string());

        let ws_url = overrides
            .ws_url
            .or_else(|| std::env::var("RTRP_WS_URL").ok())
            .unwrap_or_else(|| "ws://localhost:8080/ws".to_string());

        let email = overrides
            .email
            .or_else(|| std::env::var("RTRP_EMAIL").ok())
            .ok_or_else(|| ConfigError::MissingRequired {
                var: "RTRP_EMAIL".to_string(),
                hint: "Pass --email or set it in .env".to_string(),
            })?;

        let password = overrides
            .password
            .or_else(|| std::env::var("RTRP_PASSWORD").ok())
            .ok_or_else(|| ConfigError::MissingRequired {
                var: "RTRP_PASSWORD".to_string(),
                hint: "Pass --password or set it in .env".to_string(),
            })?;

        let room_id = overrides
            .room_id
            .or_else(|| std::env::var("RTRP_ROOM_ID").ok())
            .filter(|room_id| !room_id.trim().is_empty());

        Ok(BotConfig {
            api_url,
            ws_url,
            email,
            password,
            room_id,
            game_type: parse_env_strict("RTRP_GAME_TYPE", GameType::Holdem)?,
            token_placement: parse_env_strict("RTRP_TOKEN_PLACEMENT", TokenPlacement::Header)?,
            timestamp_mode: parse_env_strict("RTRP_TIMESTAMP_MODE", TimestampMode::Counter)?,
            auto_join: parse_env_or("RTRP_AUTO_JOIN", true),
            auto_play: overrides
                .auto_play
                .unwrap_or_else(|| parse_env_or("RTRP_AUTO_PLAY", false)),
            http_timeout: Duration::from_secs(parse_env_or("RTRP_HTTP_TIMEOUT_SECS", 10)),
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.email.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "RTRP_EMAIL".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        if self.password.is_empty() {
            return Err(ConfigError::Invalid {
                var: "RTRP_PASSWORD".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "RTRP_API_URL".to_string(),
                reason: format!("Must be an http(s) URL, got '{}'", self.api_url),
            });
        }

        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                var: "RTRP_WS_URL".to_string(),
                reason: format!("Must be a ws(s) URL, got '{}'", self.ws_url),
            });
        }

        if self.http_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "RTRP_HTTP_TIMEOUT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Session configuration for the given login.
    pub fn client_config(&self, player_id: &str, token: &str) -> ClientConfig {
        ClientConfig::new(&self.ws_url, player_id, token)
            .with_token_placement(self.token_placement)
            .with_timestamp_mode(self.timestamp_mode)
            .with_auto_join(self.auto_join)
            .with_game_type(self.game_type)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Like [`parse_env_or`], but a set value that does not parse is an error.
fn parse_env_strict<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: key.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
