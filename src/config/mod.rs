//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::game::data::GameMode;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Game mode hosted by this process
    pub game_mode: GameMode,
    /// Seconds after the lobby starts during which joining stays open
    pub join_window: Duration,

    /// Allowed client origin for CORS
    pub client_origin: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let game_mode = env::var("GAME_MODE")
            .unwrap_or_else(|_| "battle_royale".to_string())
            .parse::<GameMode>()
            .map_err(ConfigError::InvalidGameMode)?;

        let join_window_secs = env::var("JOIN_WINDOW_SECS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|_| ConfigError::Invalid("JOIN_WINDOW_SECS"))?
            .unwrap_or(330);

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            game_mode,
            join_window: Duration::from_secs(join_window_secs),

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid game mode: {0}")]
    InvalidGameMode(String),
}
