//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

use crate::game::MatchSettings;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HMAC secret that signs match tickets
    pub ticket_secret: String,
    /// Game id a ticket must carry to be admitted
    pub game_id: String,

    /// Base URL of the level store service
    pub level_store_url: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// Roster size required before the creator may start
    pub min_players: usize,
    /// Countdown length before gameplay, in seconds
    pub countdown_secs: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT; fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let required = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            ticket_secret: required("TICKET_SECRET")?,
            game_id: lookup("GAME_ID").unwrap_or_else(|| "ballgame".to_string()),

            level_store_url: required("LEVEL_STORE_URL")?,
            client_origin: lookup("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),

            min_players: parse_or(&lookup, "MIN_PLAYERS", 1)?,
            countdown_secs: parse_or(&lookup, "COUNTDOWN_SECS", 3)?,
        })
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            min_players: self.min_players,
            countdown_secs: self.countdown_secs,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Environment variable {0} must be a non-negative integer")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("TICKET_SECRET", "s3cret"),
        ("LEVEL_STORE_URL", "http://levels.local"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = Config::from_lookup(lookup_from(&REQUIRED)).unwrap();

        assert_eq!(config.server_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.game_id, "ballgame");
        assert_eq!(config.client_origin, "http://localhost:5173");
        assert_eq!(config.min_players, 1);
        assert_eq!(config.countdown_secs, 3);
    }

    #[test]
    fn port_takes_precedence_over_server_addr() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "9000"));
        pairs.push(("SERVER_ADDR", "127.0.0.1:7000"));

        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[("LEVEL_STORE_URL", "http://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TICKET_SECRET")));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MIN_PLAYERS", "two"));

        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber("MIN_PLAYERS")));
    }

    #[test]
    fn match_settings_follow_config() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MIN_PLAYERS", "2"));
        pairs.push(("COUNTDOWN_SECS", "5"));

        let settings = Config::from_lookup(lookup_from(&pairs))
            .unwrap()
            .match_settings();
        assert_eq!(settings.min_players, 2);
        assert_eq!(settings.countdown_secs, 5);
    }
}
