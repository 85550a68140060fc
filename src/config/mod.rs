//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Transport credentials. Their absence puts the peer in offline mode.
#[derive(Clone, Debug)]
pub struct TransportCredentials {
    /// Relay UDP endpoint as `host:port`, resolved when connecting
    pub relay_addr: String,
    /// Shared relay access token
    pub token: String,
}

/// Peer configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Room to join on the relay
    pub room: String,
    /// Raw display name, sanitised when the identity is created
    pub player_name: Option<String>,
    /// Relay credentials, `None` means offline
    pub credentials: Option<TransportCredentials>,
    /// Session tick rate
    pub tick_hz: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let credentials = match (env::var("ARENA_RELAY_ADDR"), env::var("ARENA_RELAY_TOKEN")) {
            (Ok(addr), Ok(token)) if !addr.trim().is_empty() && !token.trim().is_empty() => {
                Some(TransportCredentials {
                    relay_addr: parse_endpoint(&addr)
                        .ok_or(ConfigError::InvalidAddress("ARENA_RELAY_ADDR"))?,
                    token,
                })
            }
            _ => None,
        };

        let tick_hz = match env::var("ARENA_TICK_HZ") {
            Ok(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|hz| *hz > 0)
                .ok_or(ConfigError::InvalidNumber("ARENA_TICK_HZ"))?,
            Err(_) => 60,
        };

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            room: env::var("ARENA_ROOM").unwrap_or_else(|_| "lobby".to_string()),
            player_name: env::var("ARENA_PLAYER_NAME").ok(),
            credentials,
            tick_hz,
        })
    }

    /// Offline configuration with default room and tick rate
    pub fn offline() -> Self {
        Self {
            log_level: "info".to_string(),
            room: "lobby".to_string(),
            player_name: None,
            credentials: None,
            tick_hz: 60,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.credentials.is_none()
    }
}

/// Validate a `host:port` endpoint without resolving it
pub fn parse_endpoint(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (host, port) = raw.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Some(raw.to_string())
}

/// Relay server configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// UDP address the relay listens on
    pub bind_addr: SocketAddr,
    /// HTTP address for the health endpoint
    pub http_addr: SocketAddr,
    /// Token members must present on join
    pub token: String,
    /// Members silent for longer than this are evicted
    pub member_timeout_ms: u64,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl RelayConfig {
    /// Load relay configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins for hosted deployments, then ARENA_HTTP_ADDR, then the default
        let http_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("ARENA_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let member_timeout_ms = match env::var("ARENA_MEMBER_TIMEOUT_MS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("ARENA_MEMBER_TIMEOUT_MS"))?,
            Err(_) => 10_000,
        };

        Ok(Self {
            bind_addr: env::var("ARENA_RELAY_BIND")
                .unwrap_or_else(|_| "0.0.0.0:7400".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidAddress("ARENA_RELAY_BIND"))?,
            http_addr: http_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress("ARENA_HTTP_ADDR"))?,
            token: env::var("ARENA_RELAY_TOKEN")
                .map_err(|_| ConfigError::Missing("ARENA_RELAY_TOKEN"))?,
            member_timeout_ms,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid socket address in {0}")]
    InvalidAddress(&'static str),

    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_config_has_no_credentials() {
        let config = Config::offline();
        assert!(config.is_offline());
        assert_eq!(config.room, "lobby");
        assert_eq!(config.tick_hz, 60);
    }

    #[test]
    fn relay_endpoint_accepts_hostnames_and_literals() {
        assert_eq!(
            parse_endpoint(" relay.example.com:7400 ").as_deref(),
            Some("relay.example.com:7400")
        );
        assert_eq!(parse_endpoint("127.0.0.1:7400").as_deref(), Some("127.0.0.1:7400"));
        assert_eq!(parse_endpoint("[::1]:7400").as_deref(), Some("[::1]:7400"));
        assert!(parse_endpoint("relay.example.com").is_none());
        assert!(parse_endpoint(":7400").is_none());
        assert!(parse_endpoint("relay:http").is_none());
    }

    #[test]
    fn config_errors_name_the_variable() {
        let err = ConfigError::Missing("ARENA_RELAY_TOKEN");
        assert_eq!(
            err.to_string(),
            "Missing required environment variable: ARENA_RELAY_TOKEN"
        );
    }
}
