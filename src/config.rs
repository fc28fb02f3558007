//! Server configuration from environment variables

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::types::HISTORY_LIMIT;

const DEFAULT_BIND: &str = "0.0.0.0:8000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// `(username, token)` pairs seeding the token registry
    pub tokens: Vec<(String, String)>,
    /// Rooms created at startup when missing
    pub rooms: Vec<String>,
    /// JSON snapshot file for the store (None = memory only)
    pub store_path: Option<PathBuf>,
    pub history_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            tokens: Vec::new(),
            rooms: Vec::new(),
            store_path: None,
            history_limit: HISTORY_LIMIT,
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

impl ServerConfig {
    /// Load config from FINCHAT_* environment variables
    pub fn from_env() -> Self {
        let bind = match std::env::var("FINCHAT_BIND") {
            Ok(raw) => raw.trim().parse::<SocketAddr>().unwrap_or_else(|e| {
                tracing::warn!(
                    "Invalid FINCHAT_BIND {:?} ({}), using {}",
                    raw,
                    e,
                    DEFAULT_BIND
                );
                default_bind()
            }),
            Err(_) => default_bind(),
        };

        let tokens = std::env::var("FINCHAT_TOKENS")
            .map(|raw| parse_token_pairs(&raw))
            .unwrap_or_default();
        if tokens.is_empty() {
            tracing::warn!("FINCHAT_TOKENS is empty - nobody will be able to log in");
        }

        let rooms = std::env::var("FINCHAT_ROOMS")
            .map(|raw| parse_room_list(&raw))
            .unwrap_or_default();

        let store_path = std::env::var("FINCHAT_STORE_PATH")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let history_limit = match std::env::var("FINCHAT_HISTORY_LIMIT") {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => limit,
                _ => {
                    tracing::warn!(
                        "Invalid FINCHAT_HISTORY_LIMIT {:?}, using {}",
                        raw,
                        HISTORY_LIMIT
                    );
                    HISTORY_LIMIT
                }
            },
            Err(_) => HISTORY_LIMIT,
        };

        Self {
            bind,
            tokens,
            rooms,
            store_path,
            history_limit,
        }
    }
}

/// Parse `alice=token1,bob=token2`. Malformed entries are skipped with a warning.
pub fn parse_token_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((user, token)) if !user.trim().is_empty() && !token.trim().is_empty() => {
                Some((user.trim().to_string(), token.trim().to_string()))
            }
            _ => {
                tracing::warn!("Ignoring malformed FINCHAT_TOKENS entry {:?}", entry);
                None
            }
        })
        .collect()
}

/// Parse a colon-separated room list
pub fn parse_room_list(raw: &str) -> Vec<String> {
    raw.split(':')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "FINCHAT_BIND",
        "FINCHAT_TOKENS",
        "FINCHAT_ROOMS",
        "FINCHAT_STORE_PATH",
        "FINCHAT_HISTORY_LIMIT",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_parse_token_pairs() {
        assert_eq!(
            parse_token_pairs("alice=a1, bob = b2 ,broken,=x,carl="),
            vec![
                ("alice".to_string(), "a1".to_string()),
                ("bob".to_string(), "b2".to_string()),
            ]
        );
        assert!(parse_token_pairs("").is_empty());
    }

    #[test]
    fn test_parse_room_list() {
        assert_eq!(
            parse_room_list("family::work: stocks "),
            vec!["family", "work", "stocks"]
        );
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = ServerConfig::from_env();
        assert_eq!(config.bind, default_bind());
        assert!(config.tokens.is_empty());
        assert!(config.rooms.is_empty());
        assert!(config.store_path.is_none());
        assert_eq!(config.history_limit, HISTORY_LIMIT);
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        clear_env();
        std::env::set_var("FINCHAT_BIND", "127.0.0.1:9001");
        std::env::set_var("FINCHAT_TOKENS", "alice=a1");
        std::env::set_var("FINCHAT_ROOMS", "family:work");
        std::env::set_var("FINCHAT_STORE_PATH", "/tmp/finchat.json");
        std::env::set_var("FINCHAT_HISTORY_LIMIT", "10");

        let config = ServerConfig::from_env();
        assert_eq!(config.bind, "127.0.0.1:9001".parse::<SocketAddr>().unwrap());
        assert_eq!(config.tokens.len(), 1);
        assert_eq!(config.rooms, vec!["family", "work"]);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/finchat.json")));
        assert_eq!(config.history_limit, 10);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_values_fall_back() {
        clear_env();
        std::env::set_var("FINCHAT_BIND", "not an address");
        std::env::set_var("FINCHAT_HISTORY_LIMIT", "0");

        let config = ServerConfig::from_env();
        assert_eq!(config.bind, default_bind());
        assert_eq!(config.history_limit, HISTORY_LIMIT);
        clear_env();
    }
}
