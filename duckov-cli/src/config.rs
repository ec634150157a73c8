//! Configuration file support for DuckovNet CLI tools

use duckov_net::protocol::MAX_MTU;
use duckov_net::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,
    pub port: u16,
    /// Statistics interval in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_stats_interval() -> u64 {
    5
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Statistics interval in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9050))
}

/// Combined configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub client: Option<ClientConfig>,
    pub server: Option<ServerConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let sessions = self
            .client
            .iter()
            .map(|c| &c.session)
            .chain(self.server.iter().map(|s| &s.session));

        for session in sessions {
            if !(50..=MAX_MTU).contains(&session.kcp.mtu) {
                return Err(ConfigError::Invalid(format!(
                    "mtu {} is outside 50..={}",
                    session.kcp.mtu, MAX_MTU
                )));
            }
            if session.connection_key.is_empty() {
                return Err(ConfigError::Invalid("connection_key is empty".into()));
            }
        }
        Ok(())
    }

    /// Create example client configuration
    pub fn example_client() -> Self {
        Config {
            client: Some(ClientConfig {
                host: "127.0.0.1".to_string(),
                port: 9050,
                stats_interval_secs: 5,
                session: SessionConfig::default(),
            }),
            server: None,
        }
    }

    /// Create example server configuration
    pub fn example_server() -> Self {
        Config {
            client: None,
            server: Some(ServerConfig {
                listen: default_listen(),
                stats_interval_secs: 5,
                session: SessionConfig::default(),
            }),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ClientConfig {
    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl ServerConfig {
    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_configs() {
        let client_config = Config::example_client();
        assert!(client_config.client.is_some());

        let server_config = Config::example_server();
        assert_eq!(server_config.server.unwrap().listen.port(), 9050);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = Config::example_client();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        let client = parsed.client.unwrap();
        assert_eq!(client.port, 9050);
        assert_eq!(client.session.kcp.mtu, 1200);
    }

    #[test]
    fn test_partial_session_uses_defaults() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:7000"

            [server.session]
            connection_key = "lobby"
            inactivity_timeout_ms = 3000
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let server = config.server.unwrap();
        assert_eq!(server.session.connection_key, "lobby");
        assert_eq!(server.session.inactivity_timeout_ms, 3000);
        assert_eq!(server.session.connect_timeout_ms, 5000);
        assert_eq!(server.stats_interval_secs, 5);
    }

    #[test]
    fn test_file_roundtrip_and_validation() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("duckov-config-{}.toml", std::process::id()));

        let mut config = Config::example_server();
        config.to_file(&path).unwrap();
        assert!(Config::from_file(&path).is_ok());

        if let Some(server) = config.server.as_mut() {
            server.session.kcp.mtu = 10;
        }
        config.to_file(&path).unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));

        if let Some(server) = config.server.as_mut() {
            server.session.kcp.mtu = MAX_MTU + 1;
        }
        config.to_file(&path).unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));

        let _ = fs::remove_file(&path);
    }
}
