//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files (`<config dir>/peerfetch/config.toml` by default)
//! - Environment variables (`PEERFETCH_*`)
//! - CLI arguments (for the `peerfetch` binary)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use crate::transport::TransportConfig;
use crate::error::{PeerFetchError, Result};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// ICE server configuration
    #[serde(default)]
    pub ice: IceConfig,

    /// Data-channel transport configuration
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("peerfetch").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            PeerFetchError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| PeerFetchError::Config(format!("Failed to parse config: {e}")))?;
        config.transport.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("PEERFETCH_ICE_URL") {
            config.ice.servers = url
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(IceServer::new)
                .collect();
        }
        if let Ok(agent) = std::env::var("PEERFETCH_USER_AGENT") {
            config.transport.user_agent = agent;
        }
        if let Ok(mtu) = std::env::var("PEERFETCH_MTU") {
            if let Ok(mtu) = mtu.parse() {
                config.transport = config.transport.with_mtu(mtu);
            }
        }
        if let Ok(ack) = std::env::var("PEERFETCH_ACK_EOF") {
            if let Some(ack) = parse_bool(&ack) {
                config.transport.ack_eof = ack;
            }
        }

        config
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let defaults = Self::default();
        Self {
            ice: if other.ice != defaults.ice {
                other.ice
            } else {
                self.ice
            },
            transport: TransportConfig {
                mtu: pick(other.transport.mtu, self.transport.mtu, defaults.transport.mtu),
                low_watermark: pick(
                    other.transport.low_watermark,
                    self.transport.low_watermark,
                    defaults.transport.low_watermark,
                ),
                high_watermark: pick(
                    other.transport.high_watermark,
                    self.transport.high_watermark,
                    defaults.transport.high_watermark,
                ),
                retry_delay_ms: pick(
                    other.transport.retry_delay_ms,
                    self.transport.retry_delay_ms,
                    defaults.transport.retry_delay_ms,
                ),
                ack_eof: pick(
                    other.transport.ack_eof,
                    self.transport.ack_eof,
                    defaults.transport.ack_eof,
                ),
                user_agent: pick(
                    other.transport.user_agent,
                    self.transport.user_agent,
                    defaults.transport.user_agent,
                ),
            },
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// `other` if it differs from the default, else `base`.
fn pick<T: PartialEq>(other: T, base: T, default: T) -> T {
    if other != default {
        other
    } else {
        base
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// ICE configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceConfig {
    /// STUN/TURN servers offered to the peer connection
    #[serde(default)]
    pub servers: Vec<IceServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![IceServer::new("stun:stun.l.google.com:19302")],
        }
    }
}

/// One STUN or TURN server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs (`stun:` / `turn:`)
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// TURN credential
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

impl IceServer {
    /// Server without credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ice.servers.len(), 1);
        assert!(config.ice.servers[0].urls[0].starts_with("stun:"));
        assert_eq!(config.transport.mtu, 16384);
        assert!(config.transport.ack_eof);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [[ice.servers]]
            urls = ["turn:turn.example.org:3478"]
            username = "alice"
            credential = "hunter2"

            [transport]
            mtu = 8192
            ack_eof = false
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.ice.servers[0].username, "alice");
        assert_eq!(config.transport.mtu, 8192);
        assert!(!config.transport.ack_eof);
        // Unspecified fields keep their defaults.
        assert_eq!(config.transport.retry_delay_ms, 500);
    }

    #[test]
    fn test_from_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transport]\nmtu = 0").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(PeerFetchError::Config(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transport]\nretry_delay_ms = 50").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.transport.retry_delay_ms, 50);

        assert!(Config::from_file("/nonexistent/peerfetch.toml").is_err());
    }

    #[test]
    fn test_merge_prefers_non_default() {
        let mut base = Config::default();
        base.transport.user_agent = "base/1".into();
        base.transport.retry_delay_ms = 100;

        let mut other = Config::default();
        other.transport.ack_eof = false;

        let merged = base.merge(other);
        assert_eq!(merged.transport.user_agent, "base/1");
        assert_eq!(merged.transport.retry_delay_ms, 100);
        assert!(!merged.transport.ack_eof);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
