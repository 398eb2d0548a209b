//! Configuration system for meshjoin.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESHJOIN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshjoin/config.toml
//!   3. ~/.config/meshjoin/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default listen address for a node.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8989";

/// Default number of neighbor links per node.
pub const DEFAULT_DEGREE_TARGET: u32 = 2;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshjoinConfig {
    pub node: NodeConfig,
    pub overlay: OverlayConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the discovery listener binds to.
    pub listen_addr: SocketAddr,
    /// Address other nodes should dial. Unset = the bound address.
    /// Required when listening on a wildcard address.
    pub advertise_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Neighbor links each node tries to hold.
    pub degree_target: u32,
    /// Nodes contacted, in order, when joining.
    pub seeds: Vec<SocketAddr>,
    /// Bound on every outbound round trip (connect, send, response).
    pub round_trip_timeout_ms: u64,
    /// How long an admission slot is held for a joining node that has not
    /// announced itself yet.
    pub reservation_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Loopback port for the HTTP status endpoint. 0 = disabled.
    pub status_port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8989)),
            advertise_addr: None,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            degree_target: DEFAULT_DEGREE_TARGET,
            seeds: Vec::new(),
            round_trip_timeout_ms: 5_000,
            reservation_ttl_secs: 30,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { status_port: 9898 }
    }
}

impl OverlayConfig {
    pub fn round_trip_timeout(&self) -> Duration {
        Duration::from_millis(self.round_trip_timeout_ms)
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("meshjoin")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid value for {0}: {1:?}")]
    InvalidValue(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshjoinConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshjoinConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESHJOIN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshjoinConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MESHJOIN_* overrides. `lookup` is `std::env::var` in production
    /// and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MESHJOIN_NODE__LISTEN_ADDR") {
            self.node.listen_addr = parse_addr("MESHJOIN_NODE__LISTEN_ADDR", &v)?;
        }
        if let Some(v) = lookup("MESHJOIN_NODE__ADVERTISE_ADDR") {
            self.node.advertise_addr = Some(parse_addr("MESHJOIN_NODE__ADVERTISE_ADDR", &v)?);
        }
        if let Some(v) = lookup("MESHJOIN_OVERLAY__DEGREE_TARGET") {
            self.overlay.degree_target = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MESHJOIN_OVERLAY__DEGREE_TARGET", v))?;
        }
        if let Some(v) = lookup("MESHJOIN_OVERLAY__SEEDS") {
            self.overlay.seeds = parse_seed_list(&v)?;
        }
        if let Some(v) = lookup("MESHJOIN_OVERLAY__ROUND_TRIP_TIMEOUT_MS") {
            self.overlay.round_trip_timeout_ms = v.parse().map_err(|_| {
                ConfigError::InvalidValue("MESHJOIN_OVERLAY__ROUND_TRIP_TIMEOUT_MS", v)
            })?;
        }
        if let Some(v) = lookup("MESHJOIN_API__STATUS_PORT") {
            self.api.status_port = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MESHJOIN_API__STATUS_PORT", v))?;
        }
        Ok(())
    }

    /// Reject settings the overlay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.overlay.degree_target == 0 {
            return Err(ConfigError::InvalidValue("overlay.degree_target", "0".into()));
        }
        if self.overlay.round_trip_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "overlay.round_trip_timeout_ms",
                "0".into(),
            ));
        }
        if self.node.listen_addr.ip().is_unspecified() && self.node.advertise_addr.is_none() {
            return Err(ConfigError::InvalidValue(
                "node.advertise_addr",
                "required when listening on a wildcard address".into(),
            ));
        }
        Ok(())
    }
}

fn parse_addr(key: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key, value.to_string()))
}

/// Parse a comma-separated `ip:port` list. Empty entries are skipped.
pub fn parse_seed_list(value: &str) -> Result<Vec<SocketAddr>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_addr("MESHJOIN_OVERLAY__SEEDS", s))
        .collect()
}
