//! Layered application configuration (§10.2): an optional JSON file
//! supplies overrides on top of built-in defaults, mirroring the teacher's
//! `AppConfig::load` pattern — a missing or unparsable file just falls back
//! to defaults, logged either way, rather than failing startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-network connection details and channels to join before polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Channels some bots require membership in before serving XDCC (e.g.
    /// `#nibl`). Joined once at startup, in order.
    #[serde(default)]
    pub autojoin_channels: Vec<String>,
    #[serde(default = "default_join_delay_secs")]
    pub join_delay_secs: u64,
}

/// One bot this process polls a packlist from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotTarget {
    pub bot: String,
    /// Path to a filter file (§6): one regex per line.
    pub filters_file: String,
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: u64,
    #[serde(default)]
    pub repeat: bool,
}

/// The optional synchronous HTTP relay endpoint (§4.8/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_relay_addr")]
    pub bind_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_relay_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which entry of `networks` to connect to.
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub networks: HashMap<String, NetworkConfig>,

    #[serde(default = "default_nickname")]
    pub nickname: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_realname")]
    pub realname: String,

    /// Socket timeout for both the IRC control connection and DCC data
    /// sockets, in seconds (design value: 300s, §4/§5).
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,

    /// Caps DCC payload read throughput when set, parameterising the
    /// TokenBucket (§4.1).
    #[serde(default)]
    pub max_rate_kib_s: Option<u64>,

    /// Request `XDCC INFO #1` and compare MD5s before overwriting a `.txt`
    /// packlist that already exists on disk (§4.4).
    #[serde(default)]
    pub md5_check: bool,

    /// Files are written relative to this directory.
    #[serde(default = "default_download_dir")]
    pub download_dir: String,

    #[serde(default)]
    pub bots: Vec<BotTarget>,

    #[serde(default)]
    pub relay: RelayConfig,
}

fn default_port() -> u16 {
    6667
}
fn default_join_delay_secs() -> u64 {
    6
}
fn default_sleep_secs() -> u64 {
    3 * 60 * 60
}
fn default_relay_addr() -> String {
    "0.0.0.0:5555".to_string()
}
fn default_network() -> String {
    "Rizon".to_string()
}
fn default_nickname() -> String {
    "xdccbot".to_string()
}
fn default_username() -> String {
    "xdccbot".to_string()
}
fn default_realname() -> String {
    "xdcc session".to_string()
}
fn default_io_timeout_secs() -> u64 {
    300
}
fn default_download_dir() -> String {
    "downloads".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            networks: Self::default_networks(),
            nickname: default_nickname(),
            username: default_username(),
            realname: default_realname(),
            io_timeout_secs: default_io_timeout_secs(),
            max_rate_kib_s: None,
            md5_check: false,
            download_dir: default_download_dir(),
            bots: Vec::new(),
            relay: RelayConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, falling back to defaults on a missing or
    /// unparsable file — never fails startup.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    tracing::info!(path, "loaded config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path, error = %e, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path, "no config file found, using defaults");
                Self::default()
            }
        }
    }

    fn default_networks() -> HashMap<String, NetworkConfig> {
        let mut networks = HashMap::new();
        networks.insert(
            "Rizon".to_string(),
            NetworkConfig {
                host: "irc.rizon.net".to_string(),
                port: 6667,
                autojoin_channels: Vec::new(),
                join_delay_secs: default_join_delay_secs(),
            },
        );
        networks.insert(
            "Abjects".to_string(),
            NetworkConfig {
                host: "irc.abjects.net".to_string(),
                port: 6667,
                autojoin_channels: Vec::new(),
                join_delay_secs: default_join_delay_secs(),
            },
        );
        networks
    }

    /// Resolve `self.network` to connection details: an explicit entry in
    /// `networks` (case-insensitive), else a dotted hostname passed through
    /// as-is, else the `irc.<name>.net` guess.
    pub fn resolve_network(&self) -> NetworkConfig {
        for (key, config) in &self.networks {
            if key.eq_ignore_ascii_case(&self.network) {
                return config.clone();
            }
        }

        if self.network.contains('.') {
            return NetworkConfig {
                host: self.network.clone(),
                port: default_port(),
                autojoin_channels: Vec::new(),
                join_delay_secs: default_join_delay_secs(),
            };
        }

        NetworkConfig {
            host: format!("irc.{}.net", self.network.to_lowercase()),
            port: default_port(),
            autojoin_channels: Vec::new(),
            join_delay_secs: default_join_delay_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_rizon() {
        let config = AppConfig::default();
        let resolved = config.resolve_network();
        assert_eq!(resolved.host, "irc.rizon.net");
        assert_eq!(resolved.port, 6667);
    }

    #[test]
    fn resolves_dotted_hostname_passthrough() {
        let mut config = AppConfig::default();
        config.network = "irc.example.com".to_string();
        assert_eq!(config.resolve_network().host, "irc.example.com");
    }

    #[test]
    fn resolves_unknown_network_by_heuristic() {
        let mut config = AppConfig::default();
        config.network = "SceneP2P".to_string();
        assert_eq!(config.resolve_network().host, "irc.scenep2p.net");
    }

    #[test]
    fn explicit_network_lookup_is_case_insensitive() {
        let mut config = AppConfig::default();
        config.network = "rizon".to_string();
        assert_eq!(config.resolve_network().host, "irc.rizon.net");
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = AppConfig::load("/nonexistent/path/to/config.json");
        assert_eq!(config.nickname, "xdccbot");
    }

    #[test]
    fn round_trips_through_json() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let loaded: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.nickname, config.nickname);
        assert_eq!(loaded.io_timeout_secs, config.io_timeout_secs);
    }
}
