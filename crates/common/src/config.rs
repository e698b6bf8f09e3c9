use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Network protocol constants
pub mod protocol {
    /// Default port for node communication
    pub const DEFAULT_PORT: u16 = 30303;

    /// Maximum encoded size of a signed node record
    pub const MAX_RECORD_SIZE: usize = 300;

    /// Default timeout for a single outbound dial
    pub const DIAL_TIMEOUT_MS: u64 = 10_000;

    /// Maximum inbound frame size accepted by the relay listener (1 MB)
    pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

    /// Default relay queue capacity
    pub const RELAY_QUEUE_CAPACITY: usize = 1024;
}

/// Tor daemon constants
pub mod tor {
    /// Default Tor SOCKS port
    pub const DEFAULT_SOCKS_ADDR: &str = "127.0.0.1:9050";

    /// Default Tor control port
    pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:9051";

    /// Budget for the onion attempt when a clearnet fallback is available
    pub const SOCKS_TIMEOUT_MS: u64 = 5_000;

    /// Round-trip timeout for a single control command
    pub const CONTROL_TIMEOUT_MS: u64 = 5_000;

    /// Size of the control authentication cookie
    pub const COOKIE_LEN: usize = 32;

    /// File name of the persisted hidden service key
    pub const SERVICE_KEY_FILE: &str = "onion_service_key";

    /// File name of the persisted hidden service hostname
    pub const HOSTNAME_FILE: &str = "hostname";
}

/// Policy deciding when peers are dialed through Tor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DialMode {
    /// Use onion transport when advertised, fall back to TCP
    #[default]
    Default,

    /// Try onion first whenever both transports are available
    #[serde(alias = "prefer-tor")]
    PreferOnion,

    /// Never touch clearnet; peers without an onion address are unreachable
    #[serde(alias = "tor-only")]
    OnionOnly,
}

impl DialMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::PreferOnion => "prefer-onion",
            Self::OnionOnly => "onion-only",
        }
    }

    /// Whether clearnet dialing is permitted at all
    pub fn allows_clearnet(&self) -> bool {
        !matches!(self, Self::OnionOnly)
    }
}

impl fmt::Display for DialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "" => Ok(Self::Default),
            "prefer-onion" | "prefer-tor" => Ok(Self::PreferOnion),
            "onion-only" | "tor-only" => Ok(Self::OnionOnly),
            other => Err(ConfigError::Invalid(format!("unknown dial mode: {}", other))),
        }
    }
}

/// Tor integration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    /// Provision a hidden service for this node at startup
    pub enabled: bool,

    /// SOCKS5 proxy used for onion dials (`host:port`)
    pub socks_addr: String,

    /// Control port used to provision the hidden service (`host:port`)
    pub control_addr: String,

    /// Authentication cookie; when unset, the path advertised by Tor is used
    pub cookie_path: Option<PathBuf>,

    /// Directory holding the service key and hostname files
    pub service_dir: Option<PathBuf>,

    /// Transport selection policy
    pub dial_mode: DialMode,

    /// Timeout for a single outbound dial
    pub dial_timeout_ms: u64,

    /// Bound on the onion attempt of a dial that can still fall back to
    /// clearnet, so the fallback keeps part of the dial timeout
    pub socks_timeout_ms: u64,

    /// Timeout for a single control command round trip
    pub control_timeout_ms: u64,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            socks_addr: tor::DEFAULT_SOCKS_ADDR.to_string(),
            control_addr: tor::DEFAULT_CONTROL_ADDR.to_string(),
            cookie_path: None,
            service_dir: None,
            dial_mode: DialMode::Default,
            dial_timeout_ms: protocol::DIAL_TIMEOUT_MS,
            socks_timeout_ms: tor::SOCKS_TIMEOUT_MS,
            control_timeout_ms: tor::CONTROL_TIMEOUT_MS,
        }
    }
}

impl TorConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn socks_timeout(&self) -> Duration {
        Duration::from_millis(self.socks_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    /// SOCKS endpoint; host names are resolved when dialing
    pub fn socks_addr(&self) -> Result<String, ConfigError> {
        parse_endpoint("tor.socks_addr", &self.socks_addr)
    }

    /// Control port endpoint; host names are resolved when connecting
    pub fn control_addr(&self) -> Result<String, ConfigError> {
        parse_endpoint("tor.control_addr", &self.control_addr)
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Listen address
    pub listen_addr: String,

    /// Listen port
    pub listen_port: u16,

    /// HTTP RPC endpoint (host:port) exposed through the hidden service
    pub http_endpoint: Option<String>,

    /// WebSocket RPC endpoint (host:port) exposed through the hidden service
    pub ws_endpoint: Option<String>,

    /// Text-encoded records of peers to dial at startup
    pub bootstrap_records: Vec<String>,

    /// Capacity of the inbound relay queue
    pub relay_queue_capacity: usize,

    /// Data directory
    pub data_dir: String,

    /// Enable verbose logging
    pub verbose: bool,

    /// Tor integration
    pub tor: TorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: protocol::DEFAULT_PORT,
            http_endpoint: None,
            ws_endpoint: None,
            bootstrap_records: Vec::new(),
            relay_queue_capacity: protocol::RELAY_QUEUE_CAPACITY,
            data_dir: "./data".to_string(),
            verbose: false,
            tor: TorConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_data_dir(mut self, dir: String) -> Self {
        self.data_dir = dir;
        self
    }

    pub fn with_dial_mode(mut self, mode: DialMode) -> Self {
        self.tor.dial_mode = mode;
        self
    }

    pub fn with_tor_enabled(mut self, enabled: bool) -> Self {
        self.tor.enabled = enabled;
        self
    }

    pub fn listen_socket(&self) -> Result<SocketAddr, ConfigError> {
        parse_socket_addr(
            "listen_addr",
            &format!("{}:{}", bracket_ipv6(&self.listen_addr), self.listen_port),
        )
    }

    /// Every local endpoint a hidden service may forward to: the p2p
    /// listener followed by the optional HTTP and WebSocket endpoints.
    pub fn service_endpoints(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        let mut endpoints = vec![self.listen_socket()?];
        if let Some(http) = &self.http_endpoint {
            endpoints.push(parse_socket_addr("http_endpoint", http)?);
        }
        if let Some(ws) = &self.ws_endpoint {
            endpoints.push(parse_socket_addr("ws_endpoint", ws)?);
        }
        Ok(endpoints)
    }

    /// Directory holding the hidden service identity
    pub fn service_dir(&self) -> PathBuf {
        self.tor
            .service_dir
            .clone()
            .unwrap_or_else(|| Path::new(&self.data_dir).join("tor"))
    }

    /// Check the configuration for values that would fail at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service_endpoints()?;
        self.tor.socks_addr()?;
        self.tor.control_addr()?;

        if self.tor.dial_timeout_ms == 0 {
            return Err(ConfigError::Invalid("tor.dial_timeout_ms must be non-zero".into()));
        }
        if self.tor.socks_timeout_ms == 0 {
            return Err(ConfigError::Invalid("tor.socks_timeout_ms must be non-zero".into()));
        }
        if self.tor.control_timeout_ms == 0 {
            return Err(ConfigError::Invalid("tor.control_timeout_ms must be non-zero".into()));
        }
        if self.relay_queue_capacity == 0 {
            return Err(ConfigError::Invalid("relay_queue_capacity must be non-zero".into()));
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

fn parse_socket_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}: not a socket address: {}", field, value)))
}

/// Check a `host:port` endpoint without resolving it
///
/// IPv6 literals must be bracketed (`[::1]:9051`).
fn parse_endpoint(field: &str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::Invalid(format!("{}: expected host:port, got {}", field, value));

    let (host, port) = value.rsplit_once(':').ok_or_else(invalid)?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
        None if host.contains(':') => return Err(invalid()),
        None => host,
    };

    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(invalid());
    }
    match port.parse::<u16>() {
        Ok(port) if port != 0 => Ok(value.to_string()),
        _ => Err(invalid()),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.listen_port, protocol::DEFAULT_PORT);
        assert_eq!(config.tor.dial_mode, DialMode::Default);
        assert!(!config.tor.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = NodeConfig::new()
            .with_port(4000)
            .with_data_dir("/tmp/data".to_string())
            .with_dial_mode(DialMode::OnionOnly)
            .with_tor_enabled(true);

        assert_eq!(config.listen_port, 4000);
        assert_eq!(config.data_dir, "/tmp/data");
        assert_eq!(config.tor.dial_mode, DialMode::OnionOnly);
        assert_eq!(config.service_dir(), PathBuf::from("/tmp/data/tor"));
    }

    #[test]
    fn test_dial_mode_parsing() {
        assert_eq!("default".parse::<DialMode>().unwrap(), DialMode::Default);
        assert_eq!("prefer-onion".parse::<DialMode>().unwrap(), DialMode::PreferOnion);
        assert_eq!("prefer-tor".parse::<DialMode>().unwrap(), DialMode::PreferOnion);
        assert_eq!("Tor-Only".parse::<DialMode>().unwrap(), DialMode::OnionOnly);
        assert!("sometimes".parse::<DialMode>().is_err());

        assert!(DialMode::Default.allows_clearnet());
        assert!(!DialMode::OnionOnly.allows_clearnet());
    }

    #[test]
    fn test_service_endpoints() {
        let mut config = NodeConfig::new().with_port(30303);
        config.http_endpoint = Some("127.0.0.1:8545".to_string());
        config.ws_endpoint = Some("127.0.0.1:8546".to_string());

        let endpoints = config.service_endpoints().unwrap();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[0].port(), 30303);
        assert_eq!(endpoints[2].port(), 8546);

        config.listen_addr = "::".to_string();
        assert!(config.listen_socket().unwrap().is_ipv6());
    }

    #[test]
    fn test_tor_endpoints_accept_host_names() {
        let mut config = NodeConfig::default();
        config.tor.control_addr = "localhost:9051".to_string();
        config.tor.socks_addr = "tor:9050".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.tor.control_addr().unwrap(), "localhost:9051");
        assert_eq!(config.tor.socks_addr().unwrap(), "tor:9050");

        config.tor.control_addr = "[::1]:9051".to_string();
        assert_eq!(config.tor.control_addr().unwrap(), "[::1]:9051");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        for endpoint in ["localhost", "tor:", ":9050", "tor:0", "tor:70000", "::1:9050"] {
            let mut config = NodeConfig::default();
            config.tor.socks_addr = endpoint.to_string();
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "{}",
                endpoint
            );
        }

        let mut config = NodeConfig::default();
        config.tor.dial_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.tor.socks_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.relay_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");

        let mut config = NodeConfig::new().with_dial_mode(DialMode::PreferOnion);
        config.tor.cookie_path = Some(PathBuf::from("/run/tor/control.authcookie"));
        config.to_file(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.tor.dial_mode, DialMode::PreferOnion);
        assert_eq!(loaded.tor.cookie_path, config.tor.cookie_path);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            listen_port = 31000

            [tor]
            dial_mode = "tor-only"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_port, 31000);
        assert_eq!(config.tor.dial_mode, DialMode::OnionOnly);
        assert_eq!(config.tor.socks_addr, tor::DEFAULT_SOCKS_ADDR);
    }
}
