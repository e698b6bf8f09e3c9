/// Configuration shared by the onionp2p crates.

pub mod config;

pub use config::{protocol, tor, ConfigError, DialMode, NodeConfig, TorConfig};
