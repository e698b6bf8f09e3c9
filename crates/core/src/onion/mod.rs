/// Hidden service provisioning over the Tor control protocol
///
/// At startup the node connects to the local Tor control port,
/// authenticates with the cookie file, asks Tor to publish an onion
/// service forwarding to its listeners and records the resulting address
/// in its node record. The service key is persisted so the address
/// survives restarts.

pub mod control;
pub mod identity;
pub mod provision;
pub mod reply;

pub use control::{AddOnionReply, ControlConnection, PortMapping, ProtocolInfo};
pub use identity::{ServiceKey, ServiceKeyStore};
pub use provision::{port_mappings, Provisioner, ProvisionerConfig};
pub use reply::{parse_line, LineKind, Reply, ReplyLine, ReplyParser};

use crate::record::{OnionAddressError, RecordError};
use std::path::PathBuf;

/// Provisioning errors
///
/// Every variant is terminal for a single `provision` call; nothing here is
/// retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("No listening endpoint to expose")]
    NoListenEndpoint,

    #[error("No usable port mappings")]
    NoMappings,

    #[error("Failed to connect to Tor control port {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tor control command timed out")]
    Timeout,

    #[error("Malformed control reply: {0}")]
    MalformedReply(String),

    #[error("Tor returned {status}: {text}")]
    Protocol { status: u16, text: String },

    #[error("Tor control authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Unusable cookie file {}: {reason}", path.display())]
    Cookie { path: PathBuf, reason: String },

    #[error("Onion service provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("Service key store {}: {source}", path.display())]
    KeyStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Tor returned an invalid service id: {0}")]
    Address(#[from] OnionAddressError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
