pub mod dial;
pub mod onion;
pub mod record;
pub mod relay;
pub mod storage;

// Re-export record types
pub use record::{
    Ipv4Entry, Ipv6Entry, NodeId, NodeKey, NodeKeyError, OnionAddress, OnionAddressError,
    PublicKeyEntry, Record, RecordEntry, RecordError, TcpPort, UnsignedRecord,
};

// Re-export dial types
pub use dial::{
    CancelHandle, DialContext, DialError, Dialer, PeerStream, ProxyDialer, TcpDialer,
    TransportTarget,
};

// Re-export provisioning types
pub use onion::{
    ProvisionError, Provisioner, ProvisionerConfig, ServiceKey, ServiceKeyStore,
};

// Re-export relay types
pub use relay::{relay_queue, RelayError, RelayHandle, RelayMessage, RelayReceiver};
