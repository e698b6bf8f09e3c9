/// Peer dialing over TCP or Tor
///
/// The `ProxyDialer` picks, per peer, between the onion transport (a
/// SOCKS5 CONNECT through the local Tor proxy) and a conventional
/// delegate dialer according to the configured `DialMode`.

pub mod context;
pub mod proxy;
pub mod socks5;
pub mod target;
pub mod tcp;

pub use context::{CancelHandle, DialContext};
pub use proxy::ProxyDialer;
pub use target::TransportTarget;
pub use tcp::TcpDialer;

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream to a peer
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerStream for T {}

/// A point-to-point transport dialer
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        ctx: &DialContext,
        addr: SocketAddr,
    ) -> Result<Box<dyn PeerStream>, DialError>;
}

/// Dial errors
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("Peer has no usable address")]
    NoUsableAddress,

    #[error("SOCKS5 proxy reported failure: {reason} ({code:#04x})")]
    ProxyStatus { code: u8, reason: &'static str },

    #[error("SOCKS5 handshake failed: {0}")]
    ProxyHandshake(String),

    #[error("Dial timed out")]
    Timeout,

    #[error("Dial cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DialError {
    pub fn proxy_status(code: u8) -> Self {
        Self::ProxyStatus {
            code,
            reason: socks5::reply_reason(code),
        }
    }

    /// The proxy was reached but could not (or would not) connect us
    pub fn is_proxy_failure(&self) -> bool {
        matches!(self, Self::ProxyStatus { .. } | Self::ProxyHandshake(_))
    }
}
