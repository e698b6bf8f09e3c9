use super::{socks5, DialContext, DialError, Dialer, PeerStream, TcpDialer, TransportTarget};
use crate::record::OnionAddress;
use onionp2p_common::{tor::SOCKS_TIMEOUT_MS, DialMode};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Dials peers over Tor, the delegate transport, or both in turn
///
/// Holds no per-dial state; share it behind an `Arc` and call `dial`
/// concurrently.
#[derive(Clone)]
pub struct ProxyDialer {
    mode: DialMode,
    proxy_addr: String,
    socks_timeout: Duration,
    delegate: Arc<dyn Dialer>,
    proxy_transport: Arc<dyn Dialer>,
}

impl ProxyDialer {
    /// `proxy_addr` is a `host:port` endpoint, resolved on every onion dial
    pub fn new(mode: DialMode, proxy_addr: impl ToString, delegate: Arc<dyn Dialer>) -> Self {
        Self {
            mode,
            proxy_addr: proxy_addr.to_string(),
            socks_timeout: Duration::from_millis(SOCKS_TIMEOUT_MS),
            delegate,
            proxy_transport: Arc::new(TcpDialer::new()),
        }
    }

    /// Reach the SOCKS proxy through `transport` instead of plain TCP
    pub fn with_proxy_transport(mut self, transport: Arc<dyn Dialer>) -> Self {
        self.proxy_transport = transport;
        self
    }

    /// Bound the onion attempt of dials that can fall back to clearnet
    pub fn with_socks_timeout(mut self, timeout: Duration) -> Self {
        self.socks_timeout = timeout;
        self
    }

    pub fn mode(&self) -> DialMode {
        self.mode
    }

    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }

    /// Connect to `target` according to the dial mode
    ///
    /// In `OnionOnly` mode the delegate is never invoked. Otherwise an onion
    /// address is tried first and a failed attempt falls back to the
    /// clearnet endpoint, unless the context was cancelled. The onion
    /// attempt then gets at most half of the remaining time.
    pub async fn dial(
        &self,
        ctx: &DialContext,
        target: &TransportTarget,
    ) -> Result<Box<dyn PeerStream>, DialError> {
        let onion = target.onion();
        let endpoint = target.endpoint();

        match (onion, endpoint) {
            (None, None) => Err(DialError::NoUsableAddress),

            (None, Some(endpoint)) => {
                if !self.mode.allows_clearnet() {
                    return Err(DialError::NoUsableAddress);
                }
                debug!("Dial {}: no onion address, using delegate", endpoint);
                self.delegate.dial(ctx, endpoint).await
            }

            (Some(onion), None) => self.dial_onion(ctx, onion, target.onion_port()).await,

            (Some(onion), Some(_)) if !self.mode.allows_clearnet() => {
                self.dial_onion(ctx, onion, target.onion_port()).await
            }

            (Some(onion), Some(endpoint)) => {
                let attempt = ctx.limited(self.onion_budget(ctx));
                match self.dial_onion(&attempt, onion, target.onion_port()).await {
                    Ok(stream) => Ok(stream),
                    Err(DialError::Cancelled) => Err(DialError::Cancelled),
                    Err(e) => {
                        debug!(
                            "Dial {}: onion path failed ({}), falling back to {}",
                            onion, e, endpoint
                        );
                        self.delegate.dial(ctx, endpoint).await
                    }
                }
            }
        }
    }

    fn onion_budget(&self, ctx: &DialContext) -> Duration {
        match ctx.remaining() {
            Some(remaining) => self.socks_timeout.min(remaining / 2),
            None => self.socks_timeout,
        }
    }

    async fn dial_onion(
        &self,
        ctx: &DialContext,
        onion: &OnionAddress,
        port: u16,
    ) -> Result<Box<dyn PeerStream>, DialError> {
        debug!("Dial {}:{} via SOCKS5 proxy {}", onion, port, self.proxy_addr);

        ctx.run(async {
            let mut stream = self.connect_proxy(ctx).await?;
            socks5::connect_domain(&mut stream, onion.as_str(), port).await?;
            Ok(stream)
        })
        .await
    }

    /// Resolve the proxy endpoint and connect to the first address that answers
    async fn connect_proxy(&self, ctx: &DialContext) -> Result<Box<dyn PeerStream>, DialError> {
        let mut last_error = None;
        for addr in tokio::net::lookup_host(self.proxy_addr.as_str()).await? {
            match self.proxy_transport.dial(ctx, addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DialError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("SOCKS proxy {} did not resolve", self.proxy_addr),
            ))
        }))
    }
}

impl std::fmt::Debug for ProxyDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyDialer")
            .field("mode", &self.mode)
            .field("proxy_addr", &self.proxy_addr)
            .field("socks_timeout", &self.socks_timeout)
            .finish_non_exhaustive()
    }
}
