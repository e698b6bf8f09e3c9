use super::{DialContext, DialError, Dialer, PeerStream};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::debug;

/// Plain TCP dialer
///
/// Used both as the conventional transport and to reach the SOCKS proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl TcpDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(
        &self,
        ctx: &DialContext,
        addr: SocketAddr,
    ) -> Result<Box<dyn PeerStream>, DialError> {
        debug!("TCP: connecting to {}", addr);

        let stream = ctx
            .run(async { TcpStream::connect(addr).await.map_err(DialError::from) })
            .await?;
        stream.set_nodelay(true)?;

        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"pong").await.unwrap();
        });

        let mut stream = TcpDialer::new()
            .dial(&DialContext::new(), addr)
            .await
            .unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_refused_is_io_error() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let result = TcpDialer::new().dial(&DialContext::new(), addr).await;
        assert!(matches!(result, Err(DialError::Io(_))));
    }
}
