/// SOCKS5 client handshake
///
/// Implements the CONNECT subset of RFC 1928 needed to reach an onion
/// service through Tor: no-auth method negotiation followed by a
/// CONNECT request addressed by domain name.

use super::DialError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// SOCKS5 protocol constants
pub const SOCKS_VERSION: u8 = 0x05;
const NO_AUTH_REQUIRED: u8 = 0x00;
const NO_ACCEPTABLE_METHODS: u8 = 0xFF;
const CONNECT_COMMAND: u8 = 0x01;
const RESERVED: u8 = 0x00;
const IPV4_ADDRESS: u8 = 0x01;
const DOMAIN_NAME: u8 = 0x03;
const IPV6_ADDRESS: u8 = 0x04;

/// Reply codes
pub const SUCCESS: u8 = 0x00;
pub const GENERAL_FAILURE: u8 = 0x01;
pub const CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const NETWORK_UNREACHABLE: u8 = 0x03;
pub const HOST_UNREACHABLE: u8 = 0x04;
pub const CONNECTION_REFUSED: u8 = 0x05;
pub const TTL_EXPIRED: u8 = 0x06;
pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Human readable meaning of a reply code
pub fn reply_reason(code: u8) -> &'static str {
    match code {
        SUCCESS => "succeeded",
        GENERAL_FAILURE => "general failure",
        CONNECTION_NOT_ALLOWED => "connection not allowed by ruleset",
        NETWORK_UNREACHABLE => "network unreachable",
        HOST_UNREACHABLE => "host unreachable",
        CONNECTION_REFUSED => "connection refused",
        TTL_EXPIRED => "TTL expired",
        COMMAND_NOT_SUPPORTED => "command not supported",
        ADDRESS_TYPE_NOT_SUPPORTED => "address type not supported",
        _ => "unknown error",
    }
}

/// Ask the proxy on `stream` to CONNECT to `host:port`
///
/// On success the stream is positioned at the first byte of application
/// data from the target.
pub async fn connect_domain<S>(stream: &mut S, host: &str, port: u16) -> Result<(), DialError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    if host.is_empty() || host.len() > u8::MAX as usize {
        return Err(DialError::ProxyHandshake(format!(
            "domain name length {} out of range",
            host.len()
        )));
    }

    // 1. Method negotiation
    stream
        .write_all(&[SOCKS_VERSION, 0x01, NO_AUTH_REQUIRED])
        .await?;

    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await?;

    if selection[0] != SOCKS_VERSION {
        return Err(DialError::ProxyHandshake(format!(
            "unexpected SOCKS version {:#04x}",
            selection[0]
        )));
    }
    match selection[1] {
        NO_AUTH_REQUIRED => {}
        NO_ACCEPTABLE_METHODS => {
            return Err(DialError::ProxyHandshake(
                "proxy requires authentication".to_string(),
            ))
        }
        other => {
            return Err(DialError::ProxyHandshake(format!(
                "proxy selected unsupported method {:#04x}",
                other
            )))
        }
    }

    // 2. CONNECT request
    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[
        SOCKS_VERSION,
        CONNECT_COMMAND,
        RESERVED,
        DOMAIN_NAME,
        host.len() as u8,
    ]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());

    stream.write_all(&request).await?;
    stream.flush().await?;

    // 3. Reply: VER | REP | RSV | ATYP | BND.ADDR | BND.PORT
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;

    if reply[0] != SOCKS_VERSION {
        return Err(DialError::ProxyHandshake(format!(
            "unexpected SOCKS version {:#04x} in reply",
            reply[0]
        )));
    }
    if reply[1] != SUCCESS {
        return Err(DialError::proxy_status(reply[1]));
    }

    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    let address_len = match header[1] {
        IPV4_ADDRESS => 4,
        IPV6_ADDRESS => 16,
        DOMAIN_NAME => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(DialError::ProxyHandshake(format!(
                "unknown bound address type {:#04x}",
                other
            )))
        }
    };

    // Bound address and port are not used
    let mut bound = vec![0u8; address_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const HOST: &str = "vww6ybal4bd7szmgncyruucpgfkqahzddi37ktceo3ah7ngmcopnpyyd.onion";

    /// Play the proxy side: check the exact client bytes and answer with `reply`
    async fn proxy_side<S>(mut proxy: S, reply: Vec<u8>) -> Vec<u8>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut greeting = [0u8; 3];
        proxy.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [0x05, 0x01, 0x00]);
        proxy.write_all(&[0x05, 0x00]).await.unwrap();

        let mut request = vec![0u8; 5 + HOST.len() + 2];
        proxy.read_exact(&mut request).await.unwrap();
        proxy.write_all(&reply).await.unwrap();
        request
    }

    #[tokio::test]
    async fn test_connect_request_bytes() {
        let (mut client, proxy) = duplex(1024);
        let reply = vec![0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0, b'h', b'i'];
        let server = tokio::spawn(proxy_side(proxy, reply));

        connect_domain(&mut client, HOST, 30303).await.unwrap();
        let request = server.await.unwrap();

        assert_eq!(&request[..5], &[0x05, 0x01, 0x00, 0x03, HOST.len() as u8]);
        assert_eq!(&request[5..5 + HOST.len()], HOST.as_bytes());
        assert_eq!(&request[5 + HOST.len()..], &[0x76, 0x5f]);

        // Application data follows the reply
        let mut data = [0u8; 2];
        client.read_exact(&mut data).await.unwrap();
        assert_eq!(&data, b"hi");
    }

    #[tokio::test]
    async fn test_domain_bound_address_consumed() {
        let (mut client, proxy) = duplex(1024);
        let reply = vec![0x05, 0x00, 0x00, 0x03, 3, b'a', b'b', b'c', 0x1f, 0x90, b'!'];
        let server = tokio::spawn(proxy_side(proxy, reply));

        connect_domain(&mut client, HOST, 80).await.unwrap();
        server.await.unwrap();

        let mut data = [0u8; 1];
        client.read_exact(&mut data).await.unwrap();
        assert_eq!(&data, b"!");
    }

    #[tokio::test]
    async fn test_refused_status_is_proxy_error() {
        let (mut client, proxy) = duplex(1024);
        let reply = vec![0x05, CONNECTION_REFUSED, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        tokio::spawn(proxy_side(proxy, reply));

        let err = connect_domain(&mut client, HOST, 30303).await.unwrap_err();
        assert!(matches!(err, DialError::ProxyStatus { code: CONNECTION_REFUSED, .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_auth_required_rejected() {
        let (mut client, mut proxy) = duplex(64);
        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            proxy.write_all(&[0x05, 0xFF]).await.unwrap();
        });

        let err = connect_domain(&mut client, HOST, 30303).await.unwrap_err();
        assert!(matches!(err, DialError::ProxyHandshake(_)));
    }

    #[tokio::test]
    async fn test_wrong_version_rejected() {
        let (mut client, mut proxy) = duplex(64);
        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            proxy.write_all(&[0x04, 0x00]).await.unwrap();
        });

        let err = connect_domain(&mut client, HOST, 30303).await.unwrap_err();
        assert!(matches!(err, DialError::ProxyHandshake(_)));
    }

    #[tokio::test]
    async fn test_truncated_reply_is_io_error() {
        let (mut client, mut proxy) = duplex(64);
        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            proxy.write_all(&[0x05]).await.unwrap();
            // proxy dropped here
        });

        let err = connect_domain(&mut client, HOST, 30303).await.unwrap_err();
        assert!(matches!(err, DialError::Io(_)));
    }

    #[tokio::test]
    async fn test_overlong_domain_rejected_locally() {
        let (mut client, _proxy) = duplex(64);
        let host = "a".repeat(256);
        let err = connect_domain(&mut client, &host, 1).await.unwrap_err();
        assert!(matches!(err, DialError::ProxyHandshake(_)));
    }
}
