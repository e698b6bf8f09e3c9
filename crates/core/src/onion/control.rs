use super::identity::ServiceKey;
use super::reply::{keyword_args, Reply, ReplyParser};
use super::ProvisionError;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// One `Port=` argument of ADD_ONION
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortMapping {
    pub virtual_port: u16,
    pub target: SocketAddr,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port={},{}", self.virtual_port, self.target)
    }
}

/// Parsed PROTOCOLINFO reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub auth_methods: Vec<String>,
    pub cookie_file: Option<PathBuf>,
    pub tor_version: Option<String>,
}

impl ProtocolInfo {
    fn from_reply(reply: &Reply) -> Self {
        let mut info = Self::default();

        if let Some(auth) = reply.line("AUTH") {
            for (key, value) in keyword_args(auth) {
                match key.as_str() {
                    "METHODS" => {
                        info.auth_methods = value.split(',').map(str::to_string).collect()
                    }
                    "COOKIEFILE" => info.cookie_file = Some(PathBuf::from(value)),
                    _ => {}
                }
            }
        }

        if let Some(version) = reply.line("VERSION") {
            info.tor_version = keyword_args(version)
                .into_iter()
                .find(|(key, _)| key == "Tor")
                .map(|(_, value)| value);
        }

        info
    }

    pub fn supports_cookie(&self) -> bool {
        self.auth_methods.iter().any(|m| m == "COOKIE" || m == "SAFECOOKIE")
    }
}

/// Result of ADD_ONION
#[derive(Clone, PartialEq, Eq)]
pub struct AddOnionReply {
    pub service_id: String,
    /// Present only when Tor generated a new key
    pub private_key: Option<String>,
}

impl fmt::Debug for AddOnionReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddOnionReply")
            .field("service_id", &self.service_id)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A single control port session
///
/// Every command round trip is bounded by the session timeout.
pub struct ControlConnection {
    stream: BufReader<TcpStream>,
    timeout: Duration,
}

impl ControlConnection {
    /// Connect to `addr` (`host:port`); host names are resolved here
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, ProvisionError> {
        debug!("Connecting to Tor control port {}", addr);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProvisionError::Timeout)?
            .map_err(|source| ProvisionError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            stream: BufReader::new(stream),
            timeout,
        })
    }

    /// Send `command` and wait for its complete reply
    pub async fn command(&mut self, command: &str) -> Result<Reply, ProvisionError> {
        let verb = command.split(' ').next().unwrap_or_default();
        debug!("Tor control: {}", verb);

        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.round_trip(command))
            .await
            .map_err(|_| ProvisionError::Timeout)?
    }

    async fn round_trip(&mut self, command: &str) -> Result<Reply, ProvisionError> {
        self.stream
            .write_all(format!("{}\r\n", command).as_bytes())
            .await?;
        self.stream.flush().await?;

        let mut parser = ReplyParser::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(ProvisionError::MalformedReply(
                    "connection closed before end of reply".to_string(),
                ));
            }
            if let Some(reply) = parser.push(&line)? {
                return Ok(reply);
            }
        }
    }

    pub async fn protocol_info(&mut self) -> Result<ProtocolInfo, ProvisionError> {
        let reply = self.command("PROTOCOLINFO 1").await?;
        let info = ProtocolInfo::from_reply(&reply);
        debug!(
            "Tor {} offers auth methods {:?}",
            info.tor_version.as_deref().unwrap_or("(unknown version)"),
            info.auth_methods
        );
        Ok(info)
    }

    pub async fn authenticate(&mut self, cookie: &[u8]) -> Result<(), ProvisionError> {
        let command = format!("AUTHENTICATE {}", hex::encode(cookie));
        match self.command(&command).await {
            Ok(_) => Ok(()),
            Err(ProvisionError::Protocol { status, text }) => Err(
                ProvisionError::AuthenticationFailed(format!("{} {}", status, text)),
            ),
            Err(e) => Err(e),
        }
    }

    /// Ask Tor to publish a detached onion service
    pub async fn add_onion(
        &mut self,
        key: &ServiceKey,
        mappings: &[PortMapping],
    ) -> Result<AddOnionReply, ProvisionError> {
        let mut command = format!("ADD_ONION {} Flags=Detach", key.as_command_arg());
        for mapping in mappings {
            command.push(' ');
            command.push_str(&mapping.to_string());
        }

        let reply = match self.command(&command).await {
            Ok(reply) => reply,
            Err(ProvisionError::Protocol { status, text }) => {
                return Err(ProvisionError::ProvisioningFailed(format!(
                    "{} {}",
                    status, text
                )))
            }
            Err(e) => return Err(e),
        };

        let service_id = reply.value("ServiceID").ok_or_else(|| {
            ProvisionError::ProvisioningFailed("reply carried no ServiceID".to_string())
        })?;

        Ok(AddOnionReply {
            service_id,
            private_key: reply.value("PrivateKey"),
        })
    }

    /// End the session; a detached service outlives it
    pub async fn close(mut self) {
        let _ = self.stream.write_all(b"QUIT\r\n").await;
        let _ = self.stream.get_mut().shutdown().await;
    }
}
