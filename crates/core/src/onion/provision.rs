use super::control::{ControlConnection, PortMapping};
use super::identity::ServiceKeyStore;
use super::ProvisionError;
use crate::record::{OnionAddress, UnsignedRecord};
use onionp2p_common::{tor::COOKIE_LEN, ConfigError, NodeConfig};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings for talking to the local Tor daemon
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Control port endpoint as `host:port`
    pub control_addr: String,
    /// When unset, the cookie file advertised by PROTOCOLINFO is used
    pub cookie_path: Option<PathBuf>,
    pub service_dir: PathBuf,
    pub control_timeout: Duration,
}

impl ProvisionerConfig {
    pub fn new(control_addr: impl ToString, service_dir: PathBuf) -> Self {
        Self {
            control_addr: control_addr.to_string(),
            cookie_path: None,
            service_dir,
            control_timeout: Duration::from_millis(onionp2p_common::tor::CONTROL_TIMEOUT_MS),
        }
    }

    pub fn with_cookie_path(mut self, path: PathBuf) -> Self {
        self.cookie_path = Some(path);
        self
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn from_node_config(config: &NodeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            control_addr: config.tor.control_addr()?,
            cookie_path: config.tor.cookie_path.clone(),
            service_dir: config.service_dir(),
            control_timeout: config.tor.control_timeout(),
        })
    }
}

/// Publishes this node as an onion service
#[derive(Debug)]
pub struct Provisioner {
    config: ProvisionerConfig,
    store: ServiceKeyStore,
}

/// ADD_ONION mappings for the given local endpoints
///
/// Each endpoint is exposed on its own port number. Endpoints with port 0
/// are skipped and unspecified hosts are reached over loopback.
pub fn port_mappings(endpoints: &[SocketAddr]) -> Result<Vec<PortMapping>, ProvisionError> {
    if endpoints.is_empty() {
        return Err(ProvisionError::NoListenEndpoint);
    }

    let mut mappings = BTreeSet::new();
    for endpoint in endpoints {
        if endpoint.port() == 0 {
            debug!("Skipping endpoint {} without a fixed port", endpoint);
            continue;
        }

        let host = match endpoint.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };

        mappings.insert(PortMapping {
            virtual_port: endpoint.port(),
            target: SocketAddr::new(host, endpoint.port()),
        });
    }

    if mappings.is_empty() {
        return Err(ProvisionError::NoMappings);
    }

    Ok(mappings.into_iter().collect())
}

impl Provisioner {
    pub fn new(config: ProvisionerConfig) -> Self {
        let store = ServiceKeyStore::new(&config.service_dir);
        Self { config, store }
    }

    pub fn store(&self) -> &ServiceKeyStore {
        &self.store
    }

    /// Publish the onion service and add its address to `record`
    ///
    /// The record is left unsigned; the caller must sign it again. The
    /// control connection is closed before returning, on success or error.
    pub async fn provision(
        &self,
        record: &mut UnsignedRecord,
        endpoints: &[SocketAddr],
    ) -> Result<OnionAddress, ProvisionError> {
        let mappings = port_mappings(endpoints)?;

        let mut conn =
            ControlConnection::connect(&self.config.control_addr, self.config.control_timeout)
                .await?;
        let result = self.provision_with(&mut conn, &mappings).await;
        conn.close().await;

        let address = result?;
        record.set(&address)?;

        info!("Onion service {} published", address);
        Ok(address)
    }

    async fn provision_with(
        &self,
        conn: &mut ControlConnection,
        mappings: &[PortMapping],
    ) -> Result<OnionAddress, ProvisionError> {
        let info = conn.protocol_info().await?;

        let cookie_path = self
            .config
            .cookie_path
            .clone()
            .or(info.cookie_file)
            .ok_or_else(|| {
                ProvisionError::AuthenticationFailed(
                    "no cookie file configured or advertised by Tor".to_string(),
                )
            })?;
        let cookie = read_cookie(&cookie_path).await?;
        conn.authenticate(&cookie).await?;

        let key = self.store.load_key()?;
        let reply = conn.add_onion(&key, mappings).await?;

        match (key.is_fresh(), reply.private_key.as_deref()) {
            (true, Some(private_key)) => {
                self.store.persist_key(private_key)?;
                info!(
                    "Stored new onion service key at {}",
                    self.store.key_path().display()
                );
            }
            (true, None) => warn!("Tor returned no private key; the onion address will change on restart"),
            (false, Some(_)) => debug!("Ignoring private key returned for an existing service"),
            (false, None) => {}
        }

        let address = OnionAddress::from_service_id(&reply.service_id)?;

        match self.store.load_hostname() {
            Ok(Some(previous)) if previous != address => warn!(
                "Onion address changed from {} to {}, replacing hostname file",
                previous, address
            ),
            Ok(_) => {}
            Err(e) => warn!("Replacing unreadable hostname file: {}", e),
        }
        self.store.persist_hostname(&address)?;

        Ok(address)
    }
}

async fn read_cookie(path: &Path) -> Result<Vec<u8>, ProvisionError> {
    let cookie = tokio::fs::read(path)
        .await
        .map_err(|e| ProvisionError::Cookie {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if cookie.len() != COOKIE_LEN {
        return Err(ProvisionError::Cookie {
            path: path.to_path_buf(),
            reason: format!("expected {} bytes, found {}", COOKIE_LEN, cookie.len()),
        });
    }

    Ok(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_no_endpoints() {
        assert!(matches!(
            port_mappings(&[]),
            Err(ProvisionError::NoListenEndpoint)
        ));
    }

    #[test]
    fn test_only_ephemeral_ports() {
        assert!(matches!(
            port_mappings(&[addr("127.0.0.1:0"), addr("[::1]:0")]),
            Err(ProvisionError::NoMappings)
        ));
    }

    #[test]
    fn test_mappings_sorted_and_deduplicated() {
        let mappings = port_mappings(&[
            addr("0.0.0.0:30303"),
            addr("127.0.0.1:8546"),
            addr("127.0.0.1:8545"),
            addr("127.0.0.1:30303"),
            addr("127.0.0.1:0"),
        ])
        .unwrap();

        let rendered: Vec<String> = mappings.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "Port=8545,127.0.0.1:8545",
                "Port=8546,127.0.0.1:8546",
                "Port=30303,127.0.0.1:30303",
            ]
        );
    }

    #[test]
    fn test_unspecified_ipv6_maps_to_loopback() {
        let mappings = port_mappings(&[addr("[::]:30303")]).unwrap();
        assert_eq!(mappings[0].to_string(), "Port=30303,[::1]:30303");
    }

    #[tokio::test]
    async fn test_cookie_length_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control_auth_cookie");

        std::fs::write(&path, [0u8; 31]).unwrap();
        assert!(matches!(
            read_cookie(&path).await,
            Err(ProvisionError::Cookie { .. })
        ));

        std::fs::write(&path, [7u8; 32]).unwrap();
        assert_eq!(read_cookie(&path).await.unwrap(), vec![7u8; 32]);

        assert!(matches!(
            read_cookie(&dir.path().join("missing")).await,
            Err(ProvisionError::Cookie { .. })
        ));
    }
}
