use crate::record::{Ipv4Entry, Ipv6Entry, OnionAddress, Record, RecordError, TcpPort};
use onionp2p_common::protocol::DEFAULT_PORT;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Candidate addresses for a single dial attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTarget {
    onion: Option<OnionAddress>,
    endpoint: Option<SocketAddr>,
    onion_port: u16,
}

impl TransportTarget {
    pub fn new(onion: Option<OnionAddress>, endpoint: Option<SocketAddr>, onion_port: u16) -> Self {
        Self {
            onion,
            endpoint,
            onion_port,
        }
    }

    pub fn onion_only(onion: OnionAddress, port: u16) -> Self {
        Self::new(Some(onion), None, port)
    }

    pub fn endpoint_only(endpoint: SocketAddr) -> Self {
        Self::new(None, Some(endpoint), endpoint.port())
    }

    /// Derive the target from a peer's record
    ///
    /// A malformed onion entry is treated as absent. The clearnet endpoint
    /// prefers IPv4 over IPv6; the onion port is the advertised TCP port.
    pub fn from_record(record: &Record) -> Self {
        let onion = match record.load::<OnionAddress>() {
            Ok(address) => Some(address),
            Err(RecordError::NotFound(_)) => None,
            Err(e) => {
                debug!("Ignoring onion entry in peer record: {}", e);
                None
            }
        };

        let port = record
            .load::<TcpPort>()
            .ok()
            .map(|TcpPort(port)| port)
            .filter(|port| *port != 0);

        let ip = record
            .load::<Ipv4Entry>()
            .map(|Ipv4Entry(ip)| IpAddr::V4(ip))
            .or_else(|_| record.load::<Ipv6Entry>().map(|Ipv6Entry(ip)| IpAddr::V6(ip)))
            .ok();

        let endpoint = match (ip, port) {
            (Some(ip), Some(port)) => Some(SocketAddr::new(ip, port)),
            _ => None,
        };

        Self::new(onion, endpoint, port.unwrap_or(DEFAULT_PORT))
    }

    pub fn onion(&self) -> Option<&OnionAddress> {
        self.onion.as_ref()
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    pub fn onion_port(&self) -> u16 {
        self.onion_port
    }

    /// At least one address kind is present
    pub fn is_dialable(&self) -> bool {
        self.onion.is_some() || self.endpoint.is_some()
    }
}
