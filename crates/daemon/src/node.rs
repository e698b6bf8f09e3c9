/// Node runtime
///
/// Sequences startup: identity, local record, onion service, dialer,
/// listener and relay drain. Inbound peers open with a hello frame
/// carrying their signed record; every later frame is queued for relay.

use anyhow::{bail, Context, Result};
use onionp2p_common::{DialMode, NodeConfig};
use onionp2p_core::onion::{Provisioner, ProvisionerConfig};
use onionp2p_core::record::{Ipv4Entry, Ipv6Entry, TcpPort};
use onionp2p_core::relay::{read_frame, write_frame};
use onionp2p_core::{
    relay_queue, DialContext, NodeId, NodeKey, OnionAddress, PeerStream, ProxyDialer, Record,
    RelayError, RelayHandle, RelayMessage, RelayReceiver, TcpDialer, TransportTarget,
    UnsignedRecord,
};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Frame code of the hello message opening every peer connection
pub const HELLO_CODE: u64 = 0;

/// File names inside the data directory
pub const NODE_KEY_FILE: &str = "nodekey";
pub const RECORD_FILE: &str = "record.txt";

/// A running node
pub struct NodeRuntime {
    config: NodeConfig,
    key: Arc<NodeKey>,
    record: Arc<Record>,
    onion: Option<OnionAddress>,
    dialer: Arc<ProxyDialer>,
    relay: RelayHandle,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Snapshot of runtime state for display
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub record_seq: u64,
    pub onion: Option<OnionAddress>,
    pub local_addr: SocketAddr,
    pub dial_mode: DialMode,
    pub relay_queued: usize,
    pub relay_capacity: usize,
}

impl NodeRuntime {
    /// Start the node
    pub async fn start(config: NodeConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        // 1. Identity
        let data_dir = PathBuf::from(&config.data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let key = load_node_key(&data_dir)?;
        info!("Node ID: {}", key.node_id());

        // 2. Local record
        let mut record = local_record(&config)?;

        // 3. Onion service
        let onion = if config.tor.enabled {
            match provision_onion(&config, &mut record).await {
                Ok(address) => Some(address),
                Err(e) if config.tor.dial_mode == DialMode::OnionOnly => {
                    return Err(e.context("Onion service required in onion-only mode"));
                }
                Err(e) => {
                    warn!("Continuing without onion service: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        // 4. Sign and publish
        let record = record.sign(&key).context("Failed to sign node record")?;
        let text = record.to_text()?;
        tokio::fs::write(data_dir.join(RECORD_FILE), format!("{}\n", text))
            .await
            .context("Failed to write node record")?;
        info!("Node record (seq {}): {}", record.seq(), text);

        // 5. Dialer
        let dialer = Arc::new(build_dialer(&config)?);
        info!(
            "Dial mode {} via SOCKS5 proxy {}",
            dialer.mode(),
            dialer.proxy_addr()
        );

        // 6. Listener and relay
        let (relay, receiver) = relay_queue(config.relay_queue_capacity);
        let listener = TcpListener::bind(config.listen_socket()?)
            .await
            .context("Failed to bind p2p listener")?;
        let local_addr = listener.local_addr()?;
        info!("Listening for peers on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(accept_loop(listener, relay.clone(), shutdown_rx.clone())),
            tokio::spawn(drain_loop(receiver, shutdown_rx)),
        ];

        let mut runtime = Self {
            config,
            key: Arc::new(key),
            record: Arc::new(record),
            onion,
            dialer,
            relay,
            local_addr,
            shutdown_tx,
            tasks,
        };
        runtime.spawn_bootstrap();

        Ok(runtime)
    }

    pub fn node_id(&self) -> NodeId {
        self.key.node_id()
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn onion_address(&self) -> Option<&OnionAddress> {
        self.onion.as_ref()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node_id(),
            record_seq: self.record.seq(),
            onion: self.onion.clone(),
            local_addr: self.local_addr,
            dial_mode: self.dialer.mode(),
            relay_queued: self.relay.len(),
            relay_capacity: self.relay.capacity(),
        }
    }

    /// A dial context bounded by the configured timeout and node shutdown
    pub fn dial_context(&self) -> DialContext {
        DialContext::with_timeout(self.config.tor.dial_timeout())
            .cancel_on(self.shutdown_tx.subscribe())
    }

    /// Dial a peer and introduce ourselves
    pub async fn connect(&self, peer: &Record) -> Result<Box<dyn PeerStream>> {
        connect_peer(&self.dialer, &self.dial_context(), &self.record, peer).await
    }

    fn spawn_bootstrap(&mut self) {
        for text in &self.config.bootstrap_records {
            let (peer, peer_id) = match Record::from_text(text).and_then(|peer| {
                let id = peer.node_id()?;
                Ok((peer, id))
            }) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Skipping bootstrap record: {}", e);
                    continue;
                }
            };

            let dialer = self.dialer.clone();
            let ctx = self.dial_context();
            let record = self.record.clone();
            let relay = self.relay.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks.push(tokio::spawn(async move {
                let label = peer_label(&peer);
                let mut stream = match connect_peer(&dialer, &ctx, &record, &peer).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("Bootstrap peer {} unreachable: {:#}", label, e);
                        return;
                    }
                };
                info!("Connected to bootstrap peer {}", label);

                if let Err(e) = relay_frames(peer_id, &mut stream, &relay, shutdown_rx).await {
                    debug!("Bootstrap peer {} disconnected: {:#}", label, e);
                }
            }));
        }
    }

    /// Stop background tasks and wait for them to finish
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Node stopped");
    }
}

/// Load the node key from `<data_dir>/nodekey`, creating it on first run
pub fn load_node_key(data_dir: &Path) -> Result<NodeKey> {
    let path = data_dir.join(NODE_KEY_FILE);
    NodeKey::load_or_generate(&path)
        .with_context(|| format!("Failed to load node key {}", path.display()))
}

/// The unsigned local record: listening port and, unless dialing is
/// onion-only, the listen address when it is a concrete IP
pub fn local_record(config: &NodeConfig) -> Result<UnsignedRecord> {
    let listen = config.listen_socket()?;
    let mut record = UnsignedRecord::new();

    if listen.port() != 0 {
        record.set(&TcpPort(listen.port()))?;
    }

    if config.tor.dial_mode.allows_clearnet() && !listen.ip().is_unspecified() {
        match listen.ip() {
            IpAddr::V4(ip) => record.set(&Ipv4Entry(ip))?,
            IpAddr::V6(ip) => record.set(&Ipv6Entry(ip))?,
        }
    }

    Ok(record)
}

/// Publish the onion service and add its address to `record`
pub async fn provision_onion(config: &NodeConfig, record: &mut UnsignedRecord) -> Result<OnionAddress> {
    let provisioner = Provisioner::new(ProvisionerConfig::from_node_config(config)?);
    let endpoints = config.service_endpoints()?;

    provisioner
        .provision(record, &endpoints)
        .await
        .context("Failed to provision onion service")
}

pub fn build_dialer(config: &NodeConfig) -> Result<ProxyDialer> {
    Ok(ProxyDialer::new(
        config.tor.dial_mode,
        config.tor.socks_addr()?,
        Arc::new(TcpDialer::new()),
    )
    .with_socks_timeout(config.tor.socks_timeout()))
}

/// Dial `peer` and send the hello frame carrying `local`
pub async fn connect_peer(
    dialer: &ProxyDialer,
    ctx: &DialContext,
    local: &Record,
    peer: &Record,
) -> Result<Box<dyn PeerStream>> {
    let target = TransportTarget::from_record(peer);
    let mut stream = dialer
        .dial(ctx, &target)
        .await
        .with_context(|| format!("Failed to dial {}", peer_label(peer)))?;

    write_frame(&mut stream, HELLO_CODE, &local.encode()?).await?;
    debug!("Sent hello to {}", peer_label(peer));

    Ok(stream)
}

fn peer_label(record: &Record) -> String {
    record
        .node_id()
        .map(|id| id.short_hex())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

async fn accept_loop(
    listener: TcpListener,
    relay: RelayHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("Inbound connection from {}", addr);
                    let relay = relay.clone();
                    let shutdown_rx = shutdown_rx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_peer(stream, relay, shutdown_rx).await {
                            debug!("Peer {} disconnected: {:#}", addr, e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn handle_peer(
    mut stream: TcpStream,
    relay: RelayHandle,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let peer = match read_frame(&mut stream).await? {
        Some((HELLO_CODE, payload)) => Record::decode(&payload)?.node_id()?,
        Some((code, _)) => bail!("expected hello, got message code {}", code),
        None => return Ok(()),
    };
    info!("Peer {} connected", peer.short_hex());

    relay_frames(peer, &mut stream, &relay, shutdown_rx).await
}

/// Feed every frame from `peer` into the relay queue until the stream
/// ends or the node shuts down
async fn relay_frames<S>(
    peer: NodeId,
    stream: &mut S,
    relay: &RelayHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + Unpin + ?Sized,
{
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut *stream) => frame?,
            _ = shutdown_rx.changed() => return Ok(()),
        };
        let Some((code, payload)) = frame else {
            debug!("Peer {} closed the connection", peer.short_hex());
            return Ok(());
        };

        match relay.try_enqueue(RelayMessage { peer, code, payload }) {
            Ok(()) => {}
            Err(RelayError::QueueFull { capacity }) => {
                warn!("Relay queue full ({}), dropping message from {}", capacity, peer.short_hex())
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn drain_loop(mut receiver: RelayReceiver, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(message) => info!(
                    "Relayed message {:#x} from {} ({} bytes)",
                    message.code,
                    message.peer.short_hex(),
                    message.payload.len()
                ),
                None => break,
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    receiver.close();
                    break;
                }
            }
        }
    }
}
