/// onionp2p Daemon - peer-to-peer node with Tor reachability
///
/// This daemon runs a node that:
/// - Advertises an onion address in its signed node record
/// - Dials peers over Tor or TCP according to the configured dial mode
/// - Provisions its own onion service through the Tor control port
/// - Relays messages received from peers

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use onionp2p_common::NodeConfig;
use onionp2p_core::record::{Ipv4Entry, Ipv6Entry, TcpPort};
use onionp2p_core::{DialContext, OnionAddress, Record};
use onionp2p_daemon::node::{
    build_dialer, connect_peer, load_node_key, local_record, provision_onion, RECORD_FILE,
};
use onionp2p_daemon::{logging, NodeRuntime, NodeStatus};

/// Configuration file used when none is given
const DEFAULT_CONFIG_FILE: &str = "onionp2p.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("run");

    match command {
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        "version" | "--version" | "-v" => {
            println!("onionp2p Daemon v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "run" => run_node(args.get(2).map(PathBuf::from)).await,
        "provision" => run_provision(args.get(2).map(PathBuf::from)).await,
        "dial" => {
            let Some(text) = args.get(2) else {
                bail!("Usage: onionp2p-daemon dial <record-text> [config]");
            };
            run_dial(text, args.get(3).map(PathBuf::from)).await
        }
        "record" => show_record(args.get(2).map(PathBuf::from)),
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Run with 'help' to see available commands");
            std::process::exit(1);
        }
    }
}

/// Load configuration from `path`, the default file, or built-in defaults
fn load_config(path: Option<PathBuf>, save_default: bool) -> Result<NodeConfig> {
    if let Some(path) = path {
        return NodeConfig::from_file(&path)
            .with_context(|| format!("Failed to load configuration {}", path.display()));
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        return NodeConfig::from_file(default_path)
            .with_context(|| format!("Failed to load configuration {}", default_path.display()));
    }

    let config = NodeConfig::default();
    if save_default {
        match config.to_file(default_path) {
            Ok(()) => println!("Saved default configuration to {}", default_path.display()),
            Err(e) => eprintln!("Failed to save default config: {}", e),
        }
    }
    Ok(config)
}

/// Run the node until Ctrl+C
async fn run_node(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, true)?;
    logging::init(config.verbose);

    info!("Starting onionp2p Daemon v{}", env!("CARGO_PKG_VERSION"));

    let node = NodeRuntime::start(config).await?;
    print_status(&node.status());

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    node.stop().await;
    Ok(())
}

/// Provision the onion service and exit
async fn run_provision(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, false)?;
    logging::init(config.verbose);

    let mut record = local_record(&config)?;
    let address = provision_onion(&config, &mut record).await?;

    println!("{}", address);
    Ok(())
}

/// Dial a single peer and exit
async fn run_dial(text: &str, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, false)?;
    logging::init(config.verbose);

    let peer = Record::from_text(text).context("Invalid peer record")?;
    let peer_id = peer.node_id()?;

    // Introduce ourselves with the published record when there is one
    let data_dir = PathBuf::from(&config.data_dir);
    let local = match std::fs::read_to_string(data_dir.join(RECORD_FILE)) {
        Ok(text) => Record::from_text(text.trim())?,
        Err(_) => {
            warn!("No published record, introducing with a fresh one");
            let key = load_node_key(&data_dir)?;
            local_record(&config)?.sign(&key)?
        }
    };

    let dialer = build_dialer(&config)?;
    let ctx = DialContext::with_timeout(config.tor.dial_timeout());
    connect_peer(&dialer, &ctx, &local, &peer).await?;

    println!("Connected to {}", peer_id);
    Ok(())
}

/// Print the published node record
fn show_record(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path, false)?;
    let path = PathBuf::from(&config.data_dir).join(RECORD_FILE);

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("No record at {}; run the node first", path.display()))?;
    let record = Record::from_text(text.trim())?;

    let summary = serde_json::json!({
        "node_id": record.node_id()?.to_hex(),
        "seq": record.seq(),
        "onion": record.load::<OnionAddress>().ok().map(|a| a.to_string()),
        "ip": record.load::<Ipv4Entry>().ok().map(|Ipv4Entry(ip)| ip.to_string()),
        "ip6": record.load::<Ipv6Entry>().ok().map(|Ipv6Entry(ip)| ip.to_string()),
        "tcp": record.load::<TcpPort>().ok().map(|TcpPort(port)| port),
        "text": text.trim(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Print node status
fn print_status(status: &NodeStatus) {
    println!("\n========================================");
    println!("         onionp2p Node Status");
    println!("========================================");
    println!("Node ID:          {}", status.node_id);
    println!("Record seq:       {}", status.record_seq);
    println!(
        "Onion address:    {}",
        status
            .onion
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("Listening on:     {}", status.local_addr);
    println!("Dial mode:        {}", status.dial_mode);
    println!(
        "Relay queue:      {}/{}",
        status.relay_queued, status.relay_capacity
    );
    println!("========================================\n");
}

/// Print help message
fn print_help() {
    println!("onionp2p Daemon - peer-to-peer node with Tor reachability");
    println!();
    println!("USAGE:");
    println!("    onionp2p-daemon [COMMAND] [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    run [config]                 Run the node (default)");
    println!("    provision [config]           Provision the onion service and print its address");
    println!("    dial <record> [config]       Dial a peer given its rec: record text");
    println!("    record [config]              Show the published node record");
    println!("    help                         Show this help message");
    println!("    version                      Show version information");
    println!();
    println!("CONFIGURATION:");
    println!("    Defaults to {} in the working directory.", DEFAULT_CONFIG_FILE);
    println!("    [tor] dial_mode = \"default\" | \"prefer-onion\" | \"onion-only\"");
    println!();
    println!("EXAMPLES:");
    println!("    # Run with Tor on the default ports");
    println!("    onionp2p-daemon run");
    println!();
    println!("    # Log protocol details");
    println!("    RUST_LOG=onionp2p=debug onionp2p-daemon run");
}
