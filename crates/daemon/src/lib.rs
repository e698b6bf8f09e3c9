/// onionp2p daemon library
///
/// This crate provides the daemon that runs a node: startup sequencing,
/// onion service provisioning, peer listener and relay drain.

pub mod logging;
pub mod node;

pub use node::{NodeRuntime, NodeStatus};
