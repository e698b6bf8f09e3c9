use crate::storage::write_private_file;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

/// The node's long-term signing key
///
/// Signs the node record. The node id is derived from the public half.
#[derive(Clone)]
pub struct NodeKey {
    signing_key: SigningKey,
}

impl NodeKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut secret_bytes);

        Self::from_secret_bytes(&secret_bytes)
    }

    /// Create a key from its 32-byte secret
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Load a hex-encoded key from `path`, generating and persisting one if absent
    pub fn load_or_generate(path: &Path) -> Result<Self, NodeKeyError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let bytes = hex::decode(contents.trim()).map_err(|_| NodeKeyError::InvalidHex)?;
            let secret: [u8; 32] = bytes
                .try_into()
                .map_err(|b: Vec<u8>| NodeKeyError::InvalidLength(b.len()))?;
            return Ok(Self::from_secret_bytes(&secret));
        }

        let key = Self::generate();
        write_private_file(path, hex::encode(key.secret_bytes()).as_bytes())?;
        info!("Generated new node key {} at {:?}", key.node_id(), path);
        Ok(key)
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::from_public_bytes(&self.public_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKey")
            .field("public_key", &hex::encode(self.public_bytes()))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Verify an ed25519 signature made by `public_key`
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key.verify(message, &Signature::from_bytes(signature)).is_ok(),
        Err(_) => false,
    }
}

/// Node identifier: BLAKE3 hash of the node's public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub fn from_public_bytes(public_key: &[u8; 32]) -> Self {
        Self(*blake3::hash(public_key).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 bytes as hex, for logs
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}...)", self.short_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_hex())
    }
}

/// Errors loading a node key
#[derive(Debug, thiserror::Error)]
pub enum NodeKeyError {
    #[error("Node key file is not valid hex")]
    InvalidHex,

    #[error("Invalid node key length: {0} (expected 32)")]
    InvalidLength(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = NodeKey::generate();
        let signature = key.sign(b"record");

        assert!(verify_signature(&key.public_bytes(), b"record", &signature));
        assert!(!verify_signature(&key.public_bytes(), b"tampered", &signature));
    }

    #[test]
    fn test_node_id_is_stable() {
        let key = NodeKey::generate();
        let restored = NodeKey::from_secret_bytes(&key.secret_bytes());
        assert_eq!(key.node_id(), restored.node_id());
        assert_eq!(key.node_id().to_hex().len(), 64);
    }

    #[test]
    fn test_load_or_generate_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodekey");

        let first = NodeKey::load_or_generate(&path).unwrap();
        let second = NodeKey::load_or_generate(&path).unwrap();
        assert_eq!(first.public_bytes(), second.public_bytes());
    }

    #[test]
    fn test_load_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodekey");

        std::fs::write(&path, "zz").unwrap();
        assert!(matches!(
            NodeKey::load_or_generate(&path),
            Err(NodeKeyError::InvalidHex)
        ));

        std::fs::write(&path, "abcd").unwrap();
        assert!(matches!(
            NodeKey::load_or_generate(&path),
            Err(NodeKeyError::InvalidLength(2))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = NodeKey::generate();
        let debug = format!("{:?}", key);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&hex::encode(key.secret_bytes())));
    }
}
