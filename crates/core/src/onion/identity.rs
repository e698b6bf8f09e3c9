use super::ProvisionError;
use crate::record::OnionAddress;
use crate::storage::{ensure_private_dir, write_private_file};
use onionp2p_common::tor::{HOSTNAME_FILE, SERVICE_KEY_FILE};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Key argument sent with ADD_ONION to request a new ed25519 v3 key
pub const FRESH_KEY_SENTINEL: &str = "NEW:ED25519-V3";

/// Key type prefix Tor uses for v3 service keys
const KEY_TYPE_PREFIX: &str = "ED25519-V3:";

/// Onion service private key, or a request for a new one
#[derive(Clone, PartialEq, Eq)]
pub enum ServiceKey {
    /// `ED25519-V3:<base64>` blob previously returned by Tor
    Existing(String),
    Fresh,
}

impl ServiceKey {
    pub fn as_command_arg(&self) -> &str {
        match self {
            Self::Existing(key) => key,
            Self::Fresh => FRESH_KEY_SENTINEL,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Existing(_) => write!(f, "ServiceKey::Existing(<redacted>)"),
            Self::Fresh => write!(f, "ServiceKey::Fresh"),
        }
    }
}

/// Owner-only files holding the service key and its onion hostname
#[derive(Debug, Clone)]
pub struct ServiceKeyStore {
    key_path: PathBuf,
    hostname_path: PathBuf,
}

impl ServiceKeyStore {
    /// Standard file names inside `dir`
    pub fn new(dir: &Path) -> Self {
        Self::with_paths(dir.join(SERVICE_KEY_FILE), dir.join(HOSTNAME_FILE))
    }

    pub fn with_paths(key_path: PathBuf, hostname_path: PathBuf) -> Self {
        Self {
            key_path,
            hostname_path,
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn hostname_path(&self) -> &Path {
        &self.hostname_path
    }

    /// The persisted key, or `Fresh` when none has been stored yet
    pub fn load_key(&self) -> Result<ServiceKey, ProvisionError> {
        let contents = match std::fs::read_to_string(&self.key_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ServiceKey::Fresh),
            Err(source) => return Err(self.key_error(source)),
        };

        let key = contents.trim();
        if key.is_empty() {
            warn!(
                "Service key file {} is empty, requesting a new key",
                self.key_path.display()
            );
            return Ok(ServiceKey::Fresh);
        }
        if !key.starts_with(KEY_TYPE_PREFIX) || key.contains(char::is_whitespace) {
            return Err(self.key_error(io::Error::new(
                io::ErrorKind::InvalidData,
                "not an ED25519-V3 service key",
            )));
        }

        Ok(ServiceKey::Existing(key.to_string()))
    }

    pub fn persist_key(&self, key: &str) -> Result<(), ProvisionError> {
        self.write(&self.key_path, key)
            .map_err(|source| self.key_error(source))
    }

    pub fn persist_hostname(&self, address: &OnionAddress) -> Result<(), ProvisionError> {
        self.write(&self.hostname_path, address.as_str())
            .map_err(|source| ProvisionError::KeyStore {
                path: self.hostname_path.clone(),
                source,
            })
    }

    pub fn load_hostname(&self) -> Result<Option<OnionAddress>, ProvisionError> {
        match std::fs::read_to_string(&self.hostname_path) {
            Ok(contents) => Ok(Some(OnionAddress::parse(contents.trim())?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ProvisionError::KeyStore {
                path: self.hostname_path.clone(),
                source,
            }),
        }
    }

    fn write(&self, path: &Path, line: &str) -> io::Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            ensure_private_dir(dir)?;
        }
        write_private_file(path, format!("{}\n", line).as_bytes())
    }

    fn key_error(&self, source: io::Error) -> ProvisionError {
        ProvisionError::KeyStore {
            path: self.key_path.clone(),
            source,
        }
    }
}
