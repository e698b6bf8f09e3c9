/// Signed node records
///
/// A record is an ordered set of key/value entries sealed with a sequence
/// number and an ed25519 signature. Mutation is a two-step contract: a
/// signed `Record` is turned into an `UnsignedRecord` (bumping the
/// sequence number and dropping the signature), entries are set on it,
/// and the caller signs it again before publishing.

pub mod key;
pub mod onion;

pub use key::{verify_signature, NodeId, NodeKey, NodeKeyError};
pub use onion::{OnionAddress, OnionAddressError, ONION_ADDRESS_LEN};

use bincode::Options;
use data_encoding::BASE64URL_NOPAD;
use onionp2p_common::protocol::MAX_RECORD_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Text prefix of an encoded record
const TEXT_PREFIX: &str = "rec:";

/// Codec for record values and the record envelope
pub(crate) fn entry_codec() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .reject_trailing_bytes()
        .with_limit(MAX_RECORD_SIZE as u64)
}

/// A typed value stored under a fixed key in a record
pub trait RecordEntry: Sized {
    const KEY: &'static str;

    fn encode(&self) -> Result<Vec<u8>, RecordError>;

    fn decode(bytes: &[u8]) -> Result<Self, RecordError>;
}

macro_rules! plain_entry {
    ($(#[$doc:meta])* $name:ident, $inner:ty, $key:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub $inner);

        impl RecordEntry for $name {
            const KEY: &'static str = $key;

            fn encode(&self) -> Result<Vec<u8>, RecordError> {
                entry_codec()
                    .serialize(&self.0)
                    .map_err(|e| RecordError::entry(Self::KEY, e))
            }

            fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
                entry_codec()
                    .deserialize(bytes)
                    .map(Self)
                    .map_err(|e| RecordError::entry(Self::KEY, e))
            }
        }
    };
}

plain_entry!(
    /// IPv4 address of the node
    Ipv4Entry, Ipv4Addr, "ip"
);
plain_entry!(
    /// IPv6 address of the node
    Ipv6Entry, Ipv6Addr, "ip6"
);
plain_entry!(
    /// TCP listening port of the node
    TcpPort, u16, "tcp"
);
plain_entry!(
    /// The node's ed25519 public key
    PublicKeyEntry, [u8; 32], "ed25519"
);

type Pairs = BTreeMap<String, Vec<u8>>;

#[derive(Serialize, Deserialize)]
struct RecordEnvelope {
    seq: u64,
    pairs: Vec<(String, Vec<u8>)>,
    signature: Vec<u8>,
}

fn signing_payload(seq: u64, pairs: &Pairs) -> Result<Vec<u8>, RecordError> {
    let pairs: Vec<(&String, &Vec<u8>)> = pairs.iter().collect();
    bincode::DefaultOptions::new()
        .serialize(&(seq, pairs))
        .map_err(|e| RecordError::Encode(e.to_string()))
}

fn load_entry<E: RecordEntry>(pairs: &Pairs) -> Result<E, RecordError> {
    let bytes = pairs
        .get(E::KEY)
        .ok_or_else(|| RecordError::NotFound(E::KEY.to_string()))?;
    E::decode(bytes)
}

/// A record being edited; must be signed before it can be published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedRecord {
    seq: u64,
    pairs: Pairs,
}

impl UnsignedRecord {
    pub fn new() -> Self {
        Self {
            seq: 1,
            pairs: Pairs::new(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Store an entry, replacing any existing value under its key
    pub fn set<E: RecordEntry>(&mut self, entry: &E) -> Result<(), RecordError> {
        let value = entry.encode()?;
        self.pairs.insert(E::KEY.to_string(), value);
        Ok(())
    }

    pub fn remove<E: RecordEntry>(&mut self) {
        self.pairs.remove(E::KEY);
    }

    pub fn load<E: RecordEntry>(&self) -> Result<E, RecordError> {
        load_entry(&self.pairs)
    }

    /// Seal the record with `key`
    ///
    /// Fails with `TooLarge` if the signed encoding exceeds the size limit.
    pub fn sign(mut self, key: &NodeKey) -> Result<Record, RecordError> {
        self.set(&PublicKeyEntry(key.public_bytes()))?;

        let payload = signing_payload(self.seq, &self.pairs)?;
        let signature = key.sign(&payload);

        let record = Record {
            seq: self.seq,
            pairs: self.pairs,
            signature,
        };

        let size = record.encode()?.len();
        if size > MAX_RECORD_SIZE {
            return Err(RecordError::TooLarge {
                size,
                max: MAX_RECORD_SIZE,
            });
        }

        Ok(record)
    }
}

impl Default for UnsignedRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// A signed, immutable node record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    seq: u64,
    pairs: Pairs,
    signature: [u8; 64],
}

impl Record {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn load<E: RecordEntry>(&self) -> Result<E, RecordError> {
        load_entry(&self.pairs)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.contains_key(key)
    }

    pub fn node_id(&self) -> Result<NodeId, RecordError> {
        let public_key = self.public_key()?;
        Ok(NodeId::from_public_bytes(&public_key))
    }

    fn public_key(&self) -> Result<[u8; 32], RecordError> {
        match self.load::<PublicKeyEntry>() {
            Ok(PublicKeyEntry(bytes)) => Ok(bytes),
            Err(RecordError::NotFound(_)) => Err(RecordError::MissingPublicKey),
            Err(e) => Err(e),
        }
    }

    /// Start editing: the returned record has the next sequence number
    /// and no signature
    pub fn into_unsigned(self) -> UnsignedRecord {
        UnsignedRecord {
            seq: self.seq + 1,
            pairs: self.pairs,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        let envelope = RecordEnvelope {
            seq: self.seq,
            pairs: self
                .pairs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            signature: self.signature.to_vec(),
        };

        // Unbounded here so oversized records surface as TooLarge in sign()
        bincode::DefaultOptions::new()
            .serialize(&envelope)
            .map_err(|e| RecordError::Encode(e.to_string()))
    }

    /// Decode a record and verify its signature
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(RecordError::TooLarge {
                size: bytes.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        let envelope: RecordEnvelope = entry_codec()
            .deserialize(bytes)
            .map_err(|e| RecordError::Decode(e.to_string()))?;

        let signature: [u8; 64] = envelope
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| RecordError::InvalidSignature)?;

        let mut pairs = Pairs::new();
        for (key, value) in envelope.pairs {
            if pairs.insert(key.clone(), value).is_some() {
                return Err(RecordError::Decode(format!("duplicate key {}", key)));
            }
        }

        let record = Self {
            seq: envelope.seq,
            pairs,
            signature,
        };
        record.verify()?;

        Ok(record)
    }

    fn verify(&self) -> Result<(), RecordError> {
        let public_key = self.public_key()?;
        let payload = signing_payload(self.seq, &self.pairs)?;

        if verify_signature(&public_key, &payload, &self.signature) {
            Ok(())
        } else {
            Err(RecordError::InvalidSignature)
        }
    }

    /// Text form, e.g. "rec:AQL..."
    pub fn to_text(&self) -> Result<String, RecordError> {
        Ok(format!("{}{}", TEXT_PREFIX, BASE64URL_NOPAD.encode(&self.encode()?)))
    }

    pub fn from_text(text: &str) -> Result<Self, RecordError> {
        let body = text
            .trim()
            .strip_prefix(TEXT_PREFIX)
            .ok_or_else(|| RecordError::Decode(format!("missing {} prefix", TEXT_PREFIX)))?;
        let bytes = BASE64URL_NOPAD
            .decode(body.as_bytes())
            .map_err(|e| RecordError::Decode(e.to_string()))?;
        Self::decode(&bytes)
    }
}

/// Why a single entry could not be encoded or decoded
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error(transparent)]
    Onion(#[from] OnionAddressError),

    #[error("{0}")]
    Codec(#[from] bincode::Error),
}

/// Record errors
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("No {0} entry in record")]
    NotFound(String),

    #[error("Invalid {key} entry: {source}")]
    Entry {
        key: &'static str,
        #[source]
        source: EntryError,
    },

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Failed to decode record: {0}")]
    Decode(String),

    #[error("Record too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Record signature is invalid")]
    InvalidSignature,

    #[error("Record carries no public key")]
    MissingPublicKey,
}

impl RecordError {
    pub(crate) fn entry(key: &'static str, source: impl Into<EntryError>) -> Self {
        Self::Entry {
            key,
            source: source.into(),
        }
    }

    /// The onion address error behind this failure, if any
    pub fn onion_error(&self) -> Option<&OnionAddressError> {
        match self {
            Self::Entry {
                source: EntryError::Onion(e),
                ..
            } => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONION: &str = "vww6ybal4bd7szmgncyruucpgfkqahzddi37ktceo3ah7ngmcopnpyyd.onion";

    fn sample_record(key: &NodeKey) -> Record {
        let mut record = UnsignedRecord::new();
        record.set(&Ipv4Entry(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        record.set(&TcpPort(30303)).unwrap();
        record.sign(key).unwrap()
    }

    #[test]
    fn test_sign_and_decode() {
        let key = NodeKey::generate();
        let record = sample_record(&key);

        let decoded = Record::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.load::<TcpPort>().unwrap(), TcpPort(30303));
        assert_eq!(decoded.node_id().unwrap(), key.node_id());
    }

    #[test]
    fn test_set_requires_resign() {
        let key = NodeKey::generate();
        let record = sample_record(&key);
        assert_eq!(record.seq(), 1);

        let mut unsigned = record.into_unsigned();
        assert_eq!(unsigned.seq(), 2);
        unsigned.set(&OnionAddress::parse(ONION).unwrap()).unwrap();

        let resigned = unsigned.sign(&key).unwrap();
        assert_eq!(resigned.seq(), 2);
        assert_eq!(
            resigned.load::<OnionAddress>().unwrap().as_str(),
            ONION
        );
        assert!(Record::decode(&resigned.encode().unwrap()).is_ok());
    }

    #[test]
    fn test_missing_entry() {
        let record = sample_record(&NodeKey::generate());
        assert!(matches!(
            record.load::<OnionAddress>(),
            Err(RecordError::NotFound(key)) if key == "onion"
        ));
    }

    #[test]
    fn test_malformed_onion_entry_is_inspectable() {
        let key = NodeKey::generate();
        let mut unsigned = UnsignedRecord::new();
        unsigned
            .pairs
            .insert("onion".to_string(), entry_codec().serialize(&"nope.onion").unwrap());
        let record = unsigned.sign(&key).unwrap();

        let err = record.load::<OnionAddress>().unwrap_err();
        assert!(err.onion_error().unwrap().is_format_error());
    }

    #[test]
    fn test_tampered_record_rejected() {
        let key = NodeKey::generate();
        let mut record = sample_record(&key);
        record
            .pairs
            .insert("tcp".to_string(), TcpPort(1).encode().unwrap());

        assert!(matches!(
            Record::decode(&record.encode().unwrap()),
            Err(RecordError::InvalidSignature)
        ));
    }

    #[test]
    fn test_size_limit() {
        let key = NodeKey::generate();
        let mut unsigned = UnsignedRecord::new();
        unsigned.pairs.insert("blob".to_string(), vec![7u8; MAX_RECORD_SIZE]);

        assert!(matches!(
            unsigned.sign(&key),
            Err(RecordError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_full_record_fits() {
        let key = NodeKey::generate();
        let mut unsigned = UnsignedRecord::new();
        unsigned.set(&Ipv4Entry(Ipv4Addr::new(203, 0, 113, 7))).unwrap();
        unsigned.set(&Ipv6Entry(Ipv6Addr::LOCALHOST)).unwrap();
        unsigned.set(&TcpPort(30303)).unwrap();
        unsigned.set(&OnionAddress::parse(ONION).unwrap()).unwrap();

        assert!(unsigned.sign(&key).is_ok());
    }

    #[test]
    fn test_text_form() {
        let record = sample_record(&NodeKey::generate());
        let text = record.to_text().unwrap();
        assert!(text.starts_with("rec:"));
        assert_eq!(Record::from_text(&text).unwrap(), record);

        assert!(Record::from_text("enr:abc").is_err());
        assert!(Record::from_text("rec:!!!").is_err());
    }
}
