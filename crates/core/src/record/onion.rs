/// Onion address record entry
///
/// A v3 onion address is 56 base32 characters (lowercase, no padding)
/// followed by the literal ".onion" suffix. Addresses are validated when
/// constructed, when encoded into a record and when decoded from one, so
/// a malformed value never reaches the dialer.

use super::{entry_codec, RecordEntry, RecordError};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Total length of a v3 onion address including the suffix
pub const ONION_ADDRESS_LEN: usize = 62;

/// Length of the service id part (without ".onion")
pub const SERVICE_ID_LEN: usize = 56;

const ONION_SUFFIX: &str = ".onion";

/// A validated v3 onion address, e.g. "vww6ybal4bd7szmg...yd.onion"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Check that `address` is a well-formed v3 onion address
    pub fn validate(address: &str) -> Result<(), OnionAddressError> {
        if address.len() != ONION_ADDRESS_LEN {
            return Err(OnionAddressError::InvalidLength(address.len()));
        }

        if !address.ends_with(ONION_SUFFIX) {
            return Err(OnionAddressError::InvalidSuffix);
        }

        for (position, character) in address.char_indices() {
            if position >= SERVICE_ID_LEN {
                break;
            }
            if !is_base32_char(character) {
                return Err(OnionAddressError::InvalidCharacter {
                    position,
                    character,
                });
            }
        }

        Ok(())
    }

    pub fn is_valid(address: &str) -> bool {
        Self::validate(address).is_ok()
    }

    /// Parse and validate an onion address
    pub fn parse(address: &str) -> Result<Self, OnionAddressError> {
        Self::validate(address)?;
        Ok(Self(address.to_string()))
    }

    /// Build an address from a bare service id as returned by ADD_ONION
    pub fn from_service_id(service_id: &str) -> Result<Self, OnionAddressError> {
        Self::parse(&format!("{}{}", service_id, ONION_SUFFIX))
    }

    /// The service id (address without the ".onion" suffix)
    pub fn service_id(&self) -> &str {
        &self.0[..SERVICE_ID_LEN]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode for storage in a record
    ///
    /// Re-validates before encoding and refuses to emit a malformed value.
    pub fn encode(&self) -> Result<Vec<u8>, OnionAddressError> {
        self.encode_with(entry_codec())
    }

    fn encode_with(&self, codec: impl Options) -> Result<Vec<u8>, OnionAddressError> {
        Self::validate(&self.0)?;
        codec
            .serialize(&self.0)
            .map_err(|e| OnionAddressError::Encode(e.to_string()))
    }

    /// Decode a record value and validate the contained address
    pub fn decode(bytes: &[u8]) -> Result<Self, OnionAddressError> {
        let address: String = entry_codec()
            .deserialize(bytes)
            .map_err(|e| OnionAddressError::Decode(e.to_string()))?;
        Self::parse(&address)
    }
}

fn is_base32_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '2'..='7')
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OnionAddress {
    type Err = OnionAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OnionAddress {
    type Error = OnionAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::validate(&value)?;
        Ok(Self(value))
    }
}

impl From<OnionAddress> for String {
    fn from(address: OnionAddress) -> Self {
        address.0
    }
}

impl RecordEntry for OnionAddress {
    const KEY: &'static str = "onion";

    fn encode(&self) -> Result<Vec<u8>, RecordError> {
        OnionAddress::encode(self).map_err(|source| RecordError::entry(Self::KEY, source))
    }

    fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        OnionAddress::decode(bytes).map_err(|source| RecordError::entry(Self::KEY, source))
    }
}

/// Onion address errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OnionAddressError {
    #[error("Invalid onion address length: {0} (expected 62)")]
    InvalidLength(usize),

    #[error("Onion address does not end in .onion")]
    InvalidSuffix,

    #[error("Invalid character {character:?} at position {position}")]
    InvalidCharacter { position: usize, character: char },

    #[error("Malformed onion entry: {0}")]
    Decode(String),

    #[error("Failed to encode onion entry: {0}")]
    Encode(String),
}

impl OnionAddressError {
    /// The value itself is malformed (length, suffix or alphabet)
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidLength(_) | Self::InvalidSuffix | Self::InvalidCharacter { .. }
        )
    }

    /// The surrounding serialization is malformed
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const VALID: &str = "vww6ybal4bd7szmgncyruucpgfkqahzddi37ktceo3ah7ngmcopnpyyd.onion";

    #[test]
    fn test_accepts_valid_address() {
        assert!(OnionAddress::is_valid(VALID));
        let address = OnionAddress::parse(VALID).unwrap();
        assert_eq!(address.as_str(), VALID);
        assert_eq!(address.service_id().len(), SERVICE_ID_LEN);
        assert_eq!(address.to_string(), VALID);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = OnionAddress::validate("abc.onion").unwrap_err();
        assert_eq!(err, OnionAddressError::InvalidLength(9));

        let long = format!("a{}", VALID);
        assert!(matches!(
            OnionAddress::validate(&long),
            Err(OnionAddressError::InvalidLength(63))
        ));
    }

    #[test]
    fn test_rejects_wrong_suffix() {
        let wrong = VALID.replace(".onion", ".oniom");
        assert_eq!(
            OnionAddress::validate(&wrong),
            Err(OnionAddressError::InvalidSuffix)
        );
    }

    #[test]
    fn test_rejects_characters_outside_alphabet() {
        for bad in ['A', '1', '8', '0', '=', '-', '.'] {
            let mut address = VALID.to_string();
            address.replace_range(10..11, &bad.to_string());

            let err = OnionAddress::validate(&address).unwrap_err();
            assert_eq!(
                err,
                OnionAddressError::InvalidCharacter {
                    position: 10,
                    character: bad
                }
            );
            assert!(err.is_format_error());
        }
    }

    #[test]
    fn test_non_ascii_does_not_panic() {
        // 'é' is two bytes, keeping the total at 62
        let address = format!("{}é{}", "a".repeat(54), ".onion");
        assert_eq!(address.len(), ONION_ADDRESS_LEN);
        assert!(!OnionAddress::is_valid(&address));
    }

    #[test]
    fn test_from_service_id() {
        let address = OnionAddress::from_service_id(&VALID[..SERVICE_ID_LEN]).unwrap();
        assert_eq!(address.as_str(), VALID);
        assert!(OnionAddress::from_service_id("short").is_err());
    }

    #[test]
    fn test_encode_decode() {
        let address = OnionAddress::parse(VALID).unwrap();
        let encoded = address.encode().unwrap();
        assert_eq!(OnionAddress::decode(&encoded).unwrap(), address);
    }

    #[test]
    fn test_encode_refuses_malformed_value() {
        // Only reachable through a construction bug; encoding must still fail
        let broken = OnionAddress("not-an-onion".to_string());
        let err = broken.encode().unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_local_encode_failure_is_not_a_decode_error() {
        let address = OnionAddress::parse(VALID).unwrap();
        let tiny = bincode::DefaultOptions::new().with_limit(8);

        let err = address.encode_with(tiny).unwrap_err();
        assert!(matches!(err, OnionAddressError::Encode(_)));
        assert!(!err.is_decode_error());
        assert!(!err.is_format_error());
    }

    #[test]
    fn test_decode_distinguishes_garbage_from_bad_address() {
        let garbage = OnionAddress::decode(&[0xff, 0x01]).unwrap_err();
        assert!(garbage.is_decode_error());

        let bad_value = entry_codec().serialize(&"hello.onion".to_string()).unwrap();
        let err = OnionAddress::decode(&bad_value).unwrap_err();
        assert!(err.is_format_error());

        let mut trailing = OnionAddress::parse(VALID).unwrap().encode().unwrap();
        trailing.push(0);
        assert!(OnionAddress::decode(&trailing).unwrap_err().is_decode_error());
    }

    #[test]
    fn test_serde_validates() {
        let encoded = bincode::serialize(&"UPPERCASE.onion".to_string()).unwrap();
        assert!(bincode::deserialize::<OnionAddress>(&encoded).is_err());
    }

    proptest! {
        #[test]
        fn prop_valid_addresses_roundtrip(body in "[a-z2-7]{56}") {
            let address = OnionAddress::parse(&format!("{}.onion", body)).unwrap();
            let decoded = OnionAddress::decode(&address.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, address);
        }

        #[test]
        fn prop_wrong_length_rejected(s in "\\PC{0,80}") {
            prop_assume!(s.len() != ONION_ADDRESS_LEN);
            prop_assert!(!OnionAddress::is_valid(&s));
        }

        #[test]
        fn prop_wrong_suffix_rejected(body in "[a-z2-7]{56}", suffix in "[a-z.]{6}") {
            prop_assume!(suffix != ONION_SUFFIX);
            let address = format!("{}{}", body, suffix);
            prop_assert!(!OnionAddress::is_valid(&address));
        }

        #[test]
        fn prop_bad_character_rejected(
            body in "[a-z2-7]{56}",
            position in 0usize..SERVICE_ID_LEN,
            bad in "[A-Z0189=+/_.-]",
        ) {
            let mut address = format!("{}.onion", body);
            address.replace_range(position..position + 1, &bad);
            prop_assert!(!OnionAddress::is_valid(&address));
        }
    }
}
