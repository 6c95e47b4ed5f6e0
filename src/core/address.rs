//! Participant Addresses
//!
//! 20-byte account identifiers derived from secp256k1 public keys the way
//! the arbiter contract derives them (last 20 bytes of keccak256 of the
//! uncompressed key). Comparison is on bytes, so hex case never matters.

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::hash::keccak256;

/// Account address of a channel participant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address (used for "no winner").
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Derive the address controlled by a verifying key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        // Skip the 0x04 SEC1 tag byte.
        let digest = keccak256(&point.as_bytes()[1..]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// True for the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Left-pad to a 32-byte ABI word.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }

    /// Short form for logs (first 4 bytes).
    pub fn short(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// Error parsing an address string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address: {0}")]
pub struct AddressParseError(pub String);

impl FromStr for Address {
    type Err = AddressParseError;

    /// Accepts `0x`-prefixed or bare hex in any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(body).map_err(|_| AddressParseError(s.to_string()))?;
        if bytes.len() != 20 {
            return Err(AddressParseError(s.to_string()));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    #[test]
    fn test_parse_is_case_insensitive() {
        let lower: Address = "0x52908400098527886e0f7030069857d2e4169ee7".parse().unwrap();
        let upper: Address = "0x52908400098527886E0F7030069857D2E4169EE7".parse().unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("not-hex".parse::<Address>().is_err());
    }

    #[test]
    fn test_known_key_address() {
        // Private key 1 controls 0x7e5f4552091a69125d5dfcb7b8c2659029395bdf.
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let key = SigningKey::from_slice(&secret).unwrap();
        let address = Address::from_verifying_key(key.verifying_key());
        assert_eq!(address.to_string(), "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
    }

    #[test]
    fn test_serde_roundtrip() {
        let address = Address::new([0xab; 20]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", address));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
