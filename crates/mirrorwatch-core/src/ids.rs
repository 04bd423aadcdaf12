//! Endpoint identity.
//!
//! An endpoint is identified by a hash of the tenant (network segment it was
//! learned on) and its hardware address. The hash is independent of the
//! endpoint's display name, which may change over its lifetime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte endpoint identifier, hex-encoded for display.
///
/// Computed with blake3 over the tenant and the lowercased hardware address,
/// so the same device always maps to the same identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointHash([u8; 32]);

impl EndpointHash {
    /// Create a new `EndpointHash` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the identity of the device `mac` seen on `tenant`.
    ///
    /// The tenant is length-prefixed so that `("ab", "c")` and `("a", "bc")`
    /// never collide.
    #[must_use]
    pub fn compute(tenant: &str, mac: &str) -> Self {
        let mac = normalize_mac(mac);

        let mut hasher = blake3::Hasher::new();
        hasher.update(&(tenant.len() as u64).to_le_bytes());
        hasher.update(tenant.as_bytes());
        hasher.update(mac.as_bytes());

        Self(*hasher.finalize().as_bytes())
    }

    /// Parse an `EndpointHash` from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not exactly 64 characters.
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = hex::decode(s).map_err(|_| IdError::InvalidHex)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| IdError::InvalidLength {
            expected: 32,
            got: s.len() / 2,
        })?;
        Ok(Self(arr))
    }

    /// Return the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Return the hex-encoded string representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Normalize a hardware address for hashing and comparison.
#[must_use]
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().to_ascii_lowercase()
}

impl fmt::Debug for EndpointHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointHash({})", self.to_hex())
    }
}

impl fmt::Display for EndpointHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for EndpointHash {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for EndpointHash {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<EndpointHash> for String {
    fn from(id: EndpointHash) -> Self {
        id.to_hex()
    }
}

impl AsRef<[u8]> for EndpointHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input string contains invalid hexadecimal characters.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The expected number of bytes.
        expected: usize,
        /// The actual number of bytes.
        got: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_roundtrip() {
        let id = EndpointHash::from_bytes([0x42u8; 32]);
        let parsed = EndpointHash::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn hash_invalid_hex() {
        let result = EndpointHash::from_hex("not-valid-hex");
        assert!(matches!(result, Err(IdError::InvalidHex)));
    }

    #[test]
    fn hash_wrong_length() {
        let result = EndpointHash::from_hex("deadbeef");
        assert!(matches!(result, Err(IdError::InvalidLength { .. })));
    }

    #[test]
    fn compute_is_pure() {
        let a = EndpointHash::compute("vlan10", "00:11:22:33:44:55");
        let b = EndpointHash::compute("vlan10", "00:11:22:33:44:55");
        assert_eq!(a, b);
    }

    #[test]
    fn compute_ignores_mac_case() {
        let a = EndpointHash::compute("vlan10", "AA:BB:CC:DD:EE:FF");
        let b = EndpointHash::compute("vlan10", " aa:bb:cc:dd:ee:ff");
        assert_eq!(a, b);
    }

    #[test]
    fn compute_separates_tenants() {
        let a = EndpointHash::compute("vlan10", "00:11:22:33:44:55");
        let b = EndpointHash::compute("vlan20", "00:11:22:33:44:55");
        assert_ne!(a, b);

        let c = EndpointHash::compute("ab", "c");
        let d = EndpointHash::compute("a", "bc");
        assert_ne!(c, d);
    }

    #[test]
    fn hash_serde_as_hex_string() {
        let id = EndpointHash::compute("t", "00:00:00:00:00:01");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: EndpointHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
