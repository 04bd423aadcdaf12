//! Key encoding for the endpoint column families.

use mirrorwatch_core::EndpointHash;

/// Encode an endpoint key (the raw hash bytes).
#[must_use]
pub fn endpoint_key(hash: &EndpointHash) -> Vec<u8> {
    hash.as_bytes().to_vec()
}

/// Encode a state index key: `state || hash`.
#[must_use]
pub fn state_endpoint_key(state: u8, hash: &EndpointHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(state);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Encode a state prefix for scanning endpoints in one state.
#[must_use]
pub fn state_prefix(state: u8) -> Vec<u8> {
    vec![state]
}

/// Extract the endpoint hash from a state index key.
///
/// Returns `None` if the key is not exactly 33 bytes.
#[must_use]
pub fn extract_hash_from_state_key(key: &[u8]) -> Option<EndpointHash> {
    if key.len() != 33 {
        return None;
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&key[1..33]);
    Some(EndpointHash::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_key_roundtrip() {
        let hash = EndpointHash::from_bytes([7u8; 32]);
        let key = state_endpoint_key(3, &hash);
        assert_eq!(key.len(), 33);
        assert!(key.starts_with(&state_prefix(3)));
        assert_eq!(extract_hash_from_state_key(&key), Some(hash));
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(extract_hash_from_state_key(&[1, 2, 3]).is_none());
    }
}
