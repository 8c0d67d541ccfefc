//! Content digests for cached snapshots.

use sha2::{Digest, Sha256};

/// SHA-256 over a serialized payload, hex encoded.
///
/// Two snapshots with the same digest carry identical station data, which
/// lets a refresh report whether anything actually changed upstream.
pub fn payload_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_stability() {
        assert_eq!(payload_digest(b"[1,2,3]"), payload_digest(b"[1,2,3]"));
    }

    #[test]
    fn test_digest_differs() {
        assert_ne!(payload_digest(b"[1,2,3]"), payload_digest(b"[1,2,4]"));
    }

    #[test]
    fn test_digest_format() {
        let digest = payload_digest(b"");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
