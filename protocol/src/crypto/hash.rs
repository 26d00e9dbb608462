//! # Hashing Utilities
//!
//! SHA-256 is the only digest the ledger speaks. It names networks (the
//! passphrase hash), transactions (the signature payload hash), contract
//! addresses, and uploaded contract code.
//!
//! Multi-part hashing feeds slices straight into the hasher instead of
//! concatenating into a temporary buffer first.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// # Example
///
/// ```
/// use remit_protocol::crypto::sha256;
///
/// let hash = sha256(b"remit");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha256_multi(&[data])
}

/// Hash several byte slices as if they were one contiguous buffer.
pub fn sha256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// Hex-encoded SHA-256, for ids that travel through JSON.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Network identifier: `SHA-256(passphrase)`.
///
/// Every transaction hash starts with this, so a signature produced for one
/// network is garbage on any other.
pub fn network_id(passphrase: &str) -> [u8; 32] {
    sha256(passphrase.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc") from FIPS 180-2.
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn multi_part_matches_concatenation() {
        let joined = sha256(b"hello world");
        let parts = sha256_multi(&[b"hello", b" ", b"world"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn network_id_depends_on_passphrase() {
        assert_ne!(network_id("network a"), network_id("network b"));
        assert_eq!(network_id("same"), network_id("same"));
    }

    #[test]
    fn empty_input_hashes() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
