//! # Cryptographic Primitives
//!
//! Everything signature- and digest-related flows through here:
//!
//! - **Ed25519** (ed25519-dalek) for account keys and transaction signatures.
//! - **SHA-256** (sha2) for network ids, transaction hashes, and code hashes.
//!
//! We don't roll our own. These are thin, typed wrappers around audited
//! implementations, and the only place in the workspace that touches key
//! bytes directly.

pub mod hash;
pub mod keys;

pub use hash::{network_id, sha256, sha256_hex, sha256_multi};
pub use keys::{verify_signature, KeyError, Keypair};
