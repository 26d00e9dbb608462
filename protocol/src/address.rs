//! Ledger addresses.
//!
//! An [`Address`] is 32 bytes rendered as 64 lowercase hex characters. For
//! accounts the bytes are the Ed25519 public key; for contracts they are a
//! SHA-256 derivation with no corresponding private key, so nothing can ever
//! sign on a contract's behalf.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::hash::sha256_multi;
use crate::error::RemitError;

/// Domain tag for contract address derivation.
const CONTRACT_ADDRESS_DOMAIN: &[u8] = b"remit:contract:";

/// A 32-byte account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 32]);

impl Address {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Deterministic contract address derived from a deployment seed.
    pub fn contract(seed: &[u8]) -> Self {
        Self(sha256_multi(&[CONTRACT_ADDRESS_DOMAIN, seed]))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Signature hint: the last four bytes of the key.
    pub fn hint(&self) -> [u8; 4] {
        [self.0[28], self.0[29], self.0[30], self.0[31]]
    }

    /// Parses a hex address, reporting failures as [`RemitError::InvalidAddress`].
    pub fn parse(input: &str) -> Result<Self, RemitError> {
        let invalid = |reason: &str| RemitError::InvalidAddress {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        if input.len() != 64 {
            return Err(invalid("expected 64 hex characters"));
        }
        if input.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("addresses are lowercase hex"));
        }
        let bytes = hex::decode(input).map_err(|_| invalid("not hex"))?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Abbreviated form for log lines: first and last four hex chars.
    pub fn short(&self) -> String {
        let full = hex::encode(self.0);
        format!("{}..{}", &full[..4], &full[60..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl FromStr for Address {
    type Err = RemitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
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
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}
