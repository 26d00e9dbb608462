//! Transaction bodies, signatures, and the envelope that carries both.
//!
//! The body is serialized with bincode, which is deterministic for a given
//! value: same fields in, same bytes out. The transaction hash covers the
//! network id, the envelope-type tag, and those body bytes, and is what
//! every signature signs. Touch any body field and every existing signature
//! stops verifying.
//!
//! On the wire an envelope is `hex(bincode(envelope))`. The same string
//! survives build, sign, and submit without being reinterpreted.

use serde::{Deserialize, Serialize};

use super::types::{Memo, Operation, TimeBounds};
use crate::address::Address;
use crate::config::ENVELOPE_TYPE_TX;
use crate::crypto::hash::{network_id, sha256_multi};
use crate::error::RemitError;

/// The unsigned part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBody {
    /// Paying and sequencing account.
    pub source: Address,
    /// Total fee offered, in stroops.
    pub fee: u64,
    /// Must equal the source account's current sequence when applied.
    pub sequence: u64,
    pub time_bounds: Option<TimeBounds>,
    pub memo: Memo,
    pub operations: Vec<Operation>,
}

impl TransactionBody {
    /// Canonical bytes of the body.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, RemitError> {
        bincode::serialize(self).map_err(RemitError::encoding)
    }

    /// `SHA-256(network_id || envelope_type || body)`.
    pub fn hash(&self, passphrase: &str) -> Result<[u8; 32], RemitError> {
        let body = self.canonical_bytes()?;
        Ok(sha256_multi(&[
            &network_id(passphrase),
            &ENVELOPE_TYPE_TX.to_be_bytes(),
            &body,
        ]))
    }
}

/// A signature plus the hint that says whose key probably made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratedSignature {
    /// Last four bytes of the signer's public key.
    pub hint: [u8; 4],
    /// Raw 64-byte Ed25519 signature over the transaction hash.
    pub signature: Vec<u8>,
}

/// Body plus its ordered signatures, exactly what gets submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub body: TransactionBody,
    pub signatures: Vec<DecoratedSignature>,
}

impl TransactionEnvelope {
    /// Wraps an unsigned body.
    pub fn unsigned(body: TransactionBody) -> Self {
        Self {
            body,
            signatures: Vec::new(),
        }
    }

    /// Transaction hash on the given network. Signatures do not affect it.
    pub fn hash(&self, passphrase: &str) -> Result<[u8; 32], RemitError> {
        self.body.hash(passphrase)
    }

    /// Hex transaction hash, the id the ledger reports back.
    pub fn hash_hex(&self, passphrase: &str) -> Result<String, RemitError> {
        self.hash(passphrase).map(hex::encode)
    }

    pub fn is_signed(&self) -> bool {
        !self.signatures.is_empty()
    }

    /// `hex(bincode(self))`.
    pub fn to_encoded(&self) -> Result<String, RemitError> {
        bincode::serialize(self)
            .map(hex::encode)
            .map_err(RemitError::encoding)
    }

    /// Inverse of [`to_encoded`](Self::to_encoded).
    pub fn from_encoded(encoded: &str) -> Result<Self, RemitError> {
        let bytes = hex::decode(encoded.trim()).map_err(RemitError::encoding)?;
        bincode::deserialize(&bytes).map_err(RemitError::encoding)
    }
}
