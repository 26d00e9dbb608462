//! # Error Taxonomy
//!
//! One closed enum for everything that can go wrong off-chain, plus a
//! coarse [`ErrorClass`] that callers branch on. The class is what drives
//! retry decisions and mirror bookkeeping; the variant is what goes in the
//! log line.
//!
//! | Class       | Variants                                                  |
//! |-------------|-----------------------------------------------------------|
//! | Validation  | `InvalidAsset`, `InvalidAmount`, `InvalidAddress`, `Validation`, `InvalidSecretKey`, `AccountNotFound`, `Encoding` |
//! | Auth        | `Unauthorized`                                            |
//! | Retryable   | `Sequence`, `Network`                                     |
//! | Fatal       | `LedgerRejection`                                         |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the remittance core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemitError {
    /// The currency code / issuer pair does not describe a ledger asset.
    #[error("invalid asset {code:?}: {reason}")]
    InvalidAsset { code: String, reason: String },

    /// The decimal amount is not positive or not representable at ledger precision.
    #[error("invalid amount {input:?}: {reason}")]
    InvalidAmount { input: String, reason: String },

    /// The string is not a well-formed account or contract address.
    #[error("invalid address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: String },

    /// Any other structural problem caught before the network is touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Secret key material could not be parsed.
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// The ledger has no account at this address.
    #[error("account not found: {address}")]
    AccountNotFound { address: String },

    /// Envelope or payload bytes could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The caller lacks the capability for this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The envelope was built against a sequence number the ledger no longer expects.
    #[error(
        "sequence mismatch for {account}: envelope carries {envelope_sequence}, ledger expects {ledger_sequence}"
    )]
    Sequence {
        account: String,
        envelope_sequence: u64,
        ledger_sequence: u64,
    },

    /// Transport failure or timeout. The transaction may or may not have landed.
    #[error("network error: {reason}")]
    Network { reason: String },

    /// The ledger validated the transaction and refused it.
    #[error("ledger rejected transaction: {code} ({detail})")]
    LedgerRejection { code: String, detail: String },
}

/// Coarse classification used for retry and reconciliation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad input, rejected before any network call.
    Validation,
    /// Missing capability.
    Auth,
    /// Rebuild or re-query and try again.
    Retryable,
    /// Terminal. Surface verbatim.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Validation => write!(f, "validation"),
            ErrorClass::Auth => write!(f, "auth"),
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

impl RemitError {
    /// Returns the taxonomy class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            RemitError::InvalidAsset { .. }
            | RemitError::InvalidAmount { .. }
            | RemitError::InvalidAddress { .. }
            | RemitError::Validation(_)
            | RemitError::InvalidSecretKey
            | RemitError::AccountNotFound { .. }
            | RemitError::Encoding(_) => ErrorClass::Validation,
            RemitError::Unauthorized(_) => ErrorClass::Auth,
            RemitError::Sequence { .. } | RemitError::Network { .. } => ErrorClass::Retryable,
            RemitError::LedgerRejection { .. } => ErrorClass::Fatal,
        }
    }

    /// `true` for `Sequence` and `Network`.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// `true` only for ledger rejections.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// The ledger reason code, when there is one.
    pub fn reason_code(&self) -> Option<&str> {
        match self {
            RemitError::LedgerRejection { code, .. } => Some(code),
            RemitError::Sequence { .. } => Some("tx_bad_seq"),
            _ => None,
        }
    }

    pub(crate) fn encoding(err: impl fmt::Display) -> Self {
        RemitError::Encoding(err.to_string())
    }

    pub(crate) fn rejection(code: &str, detail: impl Into<String>) -> Self {
        RemitError::LedgerRejection {
            code: code.to_string(),
            detail: detail.into(),
        }
    }
}
