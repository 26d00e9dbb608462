// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # REMIT Protocol: Core Library
//!
//! The off-chain half of REMIT: everything a client or node needs to move
//! value into, through, and out of an on-ledger escrow without touching the
//! contract internals.
//!
//! ## Architecture
//!
//! - **address**: 32-byte account and contract identifiers.
//! - **asset**: Currency codes to ledger assets. Native has no issuer.
//! - **crypto**: Ed25519 keypairs and SHA-256 hashing. Don't roll your own.
//! - **transaction**: Amounts, operations, envelopes, the builder, the signer.
//! - **ledger**: The [`ledger::LedgerClient`] seam, a timeout-bound
//!   submitter, per-account queues, and a complete in-memory ledger.
//! - **error**: One error type, four classes, and a retry rule per class.
//! - **config**: Protocol constants and network parameters.
//!
//! ## Ground Rules
//!
//! 1. A transaction hash commits to the network passphrase. Signatures from
//!    one network are worthless on another.
//! 2. Builders never guess sequences. The ledger is the source of truth.
//! 3. Secrets never reach a log line.
//! 4. If it touches money, it has tests. Plural.

pub mod address;
pub mod asset;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod transaction;

pub use address::Address;
pub use asset::{Asset, AssetResolver};
pub use error::{ErrorClass, RemitError};
