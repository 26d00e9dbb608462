//! # Transaction Module
//!
//! Construction, encoding, and signing of ledger transactions.
//!
//! ## Architecture
//!
//! ```text
//! types.rs    - Amount, TimeBounds, Memo, Operation
//! envelope.rs - TransactionBody, DecoratedSignature, TransactionEnvelope, hashing, wire encoding
//! builder.rs  - Fluent TransactionBuilder producing unsigned envelopes
//! signing.rs  - Signer: appends one signature, returns the input on failure
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Build** with [`TransactionBuilder`] against a freshly read [`Account`](crate::ledger::Account).
//! 2. **Sign** with [`Signer`], here or wherever the key lives.
//! 3. **Submit** through [`LedgerSubmitter`](crate::ledger::LedgerSubmitter).
//! 4. On acceptance, bump the local sequence; on `Sequence`, re-read and rebuild.

pub mod builder;
pub mod envelope;
pub mod signing;
pub mod types;

pub use builder::{build_payment, TransactionBuilder};
pub use envelope::{DecoratedSignature, TransactionBody, TransactionEnvelope};
pub use signing::{signed_by, SignFailure, Signer};
pub use types::{Amount, Memo, Operation, TimeBounds};
