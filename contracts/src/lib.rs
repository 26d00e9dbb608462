//! # REMIT Contracts
//!
//! On-ledger logic for REMIT: one upgradeable contract that holds remittance
//! funds in escrow.
//!
//! - **Escrow**: create, fund, release or refund, in parts or in full, with
//!   optional time-lock conditions, an expiry, and a designated releaser.
//!   Batch calls cover up to ten escrows atomically.
//! - **Lifecycle**: admin-governed pause, upgrade, and migrate, gating
//!   every business operation.
//! - **Code**: swappable logic identified by hash, so a live contract can
//!   be upgraded without ever giving up custody of in-flight funds.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow. Wrapping arithmetic and
//!    money do not mix.
//! 2. State transitions are explicit: enum variants, not boolean flags.
//! 3. One capability check gates every privileged operation.
//! 4. Invocations are atomic. Writes and events are staged and only become
//!    real when the ledger commits the whole transaction.

pub mod auth;
pub mod code;
pub mod contract;
pub mod error;
pub mod escrow;
pub mod events;
pub mod lifecycle;
pub mod storage;

pub use code::{CodeHash, CodeRegistry, ContractCode, StandardCode};
pub use contract::{
    ContractCall, ContractEnv, ContractValue, Invocation, LifecycleSnapshot, RemittanceContract,
};
pub use error::{ContractError, ContractResult};
pub use escrow::{Escrow, EscrowStatus, EscrowTerms, MAX_BATCH};
pub use events::{BatchKind, ContractEvent};
