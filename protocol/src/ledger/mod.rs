//! # Ledger Access
//!
//! Everything that talks to the ledger network goes through the
//! [`LedgerClient`] trait: account lookup, envelope submission, and lookup
//! of a transaction's fate by hash. [`LedgerSubmitter`] wraps a client with
//! a timeout and tracing, and [`AccountQueue`] serializes build-and-submit
//! per source account.
//!
//! [`MemoryLedger`] is a complete in-process implementation used by tests
//! and the devnet node. It hosts contracts through the [`ContractHost`]
//! seam, which is how the escrow contract crate plugs in without this
//! crate knowing it exists.

pub mod host;
pub mod memory;
pub mod queue;
pub mod submitter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::asset::Asset;
use crate::error::RemitError;
use crate::transaction::envelope::TransactionEnvelope;

pub use host::{ContractHost, HostEvent, HostOutcome, HostRejection, HostTransfer, InvocationContext};
pub use memory::{Fault, MemoryLedger};
pub use queue::{AccountGuard, AccountQueue};
pub use submitter::LedgerSubmitter;

/// The sequencing view of an account: what a builder needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    /// Current sequence. The next transaction must carry exactly this value.
    pub sequence: u64,
}

impl Account {
    pub fn new(address: Address, sequence: u64) -> Self {
        Self { address, sequence }
    }

    /// Advance the local copy after the ledger accepted a transaction.
    pub fn increment_sequence(&mut self) {
        self.sequence += 1;
    }
}

/// One asset balance of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: Asset,
    /// Stroops.
    pub amount: u64,
}

/// Full account state as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: Address,
    pub sequence: u64,
    pub balances: Vec<Balance>,
}

impl AccountInfo {
    pub fn to_account(&self) -> Account {
        Account::new(self.address, self.sequence)
    }

    /// Balance of `asset`, zero if the account holds none.
    pub fn balance(&self, asset: &Asset) -> u64 {
        self.balances
            .iter()
            .find(|b| &b.asset == asset)
            .map(|b| b.amount)
            .unwrap_or(0)
    }
}

/// Event emitted by a contract during an applied transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub contract: Address,
    pub topic: String,
    pub data: serde_json::Value,
}

/// An applied transaction as recorded by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Hex transaction hash.
    pub hash: String,
    /// Ledger number that included the transaction.
    pub ledger: u64,
    pub source: Address,
    pub sequence: u64,
    pub fee_charged: u64,
    /// One entry per operation: `null` for payments, the contract's return
    /// value for invocations.
    pub results: Vec<serde_json::Value>,
    pub events: Vec<LedgerEvent>,
    pub applied_at: DateTime<Utc>,
}

/// Access to a ledger network.
///
/// Implementations classify failures into the [`RemitError`] taxonomy and
/// never retry on their own.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current state of `address`. [`RemitError::AccountNotFound`] if absent.
    async fn account(&self, address: &Address) -> Result<AccountInfo, RemitError>;

    /// Submits a signed envelope, returning the transaction hash on acceptance.
    async fn submit(&self, envelope: &TransactionEnvelope) -> Result<String, RemitError>;

    /// Looks up an applied transaction. `Ok(None)` means the ledger never
    /// applied it.
    async fn transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, RemitError>;

    /// Close time of the latest ledger, unix seconds. Time bounds are
    /// judged against this clock, not the caller's.
    async fn ledger_time(&self) -> Result<u64, RemitError>;
}
