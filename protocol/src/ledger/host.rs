//! The seam between the ledger and the contracts it runs.
//!
//! Execution is two-phase. [`ContractHost::execute`] runs the call against
//! staged state and reports the balance movements it wants. The ledger then
//! applies those transfers together with the rest of the transaction and
//! calls [`ContractHost::commit`] if everything held, or
//! [`ContractHost::rollback`] if anything did not. A contract's writes are
//! never visible without the matching balance changes.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::asset::Asset;

/// What the contract is told about the invocation it is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationContext {
    /// Address of the contract being invoked.
    pub contract: Address,
    /// Source account of the transaction. It signed, so it is authenticated.
    pub invoker: Address,
    /// Ledger number the transaction will close in.
    pub ledger: u64,
    /// Ledger close time, unix seconds.
    pub timestamp: u64,
}

/// A balance movement requested by a contract.
///
/// The ledger only honors transfers out of the invoker or out of the
/// contract's own custody account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTransfer {
    pub from: Address,
    pub to: Address,
    pub asset: Asset,
    pub amount: u64,
}

/// An event as handed to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    pub topic: String,
    pub data: serde_json::Value,
}

/// Result of a successful (still uncommitted) execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HostOutcome {
    pub transfers: Vec<HostTransfer>,
    pub events: Vec<HostEvent>,
    pub return_value: serde_json::Value,
}

/// A contract-level refusal. `code` reaches the submitter verbatim as the
/// ledger rejection code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRejection {
    pub code: String,
    pub detail: String,
}

/// A deployed contract the ledger can execute.
pub trait ContractHost: Send + Sync {
    /// Runs `call` against staged state. Nothing is visible until `commit`.
    fn execute(&self, ctx: &InvocationContext, call: &[u8]) -> Result<HostOutcome, HostRejection>;

    /// Makes the staged writes of the last `execute` durable.
    fn commit(&self);

    /// Discards the staged writes of the last `execute`.
    fn rollback(&self);
}
