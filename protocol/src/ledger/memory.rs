//! # In-Process Ledger
//!
//! [`MemoryLedger`] is a single-node ledger held entirely in memory. It
//! enforces the same rules a real network would, in the same order:
//!
//! 1. Structure: at least one operation, a contract invocation only on its own.
//! 2. Source account exists and the envelope carries its current sequence.
//! 3. Time bounds contain the ledger clock.
//! 4. Fee covers `base_fee × operations`.
//! 5. The source signed, and nobody else did.
//! 6. Operations apply in order against a working copy of balances.
//!
//! A transaction that fails any step leaves no trace: no fee, no sequence
//! bump, no contract writes. One that passes closes its own ledger.
//!
//! Issued assets follow the usual rule: payments out of the issuer mint,
//! payments into the issuer burn.
//!
//! The clock follows wall time and never runs backwards. Tests pin it with
//! [`MemoryLedger::set_time`] or [`MemoryLedger::advance_time`], after which
//! it only moves when told to.
//!
//! Tests steer the network with [`MemoryLedger::inject_fault`], which
//! affects the next `submit` only.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::host::{ContractHost, InvocationContext};
use super::{AccountInfo, Balance, LedgerClient, LedgerEvent, TransactionRecord};
use crate::address::Address;
use crate::asset::Asset;
use crate::config::{NetworkConfig, MAX_AMOUNT, MAX_OPERATIONS, MAX_SIGNATURES};
use crate::crypto::keys::verify_signature;
use crate::error::RemitError;
use crate::transaction::envelope::TransactionEnvelope;
use crate::transaction::signing::signed_by;
use crate::transaction::types::Operation;

/// Network misbehavior to simulate on the next submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The request never reaches the ledger.
    DropConnection,
    /// The ledger processes the envelope but the reply is lost.
    LoseResponse,
    /// The ledger processes the envelope, then the reply takes this long.
    SlowResponse(Duration),
}

#[derive(Debug, Clone, Default)]
struct LedgerAccount {
    sequence: u64,
    balances: BTreeMap<Asset, u64>,
}

struct LedgerState {
    accounts: HashMap<Address, LedgerAccount>,
    contracts: HashMap<Address, Arc<dyn ContractHost>>,
    transactions: HashMap<String, TransactionRecord>,
    ledger: u64,
    clock: u64,
    /// Set once a test takes over the clock.
    pinned: bool,
    faults: VecDeque<Fault>,
}

impl LedgerState {
    /// Ledger time now, unix seconds.
    fn tick(&mut self) -> u64 {
        if !self.pinned {
            self.clock = self.clock.max(wall_clock());
        }
        self.clock
    }
}

fn wall_clock() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// A complete ledger in one process.
pub struct MemoryLedger {
    config: NetworkConfig,
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    /// Empty ledger at ledger number 1 with the clock at wall time.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LedgerState {
                accounts: HashMap::new(),
                contracts: HashMap::new(),
                transactions: HashMap::new(),
                ledger: 1,
                clock: wall_clock(),
                pinned: false,
                faults: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Opens an account holding `native_balance` stroops, at sequence 0.
    pub fn create_account(&self, address: Address, native_balance: u64) -> Result<(), RemitError> {
        let mut state = self.state.lock();
        if state.accounts.contains_key(&address) {
            return Err(RemitError::Validation(format!(
                "account {} already exists",
                address.short()
            )));
        }
        let mut account = LedgerAccount::default();
        account.balances.insert(Asset::Native, native_balance);
        state.accounts.insert(address, account);
        tracing::debug!(account = %address.short(), native_balance, "account created");
        Ok(())
    }

    /// Faucet: credits `amount` of `asset`, opening the account if needed.
    pub fn fund(&self, address: Address, asset: Asset, amount: u64) -> Result<u64, RemitError> {
        let mut state = self.state.lock();
        let account = state.accounts.entry(address).or_default();
        let balance = account.balances.entry(asset).or_insert(0);
        let updated = balance
            .checked_add(amount)
            .filter(|v| *v <= MAX_AMOUNT)
            .ok_or_else(|| RemitError::Validation("balance would exceed the ledger maximum".into()))?;
        *balance = updated;
        Ok(updated)
    }

    /// Deploys a contract host at `address` along with its custody account.
    pub fn register_contract(
        &self,
        address: Address,
        host: Arc<dyn ContractHost>,
    ) -> Result<(), RemitError> {
        let mut state = self.state.lock();
        if state.contracts.contains_key(&address) {
            return Err(RemitError::Validation(format!(
                "contract {} already deployed",
                address.short()
            )));
        }
        state.accounts.entry(address).or_default();
        state.contracts.insert(address, host);
        tracing::info!(contract = %address.short(), "contract registered");
        Ok(())
    }

    pub fn balance(&self, address: &Address, asset: &Asset) -> u64 {
        self.state
            .lock()
            .accounts
            .get(address)
            .and_then(|a| a.balances.get(asset).copied())
            .unwrap_or(0)
    }

    /// Ledger close time, unix seconds.
    pub fn now(&self) -> u64 {
        self.state.lock().tick()
    }

    /// Pins the clock at `unix_secs`.
    pub fn set_time(&self, unix_secs: u64) {
        let mut state = self.state.lock();
        state.clock = unix_secs;
        state.pinned = true;
    }

    /// Pins the clock `secs` past its current reading.
    pub fn advance_time(&self, secs: u64) {
        let mut state = self.state.lock();
        let now = state.tick();
        state.clock = now.saturating_add(secs);
        state.pinned = true;
    }

    /// Number of the last closed ledger.
    pub fn latest_ledger(&self) -> u64 {
        self.state.lock().ledger
    }

    /// Count of applied transactions.
    pub fn transaction_count(&self) -> usize {
        self.state.lock().transactions.len()
    }

    /// Queues a fault for the next submission.
    pub fn inject_fault(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Validates and applies an envelope atomically.
    fn apply(&self, envelope: &TransactionEnvelope) -> Result<String, RemitError> {
        let mut state = self.state.lock();
        let clock = state.tick();
        let body = &envelope.body;
        let hash = envelope.hash(&self.config.passphrase)?;
        let hash_hex = hex::encode(hash);

        // -- Structure ------------------------------------------------------
        if body.operations.is_empty() {
            return Err(RemitError::rejection("tx_missing_operation", "no operations"));
        }
        if body.operations.len() > MAX_OPERATIONS {
            return Err(RemitError::rejection("tx_malformed", "too many operations"));
        }
        let invocations = body
            .operations
            .iter()
            .filter(|op| matches!(op, Operation::InvokeContract { .. }))
            .count();
        if invocations > 0 && body.operations.len() > 1 {
            return Err(RemitError::rejection(
                "tx_malformed",
                "a contract invocation must be the only operation",
            ));
        }

        // -- Source & sequence ----------------------------------------------
        let source_account = state.accounts.get(&body.source).ok_or_else(|| {
            RemitError::rejection("tx_no_account", format!("source {} not found", body.source))
        })?;
        if body.sequence != source_account.sequence {
            return Err(RemitError::Sequence {
                account: body.source.to_string(),
                envelope_sequence: body.sequence,
                ledger_sequence: source_account.sequence,
            });
        }

        // -- Time bounds ------------------------------------------------------
        if let Some(tb) = body.time_bounds {
            if clock < tb.min_time {
                return Err(RemitError::rejection(
                    "tx_too_early",
                    format!("ledger time {} before min_time {}", clock, tb.min_time),
                ));
            }
            if tb.max_time != 0 && clock > tb.max_time {
                return Err(RemitError::rejection(
                    "tx_too_late",
                    format!("ledger time {} after max_time {}", clock, tb.max_time),
                ));
            }
        }

        // -- Fee --------------------------------------------------------------
        let min_fee = self
            .config
            .base_fee
            .saturating_mul(body.operations.len() as u64);
        if body.fee < min_fee {
            return Err(RemitError::rejection(
                "tx_insufficient_fee",
                format!("fee {} below minimum {}", body.fee, min_fee),
            ));
        }

        // -- Signatures -------------------------------------------------------
        let source_key = *body.source.as_bytes();
        if envelope.signatures.len() > MAX_SIGNATURES {
            return Err(RemitError::rejection("tx_bad_auth_extra", "too many signatures"));
        }
        if !signed_by(envelope, &hash, &source_key) {
            return Err(RemitError::rejection(
                "tx_bad_auth",
                "missing or invalid source signature",
            ));
        }
        if envelope
            .signatures
            .iter()
            .any(|s| !verify_signature(&source_key, &hash, &s.signature))
        {
            return Err(RemitError::rejection(
                "tx_bad_auth_extra",
                "unused signatures attached",
            ));
        }

        let native = source_account
            .balances
            .get(&Asset::Native)
            .copied()
            .unwrap_or(0);
        if native < body.fee {
            return Err(RemitError::rejection(
                "tx_insufficient_balance",
                format!("native balance {} cannot cover fee {}", native, body.fee),
            ));
        }

        // -- Apply ------------------------------------------------------------
        let mut accounts = state.accounts.clone();
        if let Some(src) = accounts.get_mut(&body.source) {
            if let Some(b) = src.balances.get_mut(&Asset::Native) {
                *b -= body.fee;
            }
        }

        let ledger = state.ledger + 1;
        let mut results = Vec::with_capacity(body.operations.len());
        let mut events = Vec::new();
        let mut invoked: Option<Arc<dyn ContractHost>> = None;

        for (index, op) in body.operations.iter().enumerate() {
            let outcome = match op {
                Operation::Payment {
                    destination,
                    asset,
                    amount,
                } => move_funds(&mut accounts, &body.source, destination, asset, amount.stroops())
                    .map(|_| serde_json::Value::Null),
                Operation::InvokeContract { contract, call } => {
                    let Some(host) = state.contracts.get(contract).cloned() else {
                        return Err(RemitError::rejection(
                            "op_no_contract",
                            format!("no contract at {}", contract),
                        ));
                    };
                    let ctx = InvocationContext {
                        contract: *contract,
                        invoker: body.source,
                        ledger,
                        timestamp: clock,
                    };
                    let outcome = match host.execute(&ctx, call) {
                        Ok(outcome) => outcome,
                        Err(rejection) => {
                            host.rollback();
                            return Err(RemitError::LedgerRejection {
                                code: rejection.code,
                                detail: rejection.detail,
                            });
                        }
                    };
                    invoked = Some(host);

                    let mut moved = Ok(());
                    for t in &outcome.transfers {
                        if t.from != body.source && t.from != *contract {
                            moved = Err(RemitError::rejection(
                                "op_contract_auth",
                                format!("contract may not move funds of {}", t.from.short()),
                            ));
                            break;
                        }
                        if let Err(e) = move_funds(&mut accounts, &t.from, &t.to, &t.asset, t.amount) {
                            moved = Err(e);
                            break;
                        }
                    }
                    events.extend(outcome.events.into_iter().map(|e| LedgerEvent {
                        contract: *contract,
                        topic: e.topic,
                        data: e.data,
                    }));
                    moved.map(|_| outcome.return_value)
                }
            };

            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    if let Some(host) = &invoked {
                        host.rollback();
                    }
                    tracing::debug!(tx = %&hash_hex[..12], op = index, error = %e, "operation failed");
                    return Err(e);
                }
            }
        }

        if let Some(host) = &invoked {
            host.commit();
        }
        if let Some(src) = accounts.get_mut(&body.source) {
            src.sequence += 1;
        }
        state.accounts = accounts;
        state.ledger = ledger;
        state.transactions.insert(
            hash_hex.clone(),
            TransactionRecord {
                hash: hash_hex.clone(),
                ledger,
                source: body.source,
                sequence: body.sequence,
                fee_charged: body.fee,
                results,
                events,
                applied_at: Utc::now(),
            },
        );

        tracing::info!(
            tx = %&hash_hex[..12],
            ledger,
            source = %body.source.short(),
            sequence = body.sequence,
            "transaction applied"
        );
        Ok(hash_hex)
    }
}

/// Moves `amount` between two accounts of a working copy.
fn move_funds(
    accounts: &mut HashMap<Address, LedgerAccount>,
    from: &Address,
    to: &Address,
    asset: &Asset,
    amount: u64,
) -> Result<(), RemitError> {
    if amount == 0 {
        return Err(RemitError::rejection("op_malformed", "zero amount"));
    }
    if !accounts.contains_key(to) {
        return Err(RemitError::rejection(
            "op_no_destination",
            format!("destination {} not found", to),
        ));
    }

    if asset.issuer() != Some(from) {
        let src = accounts.get_mut(from).ok_or_else(|| {
            RemitError::rejection("op_no_source", format!("source {} not found", from))
        })?;
        let balance = src.balances.entry(asset.clone()).or_insert(0);
        if *balance < amount {
            return Err(RemitError::rejection(
                "op_underfunded",
                format!("{} holds {} of {}, needs {}", from.short(), balance, asset, amount),
            ));
        }
        *balance -= amount;
    }

    if asset.issuer() != Some(to) {
        if let Some(dst) = accounts.get_mut(to) {
            let balance = dst.balances.entry(asset.clone()).or_insert(0);
            *balance = balance
                .checked_add(amount)
                .filter(|v| *v <= MAX_AMOUNT)
                .ok_or_else(|| RemitError::rejection("op_line_full", "destination balance overflow"))?;
        }
    }
    Ok(())
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn account(&self, address: &Address) -> Result<AccountInfo, RemitError> {
        let state = self.state.lock();
        let account = state
            .accounts
            .get(address)
            .ok_or_else(|| RemitError::AccountNotFound {
                address: address.to_string(),
            })?;
        Ok(AccountInfo {
            address: *address,
            sequence: account.sequence,
            balances: account
                .balances
                .iter()
                .map(|(asset, amount)| Balance {
                    asset: asset.clone(),
                    amount: *amount,
                })
                .collect(),
        })
    }

    async fn submit(&self, envelope: &TransactionEnvelope) -> Result<String, RemitError> {
        let fault = self.state.lock().faults.pop_front();
        match fault {
            Some(Fault::DropConnection) => Err(RemitError::Network {
                reason: "connection dropped".into(),
            }),
            Some(Fault::LoseResponse) => {
                let outcome = self.apply(envelope);
                tracing::debug!(applied = outcome.is_ok(), "dropping ledger response");
                Err(RemitError::Network {
                    reason: "response lost".into(),
                })
            }
            Some(Fault::SlowResponse(delay)) => {
                let outcome = self.apply(envelope);
                tokio::time::sleep(delay).await;
                outcome
            }
            None => self.apply(envelope),
        }
    }

    async fn transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, RemitError> {
        Ok(self.state.lock().transactions.get(hash).cloned())
    }

    async fn ledger_time(&self) -> Result<u64, RemitError> {
        Ok(self.now())
    }
}
