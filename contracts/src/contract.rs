//! # Remittance Contract
//!
//! The deployed contract: durable storage, the code currently installed,
//! and the glue that lets the ledger run it through
//! [`ContractHost`](remit_protocol::ledger::ContractHost).
//!
//! ## Invocation
//!
//! 1. A pending upgrade, if any, is installed. This is the only place code
//!    changes, so an upgrade takes effect on the invocation after it.
//! 2. The call payload is decoded into a [`ContractCall`].
//! 3. The installed [`ContractCode`] runs it against a [`ContractEnv`]
//!    whose storage writes are staged.
//! 4. The ledger applies the requested transfers, then commits or rolls back.
//!
//! Nothing an invocation does is visible unless the whole transaction holds.

use parking_lot::Mutex;
use remit_protocol::address::Address;
use remit_protocol::asset::Asset;
use remit_protocol::ledger::{
    ContractHost, HostEvent, HostOutcome, HostRejection, HostTransfer, InvocationContext,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::code::{CodeHash, CodeRegistry, ContractCode};
use crate::error::{ContractError, ContractResult};
use crate::escrow::{self, Escrow, EscrowTerms};
use crate::events::ContractEvent;
use crate::lifecycle;
use crate::storage::{ContractStorage, EscrowKey, LifecycleKey, StorageKey};

// ---------------------------------------------------------------------------
// Calls & values
// ---------------------------------------------------------------------------

/// The invocation surface. Callers name themselves in `admin`/`caller`/
/// `sender`; the name must match the transaction source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCall {
    Initialize { admin: Address },
    Version,
    IsPaused,
    Pause { admin: Address },
    Unpause { admin: Address },
    Upgrade { admin: Address, new_code_hash: CodeHash },
    Migrate { admin: Address },
    CreateEscrow {
        sender: Address,
        recipient: Address,
        asset: Asset,
        amount: u64,
        conditions: Vec<u8>,
        releaser: Option<Address>,
        expires_at: Option<u64>,
    },
    Deposit { caller: Address, escrow_id: u64, amount: u64 },
    Release { caller: Address, escrow_id: u64 },
    ReleasePartial { caller: Address, escrow_id: u64, amount: u64 },
    Refund { caller: Address, escrow_id: u64 },
    RefundPartial { caller: Address, escrow_id: u64, amount: u64 },
    GetEscrow { escrow_id: u64 },
    BatchCreate { sender: Address, escrows: Vec<EscrowTerms> },
    BatchDeposit { caller: Address, escrow_ids: Vec<u64> },
    BatchRelease { caller: Address, escrow_ids: Vec<u64> },
}

impl ContractCall {
    /// Wire form carried in an `InvokeContract` operation.
    pub fn encode(&self) -> ContractResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ContractError::Storage(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> ContractResult<Self> {
        bincode::deserialize(bytes).map_err(|_| ContractError::InvalidCall)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::Initialize { .. } => "initialize",
            ContractCall::Version => "version",
            ContractCall::IsPaused => "is_paused",
            ContractCall::Pause { .. } => "pause",
            ContractCall::Unpause { .. } => "unpause",
            ContractCall::Upgrade { .. } => "upgrade",
            ContractCall::Migrate { .. } => "migrate",
            ContractCall::CreateEscrow { .. } => "create_escrow",
            ContractCall::Deposit { .. } => "deposit",
            ContractCall::Release { .. } => "release_escrow",
            ContractCall::ReleasePartial { .. } => "release_partial",
            ContractCall::Refund { .. } => "refund_escrow",
            ContractCall::RefundPartial { .. } => "refund_partial",
            ContractCall::GetEscrow { .. } => "get_escrow",
            ContractCall::BatchCreate { .. } => "batch_create_escrows",
            ContractCall::BatchDeposit { .. } => "batch_deposit",
            ContractCall::BatchRelease { .. } => "batch_release",
        }
    }
}

/// What an invocation returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractValue {
    Unit,
    Bool(bool),
    Version(u32),
    EscrowId(u64),
    Escrow(Escrow),
    EscrowIds(Vec<u64>),
    Escrows(Vec<Escrow>),
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Everything a running invocation can see and do.
pub struct ContractEnv<'a> {
    ctx: &'a InvocationContext,
    storage: &'a mut ContractStorage,
    registry: &'a CodeRegistry,
    events: Vec<ContractEvent>,
    transfers: Vec<HostTransfer>,
}

impl<'a> ContractEnv<'a> {
    pub fn new(ctx: &'a InvocationContext, storage: &'a mut ContractStorage, registry: &'a CodeRegistry) -> Self {
        Self {
            ctx,
            storage,
            registry,
            events: Vec::new(),
            transfers: Vec::new(),
        }
    }

    pub fn contract(&self) -> &Address {
        &self.ctx.contract
    }

    /// Authenticated source of the transaction.
    pub fn invoker(&self) -> &Address {
        &self.ctx.invoker
    }

    pub fn ledger(&self) -> u64 {
        self.ctx.ledger
    }

    /// Ledger close time, unix seconds.
    pub fn timestamp(&self) -> u64 {
        self.ctx.timestamp
    }

    pub fn storage(&self) -> &ContractStorage {
        &*self.storage
    }

    pub fn storage_mut(&mut self) -> &mut ContractStorage {
        &mut *self.storage
    }

    pub fn registry(&self) -> &CodeRegistry {
        self.registry
    }

    pub fn emit(&mut self, event: ContractEvent) {
        self.events.push(event);
    }

    /// Requests a balance movement, applied by the ledger with the rest of
    /// the transaction.
    pub fn transfer(&mut self, from: Address, to: Address, asset: Asset, amount: u64) {
        self.transfers.push(HostTransfer {
            from,
            to,
            asset,
            amount,
        });
    }

    fn into_parts(self) -> (Vec<ContractEvent>, Vec<HostTransfer>) {
        (self.events, self.transfers)
    }
}

/// Routes a call to its entry point. The default for every [`ContractCode`].
pub fn dispatch<C: ContractCode + ?Sized>(
    code: &C,
    env: &mut ContractEnv<'_>,
    call: ContractCall,
) -> ContractResult<ContractValue> {
    match call {
        ContractCall::Initialize { admin } => {
            lifecycle::initialize(env, &admin).map(|_| ContractValue::Unit)
        }
        ContractCall::Version => lifecycle::version(env).map(ContractValue::Version),
        ContractCall::IsPaused => lifecycle::is_paused(env).map(ContractValue::Bool),
        ContractCall::Pause { admin } => lifecycle::pause(env, &admin).map(|_| ContractValue::Unit),
        ContractCall::Unpause { admin } => {
            lifecycle::unpause(env, &admin).map(|_| ContractValue::Unit)
        }
        ContractCall::Upgrade {
            admin,
            new_code_hash,
        } => lifecycle::upgrade(env, &admin, new_code_hash).map(ContractValue::Version),
        ContractCall::Migrate { admin } => {
            lifecycle::migrate(env, &admin, code).map(ContractValue::Version)
        }
        ContractCall::CreateEscrow {
            sender,
            recipient,
            asset,
            amount,
            conditions,
            releaser,
            expires_at,
        } => escrow::create_escrow(
            env,
            sender,
            EscrowTerms {
                recipient,
                asset,
                amount,
                conditions,
                releaser,
                expires_at,
            },
        )
        .map(ContractValue::EscrowId),
        ContractCall::Deposit {
            caller,
            escrow_id,
            amount,
        } => escrow::deposit(env, &caller, escrow_id, amount).map(ContractValue::Escrow),
        ContractCall::Release { caller, escrow_id } => {
            escrow::release_escrow(env, &caller, escrow_id).map(ContractValue::Escrow)
        }
        ContractCall::ReleasePartial {
            caller,
            escrow_id,
            amount,
        } => escrow::release_partial(env, &caller, escrow_id, amount).map(ContractValue::Escrow),
        ContractCall::Refund { caller, escrow_id } => {
            escrow::refund_escrow(env, &caller, escrow_id).map(ContractValue::Escrow)
        }
        ContractCall::RefundPartial {
            caller,
            escrow_id,
            amount,
        } => escrow::refund_partial(env, &caller, escrow_id, amount).map(ContractValue::Escrow),
        ContractCall::GetEscrow { escrow_id } => {
            escrow::get_escrow(env, escrow_id).map(ContractValue::Escrow)
        }
        ContractCall::BatchCreate { sender, escrows } => {
            escrow::batch_create_escrows(env, sender, escrows).map(ContractValue::EscrowIds)
        }
        ContractCall::BatchDeposit { caller, escrow_ids } => {
            escrow::batch_deposit(env, &caller, escrow_ids).map(ContractValue::Escrows)
        }
        ContractCall::BatchRelease { caller, escrow_ids } => {
            escrow::batch_release(env, &caller, escrow_ids).map(ContractValue::Escrows)
        }
    }
}

// ---------------------------------------------------------------------------
// Deployed contract
// ---------------------------------------------------------------------------

/// Lifecycle fields as of the last committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSnapshot {
    pub admin: Address,
    pub version: u32,
    pub paused: bool,
    pub active_code_hash: CodeHash,
    pub pending_code_hash: Option<CodeHash>,
}

/// Result of a staged invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub value: ContractValue,
    pub events: Vec<ContractEvent>,
    pub transfers: Vec<HostTransfer>,
}

struct ContractState {
    storage: ContractStorage,
    staged_events: Vec<ContractEvent>,
    events: Vec<ContractEvent>,
}

/// A deployed remittance contract.
pub struct RemittanceContract {
    address: Address,
    registry: CodeRegistry,
    state: Mutex<ContractState>,
}

impl RemittanceContract {
    /// Deploys at `address` running `initial_code`, which must be uploaded.
    /// The contract still needs an `Initialize` call.
    pub fn deploy(address: Address, registry: CodeRegistry, initial_code: CodeHash) -> ContractResult<Self> {
        if !registry.contains(&initial_code) {
            return Err(ContractError::UpgradeFailed);
        }
        let mut storage = ContractStorage::new();
        storage.set(LifecycleKey::ActiveCode, &initial_code)?;
        storage.commit();

        tracing::info!(contract = %address.short(), code = %initial_code, "contract deployed");
        Ok(Self {
            address,
            registry,
            state: Mutex::new(ContractState {
                storage,
                staged_events: Vec::new(),
                events: Vec::new(),
            }),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Runs `call` with every write staged. Follow with
    /// [`commit`](ContractHost::commit) or [`rollback`](ContractHost::rollback).
    pub fn invoke(&self, ctx: &InvocationContext, call: ContractCall) -> ContractResult<Invocation> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.storage.rollback();
        state.staged_events.clear();

        let pending: Option<CodeHash> = state.storage.get(LifecycleKey::PendingCode)?;
        if let Some(pending) = pending {
            state.storage.set(LifecycleKey::ActiveCode, &pending)?;
            state.storage.remove(LifecycleKey::PendingCode);
            tracing::info!(code = %pending, "installing upgraded code");
        }

        let active: CodeHash = state
            .storage
            .get(LifecycleKey::ActiveCode)?
            .ok_or(ContractError::NotInitialized)?;
        let code = self
            .registry
            .get(&active)
            .ok_or(ContractError::UpgradeFailed)?;

        let name = call.name();
        let mut env = ContractEnv::new(ctx, &mut state.storage, &self.registry);
        let value = code.invoke(&mut env, call)?;
        let (events, transfers) = env.into_parts();
        state.staged_events = events.clone();

        tracing::debug!(
            call = name,
            code = code.label(),
            invoker = %ctx.invoker.short(),
            transfers = transfers.len(),
            "invocation staged"
        );
        Ok(Invocation {
            value,
            events,
            transfers,
        })
    }

    /// [`invoke`](Self::invoke) and settle immediately. For callers that
    /// have no transfers to apply, such as read-only queries.
    pub fn call(&self, ctx: &InvocationContext, call: ContractCall) -> ContractResult<Invocation> {
        match self.invoke(ctx, call) {
            Ok(invocation) => {
                self.commit();
                Ok(invocation)
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Committed value of `key`. An invocation in flight is invisible.
    fn read<T: DeserializeOwned>(&self, key: impl Into<StorageKey>) -> ContractResult<Option<T>> {
        self.state.lock().storage.get_committed(key)
    }

    /// Committed lifecycle state, all read under one lock.
    pub fn lifecycle(&self) -> ContractResult<LifecycleSnapshot> {
        let state = self.state.lock();
        let storage = &state.storage;
        Ok(LifecycleSnapshot {
            admin: storage
                .get_committed(LifecycleKey::Admin)?
                .ok_or(ContractError::NotInitialized)?,
            version: storage
                .get_committed(LifecycleKey::Version)?
                .ok_or(ContractError::NotInitialized)?,
            paused: storage
                .get_committed(LifecycleKey::Paused)?
                .ok_or(ContractError::NotInitialized)?,
            active_code_hash: storage
                .get_committed(LifecycleKey::ActiveCode)?
                .ok_or(ContractError::NotInitialized)?,
            pending_code_hash: storage.get_committed(LifecycleKey::PendingCode)?,
        })
    }

    pub fn version(&self) -> ContractResult<u32> {
        self.read(LifecycleKey::Version)?
            .ok_or(ContractError::NotInitialized)
    }

    pub fn is_paused(&self) -> ContractResult<bool> {
        self.read(LifecycleKey::Paused)?
            .ok_or(ContractError::NotInitialized)
    }

    pub fn admin(&self) -> ContractResult<Address> {
        self.read(LifecycleKey::Admin)?
            .ok_or(ContractError::NotInitialized)
    }

    pub fn escrow(&self, escrow_id: u64) -> ContractResult<Escrow> {
        self.read(EscrowKey::Record(escrow_id))?
            .ok_or(ContractError::EscrowNotFound)
    }

    pub fn active_code_hash(&self) -> ContractResult<CodeHash> {
        self.read(LifecycleKey::ActiveCode)?
            .ok_or(ContractError::NotInitialized)
    }

    /// Code scheduled by an upgrade but not installed yet.
    pub fn pending_code_hash(&self) -> ContractResult<Option<CodeHash>> {
        self.read(LifecycleKey::PendingCode)
    }

    /// Every committed event, oldest first.
    pub fn events(&self) -> Vec<ContractEvent> {
        self.state.lock().events.clone()
    }
}

impl ContractHost for RemittanceContract {
    fn execute(&self, ctx: &InvocationContext, call: &[u8]) -> Result<HostOutcome, HostRejection> {
        let reject = |e: ContractError| {
            tracing::debug!(code = e.reason_code(), error = %e, "invocation rejected");
            HostRejection {
                code: e.reason_code().to_string(),
                detail: e.to_string(),
            }
        };

        let call = ContractCall::decode(call).map_err(reject)?;
        let invocation = self.invoke(ctx, call).map_err(reject)?;
        let return_value = serde_json::to_value(&invocation.value)
            .map_err(|e| reject(ContractError::Storage(e.to_string())))?;

        Ok(HostOutcome {
            transfers: invocation.transfers,
            events: invocation
                .events
                .iter()
                .map(|e| HostEvent {
                    topic: e.topic().to_string(),
                    data: e.data(),
                })
                .collect(),
            return_value,
        })
    }

    fn commit(&self) {
        let mut state = self.state.lock();
        state.storage.commit();
        let staged = std::mem::take(&mut state.staged_events);
        state.events.extend(staged);
    }

    fn rollback(&self) {
        let mut state = self.state.lock();
        state.storage.rollback();
        state.staged_events.clear();
    }
}
