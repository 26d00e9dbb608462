//! # Escrow State Machine
//!
//! Holds a sender's funds in contract custody until they are released to
//! the recipient or refunded to the sender. The lifecycle is:
//!
//! 1. **Create** the sender agrees terms (recipient, asset, total,
//!    optional conditions and designated releaser).
//! 2. **Deposit** the sender moves funds into custody, possibly in parts.
//!    Full funding transitions to `Funded`.
//! 3. **Release** the admin or designated releaser pays out to the
//!    recipient, in parts or all at once, once conditions hold.
//! 4. **Refund** the same parties return custody to the sender instead.
//!
//! Every step keeps `funded <= total` and `released + refunded <= funded`.
//! `Released` and `Refunded` are terminal. While the contract is paused every
//! mutating call fails before it looks at the escrow.
//!
//! An escrow may carry an expiry. From that ledger time on it takes no
//! deposits and pays nothing to the recipient; only a refund is left, and
//! that includes a partial deposit that never reached the total.
//!
//! The batch calls create, fully fund, or fully release up to
//! [`MAX_BATCH`] escrows in one invocation. They run the single-escrow
//! checks for every member, so one failure rejects the whole batch.

use std::fmt;

use remit_protocol::address::Address;
use remit_protocol::asset::Asset;
use remit_protocol::config::MAX_AMOUNT;
use serde::{Deserialize, Serialize};

use crate::auth::{authorize, Capability};
use crate::contract::ContractEnv;
use crate::error::{ContractError, ContractResult};
use crate::events::{BatchKind, ContractEvent};
use crate::lifecycle::require_not_paused;
use crate::storage::EscrowKey;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// Awaiting (the rest of) the deposit.
    Created,
    /// Fully funded, nothing paid out yet.
    Funded,
    PartiallyReleased,
    Released,
    PartiallyRefunded,
    Refunded,
}

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowStatus::Created => write!(f, "Created"),
            EscrowStatus::Funded => write!(f, "Funded"),
            EscrowStatus::PartiallyReleased => write!(f, "PartiallyReleased"),
            EscrowStatus::Released => write!(f, "Released"),
            EscrowStatus::PartiallyRefunded => write!(f, "PartiallyRefunded"),
            EscrowStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

/// Most escrows one batch call may touch.
pub const MAX_BATCH: usize = 10;

/// Terms a sender fixes when opening an escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTerms {
    pub recipient: Address,
    pub asset: Asset,
    /// Stroops.
    pub amount: u64,
    pub conditions: Vec<u8>,
    pub releaser: Option<Address>,
    /// Ledger seconds. Must lie in the future at creation.
    pub expires_at: Option<u64>,
}

/// One escrow record. Amounts are stroops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: u64,
    pub sender: Address,
    pub recipient: Address,
    pub asset: Asset,
    pub total: u64,
    pub funded: u64,
    pub released: u64,
    pub refunded: u64,
    pub status: EscrowStatus,
    /// Opaque release conditions. Empty means unconditional.
    pub conditions: Vec<u8>,
    /// May release or refund in addition to the admin.
    pub releaser: Option<Address>,
    /// Ledger time from which only a refund is possible.
    pub expires_at: Option<u64>,
    /// Ledger seconds.
    pub created_at: u64,
    pub updated_at: u64,
}

impl Escrow {
    /// Funds still in custody.
    pub fn available(&self) -> u64 {
        self.funded
            .saturating_sub(self.released)
            .saturating_sub(self.refunded)
    }

    /// Deposit still needed to reach the total.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.funded)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

/// The parsed form of a non-empty conditions blob.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReleaseConditions {
    #[serde(default)]
    not_before: Option<u64>,
}

/// Whether `conditions` permit a release at ledger time `now`.
///
/// A blob that does not parse never permits one.
pub fn conditions_met(conditions: &[u8], now: u64) -> bool {
    if conditions.is_empty() {
        return true;
    }
    match serde_json::from_slice::<ReleaseConditions>(conditions) {
        Ok(parsed) => parsed.not_before.map_or(true, |t| t <= now),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Storage helpers
// ---------------------------------------------------------------------------

fn load(env: &ContractEnv<'_>, escrow_id: u64) -> ContractResult<Escrow> {
    env.storage()
        .get(EscrowKey::Record(escrow_id))?
        .ok_or(ContractError::EscrowNotFound)
}

fn save(env: &mut ContractEnv<'_>, escrow: &Escrow) -> ContractResult<()> {
    env.storage_mut().set(EscrowKey::Record(escrow.id), escrow)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Creates an escrow in `Created` and returns its id. Ids start at 1.
pub fn create_escrow(env: &mut ContractEnv<'_>, sender: Address, terms: EscrowTerms) -> ContractResult<u64> {
    require_not_paused(env)?;
    authorize(env, &sender, Capability::Holder(&sender))?;
    open(env, sender, terms)
}

/// Creates one escrow per entry of `batch`, ids in order.
pub fn batch_create_escrows(
    env: &mut ContractEnv<'_>,
    sender: Address,
    batch: Vec<EscrowTerms>,
) -> ContractResult<Vec<u64>> {
    require_not_paused(env)?;
    authorize(env, &sender, Capability::Holder(&sender))?;
    check_batch_size(batch.len())?;

    let ids = batch
        .into_iter()
        .map(|terms| open(env, sender, terms))
        .collect::<ContractResult<Vec<_>>>()?;
    env.emit(ContractEvent::Batch {
        kind: BatchKind::Create,
        escrow_ids: ids.clone(),
    });
    Ok(ids)
}

fn open(env: &mut ContractEnv<'_>, sender: Address, terms: EscrowTerms) -> ContractResult<u64> {
    let EscrowTerms {
        recipient,
        asset,
        amount,
        conditions,
        releaser,
        expires_at,
    } = terms;
    if amount == 0 {
        return Err(ContractError::InvalidAmount);
    }
    if amount > MAX_AMOUNT {
        return Err(ContractError::AmountOverflow);
    }
    let now = env.timestamp();
    if let Some(expires_at) = expires_at {
        if expires_at <= now {
            return Err(ContractError::ExpiryInPast { expires_at, now });
        }
    }

    let id: u64 = env.storage().get(EscrowKey::NextId)?.unwrap_or(1);
    let next = id.checked_add(1).ok_or(ContractError::AmountOverflow)?;

    let escrow = Escrow {
        id,
        sender,
        recipient,
        asset,
        total: amount,
        funded: 0,
        released: 0,
        refunded: 0,
        status: EscrowStatus::Created,
        conditions,
        releaser,
        expires_at,
        created_at: now,
        updated_at: now,
    };
    save(env, &escrow)?;
    env.storage_mut().set(EscrowKey::NextId, &next)?;
    env.emit(ContractEvent::EscrowCreated {
        escrow_id: id,
        sender,
        recipient,
        amount,
    });

    tracing::debug!(escrow_id = id, sender = %sender.short(), amount, "escrow created");
    Ok(id)
}

/// Moves `amount` from the sender into custody.
pub fn deposit(
    env: &mut ContractEnv<'_>,
    caller: &Address,
    escrow_id: u64,
    amount: u64,
) -> ContractResult<Escrow> {
    require_not_paused(env)?;
    let mut escrow = load(env, escrow_id)?;
    authorize(env, caller, Capability::Holder(&escrow.sender))?;
    if amount == 0 {
        return Err(ContractError::InvalidAmount);
    }
    if escrow.status.is_terminal() {
        return Err(ContractError::EscrowClosed);
    }
    if !matches!(escrow.status, EscrowStatus::Created | EscrowStatus::Funded) {
        return Err(ContractError::InvalidState {
            current: escrow.status.to_string(),
            expected: "Created or Funded".into(),
        });
    }
    if escrow.is_expired(env.timestamp()) {
        return Err(ContractError::EscrowExpired);
    }

    let remaining = escrow
        .total
        .checked_sub(escrow.funded)
        .ok_or(ContractError::AmountOverflow)?;
    if amount > remaining {
        return Err(ContractError::OverFunded {
            attempted: amount,
            remaining,
        });
    }

    escrow.funded = escrow
        .funded
        .checked_add(amount)
        .ok_or(ContractError::AmountOverflow)?;
    if escrow.funded == escrow.total {
        escrow.status = EscrowStatus::Funded;
    }
    escrow.updated_at = env.timestamp();

    let custody = *env.contract();
    env.transfer(escrow.sender, custody, escrow.asset.clone(), amount);
    save(env, &escrow)?;
    env.emit(ContractEvent::Deposited {
        escrow_id,
        amount,
        status: escrow.status,
    });
    Ok(escrow)
}

/// Releases everything still in custody to the recipient.
pub fn release_escrow(env: &mut ContractEnv<'_>, caller: &Address, escrow_id: u64) -> ContractResult<Escrow> {
    require_not_paused(env)?;
    let mut escrow = load(env, escrow_id)?;
    authorize(env, caller, Capability::Releaser(escrow.releaser.as_ref()))?;
    let amount = escrow.available();
    pay_out(env, &mut escrow, amount, Direction::Release)?;
    Ok(escrow)
}

/// Releases `amount` to the recipient.
pub fn release_partial(
    env: &mut ContractEnv<'_>,
    caller: &Address,
    escrow_id: u64,
    amount: u64,
) -> ContractResult<Escrow> {
    require_not_paused(env)?;
    let mut escrow = load(env, escrow_id)?;
    authorize(env, caller, Capability::Releaser(escrow.releaser.as_ref()))?;
    check_partial(&escrow, amount)?;
    pay_out(env, &mut escrow, amount, Direction::Release)?;
    Ok(escrow)
}

/// Returns everything still in custody to the sender.
pub fn refund_escrow(env: &mut ContractEnv<'_>, caller: &Address, escrow_id: u64) -> ContractResult<Escrow> {
    require_not_paused(env)?;
    let mut escrow = load(env, escrow_id)?;
    authorize(env, caller, Capability::Releaser(escrow.releaser.as_ref()))?;
    let amount = escrow.available();
    pay_out(env, &mut escrow, amount, Direction::Refund)?;
    Ok(escrow)
}

/// Returns `amount` to the sender.
pub fn refund_partial(
    env: &mut ContractEnv<'_>,
    caller: &Address,
    escrow_id: u64,
    amount: u64,
) -> ContractResult<Escrow> {
    require_not_paused(env)?;
    let mut escrow = load(env, escrow_id)?;
    authorize(env, caller, Capability::Releaser(escrow.releaser.as_ref()))?;
    check_partial(&escrow, amount)?;
    pay_out(env, &mut escrow, amount, Direction::Refund)?;
    Ok(escrow)
}

pub fn get_escrow(env: &ContractEnv<'_>, escrow_id: u64) -> ContractResult<Escrow> {
    load(env, escrow_id)
}

/// Deposits whatever each escrow still needs, leaving all of them `Funded`.
pub fn batch_deposit(
    env: &mut ContractEnv<'_>,
    caller: &Address,
    escrow_ids: Vec<u64>,
) -> ContractResult<Vec<Escrow>> {
    require_not_paused(env)?;
    check_batch(&escrow_ids)?;

    let mut funded = Vec::with_capacity(escrow_ids.len());
    for &escrow_id in &escrow_ids {
        let escrow = load(env, escrow_id)?;
        let remaining = escrow.remaining();
        if remaining == 0 {
            // Already deposited in full, or paid out.
            return Err(ContractError::InvalidState {
                current: escrow.status.to_string(),
                expected: "Created".into(),
            });
        }
        funded.push(deposit(env, caller, escrow_id, remaining)?);
    }
    env.emit(ContractEvent::Batch {
        kind: BatchKind::Deposit,
        escrow_ids,
    });
    Ok(funded)
}

/// Releases everything each escrow holds to its recipient.
pub fn batch_release(
    env: &mut ContractEnv<'_>,
    caller: &Address,
    escrow_ids: Vec<u64>,
) -> ContractResult<Vec<Escrow>> {
    require_not_paused(env)?;
    check_batch(&escrow_ids)?;

    let released = escrow_ids
        .iter()
        .map(|&escrow_id| release_escrow(env, caller, escrow_id))
        .collect::<ContractResult<Vec<_>>>()?;
    env.emit(ContractEvent::Batch {
        kind: BatchKind::Release,
        escrow_ids,
    });
    Ok(released)
}

fn check_batch_size(size: usize) -> ContractResult<()> {
    if size == 0 {
        return Err(ContractError::EmptyBatch);
    }
    if size > MAX_BATCH {
        return Err(ContractError::BatchTooLarge {
            size,
            max: MAX_BATCH,
        });
    }
    Ok(())
}

fn check_batch(escrow_ids: &[u64]) -> ContractResult<()> {
    check_batch_size(escrow_ids.len())?;
    let mut seen = std::collections::BTreeSet::new();
    match escrow_ids.iter().find(|id| !seen.insert(**id)) {
        Some(&escrow_id) => Err(ContractError::DuplicateEscrowId { escrow_id }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Shared payout path
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Release,
    Refund,
}

/// Amount checks for the partial variants. Custody is checked before state,
/// so over-asking a closed escrow reports what is left (nothing).
fn check_partial(escrow: &Escrow, amount: u64) -> ContractResult<()> {
    if amount == 0 {
        return Err(ContractError::InvalidAmount);
    }
    let available = escrow.available();
    if amount > available {
        return Err(ContractError::InsufficientFunds {
            requested: amount,
            available,
        });
    }
    Ok(())
}

fn pay_out(
    env: &mut ContractEnv<'_>,
    escrow: &mut Escrow,
    amount: u64,
    direction: Direction,
) -> ContractResult<()> {
    if escrow.status.is_terminal() {
        return Err(ContractError::EscrowClosed);
    }

    let (partial, done, expected) = match direction {
        Direction::Release => (
            EscrowStatus::PartiallyReleased,
            EscrowStatus::Released,
            "Funded or PartiallyReleased",
        ),
        Direction::Refund => (
            EscrowStatus::PartiallyRefunded,
            EscrowStatus::Refunded,
            "Funded or PartiallyRefunded",
        ),
    };
    // An expired escrow that never reached its total can still be refunded.
    let expired_deposit = direction == Direction::Refund
        && escrow.status == EscrowStatus::Created
        && escrow.is_expired(env.timestamp());
    if escrow.status != EscrowStatus::Funded && escrow.status != partial && !expired_deposit {
        return Err(ContractError::InvalidState {
            current: escrow.status.to_string(),
            expected: expected.into(),
        });
    }
    if direction == Direction::Release {
        if escrow.is_expired(env.timestamp()) {
            return Err(ContractError::EscrowExpired);
        }
        if !conditions_met(&escrow.conditions, env.timestamp()) {
            return Err(ContractError::ConditionsNotMet);
        }
    }

    let available = escrow.available();
    if amount == 0 || amount > available {
        return Err(ContractError::InsufficientFunds {
            requested: amount,
            available,
        });
    }

    let (paid, to) = match direction {
        Direction::Release => (&mut escrow.released, escrow.recipient),
        Direction::Refund => (&mut escrow.refunded, escrow.sender),
    };
    *paid = paid.checked_add(amount).ok_or(ContractError::AmountOverflow)?;
    let settled = *paid == escrow.funded;
    escrow.status = if settled { done } else { partial };
    escrow.updated_at = env.timestamp();

    let custody = *env.contract();
    env.transfer(custody, to, escrow.asset.clone(), amount);
    save(env, escrow)?;

    let event = match direction {
        Direction::Release => ContractEvent::Released {
            escrow_id: escrow.id,
            amount,
            status: escrow.status,
        },
        Direction::Refund => ContractEvent::Refunded {
            escrow_id: escrow.id,
            amount,
            status: escrow.status,
        },
    };
    env.emit(event);

    tracing::debug!(
        escrow_id = escrow.id,
        amount,
        status = %escrow.status,
        "escrow paid out"
    );
    Ok(())
}
