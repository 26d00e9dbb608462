//! # Contract Lifecycle
//!
//! Admin-governed state that gates every business operation:
//!
//! - **version** starts at 1 and grows by exactly one per successful upgrade.
//! - **paused** suspends every state-changing escrow operation. Reads stay
//!   available.
//! - **upgrade** pauses the contract, bumps the version, and schedules the
//!   new code. The swap happens when the *next* invocation starts, so the
//!   upgrade call itself finishes on the old code.
//! - **migrate** runs the new code's migration hook against stored data,
//!   records the version as migrated, and unpauses.
//!
//! All of it lives under [`LifecycleKey`], well away from escrow records.

use remit_protocol::address::Address;

use crate::auth::{authorize, Capability};
use crate::code::{CodeHash, ContractCode};
use crate::contract::ContractEnv;
use crate::error::{ContractError, ContractResult};
use crate::events::ContractEvent;
use crate::storage::LifecycleKey;

/// One-time setup. The admin must be the invoker.
pub fn initialize(env: &mut ContractEnv<'_>, admin: &Address) -> ContractResult<()> {
    if env.storage().has(LifecycleKey::Admin) {
        return Err(ContractError::AlreadyInitialized);
    }
    if admin != env.invoker() {
        return Err(ContractError::Unauthorized);
    }

    let storage = env.storage_mut();
    storage.set(LifecycleKey::Admin, admin)?;
    storage.set(LifecycleKey::Version, &1u32)?;
    storage.set(LifecycleKey::Paused, &false)?;
    storage.set(LifecycleKey::MigratedVersion, &1u32)?;

    tracing::info!(admin = %admin.short(), "contract initialized");
    Ok(())
}

pub fn admin(env: &ContractEnv<'_>) -> ContractResult<Address> {
    env.storage()
        .get(LifecycleKey::Admin)?
        .ok_or(ContractError::NotInitialized)
}

pub fn version(env: &ContractEnv<'_>) -> ContractResult<u32> {
    env.storage()
        .get(LifecycleKey::Version)?
        .ok_or(ContractError::NotInitialized)
}

pub fn is_paused(env: &ContractEnv<'_>) -> ContractResult<bool> {
    env.storage()
        .get(LifecycleKey::Paused)?
        .ok_or(ContractError::NotInitialized)
}

/// Gate for state-changing business operations.
pub fn require_not_paused(env: &ContractEnv<'_>) -> ContractResult<()> {
    if is_paused(env)? {
        Err(ContractError::ContractPaused)
    } else {
        Ok(())
    }
}

pub fn pause(env: &mut ContractEnv<'_>, caller: &Address) -> ContractResult<()> {
    authorize(env, caller, Capability::Admin)?;
    if is_paused(env)? {
        return Err(ContractError::AlreadyPaused);
    }
    env.storage_mut().set(LifecycleKey::Paused, &true)?;
    env.emit(ContractEvent::Paused(true));
    tracing::info!("contract paused");
    Ok(())
}

pub fn unpause(env: &mut ContractEnv<'_>, caller: &Address) -> ContractResult<()> {
    authorize(env, caller, Capability::Admin)?;
    if !is_paused(env)? {
        return Err(ContractError::NotPaused);
    }
    env.storage_mut().set(LifecycleKey::Paused, &false)?;
    env.emit(ContractEvent::Paused(false));
    tracing::info!("contract unpaused");
    Ok(())
}

/// Schedules `new_code_hash` and returns the new version.
///
/// Pausing here is idempotent: an already-paused contract stays paused.
pub fn upgrade(env: &mut ContractEnv<'_>, caller: &Address, new_code_hash: CodeHash) -> ContractResult<u32> {
    authorize(env, caller, Capability::Admin)?;
    if !env.registry().contains(&new_code_hash) {
        tracing::warn!(code = %new_code_hash, "upgrade to unknown code refused");
        return Err(ContractError::UpgradeFailed);
    }

    let was_paused = is_paused(env)?;
    let next = version(env)?
        .checked_add(1)
        .ok_or(ContractError::UpgradeFailed)?;

    let storage = env.storage_mut();
    storage.set(LifecycleKey::Paused, &true)?;
    storage.set(LifecycleKey::Version, &next)?;
    storage.set(LifecycleKey::PendingCode, &new_code_hash)?;

    if !was_paused {
        env.emit(ContractEvent::Paused(true));
    }
    env.emit(ContractEvent::Upgraded {
        version: next,
        code_hash: new_code_hash,
    });

    tracing::info!(version = next, code = %new_code_hash, "upgrade scheduled");
    Ok(next)
}

/// Runs `code`'s migration hook for the current version and unpauses.
///
/// `code` is the code installed for this invocation.
pub fn migrate<C: ContractCode + ?Sized>(
    env: &mut ContractEnv<'_>,
    caller: &Address,
    code: &C,
) -> ContractResult<u32> {
    authorize(env, caller, Capability::Admin)?;

    let current = version(env)?;
    let migrated: u32 = env
        .storage()
        .get(LifecycleKey::MigratedVersion)?
        .unwrap_or(1);
    if migrated >= current {
        return Err(ContractError::VersionMismatch {
            expected: migrated,
            found: current,
        });
    }

    code.migrate(env, migrated).map_err(|e| match e {
        ContractError::MigrationFailed { .. } => e,
        other => ContractError::MigrationFailed {
            reason: other.to_string(),
        },
    })?;

    let was_paused = is_paused(env)?;
    let storage = env.storage_mut();
    storage.set(LifecycleKey::MigratedVersion, &current)?;
    storage.set(LifecycleKey::Paused, &false)?;

    if was_paused {
        env.emit(ContractEvent::Paused(false));
    }
    env.emit(ContractEvent::Migrated { version: current });

    tracing::info!(from = migrated, to = current, code = code.label(), "migration complete");
    Ok(current)
}
