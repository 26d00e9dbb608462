//! Capability checks, one function for every mutating entry point.
//!
//! The invoker of a transaction is authenticated by the ledger (it signed
//! the envelope). A call's `caller` argument must name that invoker, and
//! the invoker must hold the requested capability.

use remit_protocol::address::Address;

use crate::error::{ContractError, ContractResult};
use crate::lifecycle;
use crate::contract::ContractEnv;

/// What an entry point requires of its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability<'a> {
    /// The stored contract admin.
    Admin,
    /// The admin, or the escrow's designated releaser if it has one.
    Releaser(Option<&'a Address>),
    /// The named party itself.
    Holder(&'a Address),
}

pub fn authorize(env: &ContractEnv<'_>, caller: &Address, capability: Capability<'_>) -> ContractResult<()> {
    if caller != env.invoker() {
        tracing::debug!(
            caller = %caller.short(),
            invoker = %env.invoker().short(),
            "caller is not the invoker"
        );
        return Err(ContractError::Unauthorized);
    }

    let allowed = match capability {
        Capability::Admin => *caller == lifecycle::admin(env)?,
        Capability::Releaser(designated) => {
            designated == Some(caller) || *caller == lifecycle::admin(env)?
        }
        Capability::Holder(party) => caller == party,
    };

    if allowed {
        Ok(())
    } else {
        Err(ContractError::Unauthorized)
    }
}
