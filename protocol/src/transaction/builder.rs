//! Transaction construction via the builder pattern.
//!
//! The [`TransactionBuilder`] takes the source account as it was last read
//! from the ledger, one operation, and optional time bounds and memo, and
//! returns an unsigned [`TransactionEnvelope`]. Validation happens in
//! `build()`, before anything leaves the process.
//!
//! The builder never bumps the account's sequence. The envelope carries the
//! account's *current* sequence; the caller advances its local copy with
//! [`Account::increment_sequence`] only after the ledger accepts it.

use super::envelope::{TransactionBody, TransactionEnvelope};
use super::types::{Amount, Memo, Operation, TimeBounds};
use crate::address::Address;
use crate::asset::Asset;
use crate::config::{NetworkConfig, BASE_FEE};
use crate::error::RemitError;
use crate::ledger::Account;

/// Operation as requested, before validation.
#[derive(Debug, Clone)]
enum PendingOperation {
    Payment {
        destination: String,
        asset: Asset,
        amount: String,
    },
    InvokeContract {
        contract: Address,
        call: Vec<u8>,
    },
}

/// Fluent builder for unsigned envelopes.
///
/// # Usage
///
/// ```rust
/// use remit_protocol::asset::Asset;
/// use remit_protocol::crypto::keys::Keypair;
/// use remit_protocol::ledger::Account;
/// use remit_protocol::transaction::TransactionBuilder;
///
/// let alice = Account::new(Keypair::generate().address(), 7);
/// let bob = Keypair::generate().address();
///
/// let envelope = TransactionBuilder::new(&alice)
///     .payment(bob.to_string(), Asset::Native, "12.5")
///     .memo_text("rent")
///     .build()
///     .unwrap();
///
/// assert_eq!(envelope.body.sequence, 7);
/// assert_eq!(envelope.body.fee, 100);
/// ```
#[derive(Debug, Clone)]
pub struct TransactionBuilder<'a> {
    source: &'a Account,
    base_fee: u64,
    operation: Option<PendingOperation>,
    time_bounds: Option<TimeBounds>,
    memo: Option<String>,
}

impl<'a> TransactionBuilder<'a> {
    /// Starts a transaction from `source` at the network minimum fee.
    pub fn new(source: &'a Account) -> Self {
        Self {
            source,
            base_fee: BASE_FEE,
            operation: None,
            time_bounds: None,
            memo: None,
        }
    }

    /// Per-operation fee. Values below the network minimum are raised to it.
    pub fn base_fee(mut self, base_fee: u64) -> Self {
        self.base_fee = base_fee.max(BASE_FEE);
        self
    }

    /// Uses the fee schedule of `config`.
    pub fn network(self, config: &NetworkConfig) -> Self {
        self.base_fee(config.base_fee)
    }

    /// Sets the transfer. Replaces any previously set operation.
    pub fn payment(
        mut self,
        destination: impl Into<String>,
        asset: Asset,
        amount: impl Into<String>,
    ) -> Self {
        self.operation = Some(PendingOperation::Payment {
            destination: destination.into(),
            asset,
            amount: amount.into(),
        });
        self
    }

    /// Sets a contract invocation. Replaces any previously set operation.
    pub fn invoke_contract(mut self, contract: Address, call: Vec<u8>) -> Self {
        self.operation = Some(PendingOperation::InvokeContract { contract, call });
        self
    }

    pub fn time_bounds(mut self, time_bounds: TimeBounds) -> Self {
        self.time_bounds = Some(time_bounds);
        self
    }

    pub fn memo_text(mut self, text: impl Into<String>) -> Self {
        self.memo = Some(text.into());
        self
    }

    /// Validates and assembles the envelope.
    ///
    /// # Errors
    ///
    /// - [`RemitError::InvalidAmount`] for a non-positive or over-precise amount.
    /// - [`RemitError::InvalidAddress`] for a malformed destination.
    /// - [`RemitError::Validation`] for a missing operation, inverted time
    ///   bounds, an oversized memo, or an empty contract call.
    pub fn build(self) -> Result<TransactionEnvelope, RemitError> {
        let operation = match self.operation {
            Some(PendingOperation::Payment {
                destination,
                asset,
                amount,
            }) => Operation::Payment {
                destination: Address::parse(&destination)?,
                asset,
                amount: Amount::parse(&amount)?,
            },
            Some(PendingOperation::InvokeContract { contract, call }) => {
                if call.is_empty() {
                    return Err(RemitError::Validation("empty contract call".into()));
                }
                Operation::InvokeContract { contract, call }
            }
            None => return Err(RemitError::Validation("transaction has no operation".into())),
        };

        if let Some(tb) = self.time_bounds {
            TimeBounds::new(tb.min_time, tb.max_time)?;
        }

        let memo = match self.memo {
            Some(text) => Memo::text(text)?,
            None => Memo::None,
        };

        let operations = vec![operation];
        let fee = self
            .base_fee
            .checked_mul(operations.len() as u64)
            .ok_or_else(|| RemitError::Validation("fee overflow".into()))?;

        let body = TransactionBody {
            source: self.source.address,
            fee,
            sequence: self.source.sequence,
            time_bounds: self.time_bounds,
            memo,
            operations,
        };

        tracing::debug!(
            source = %self.source.address.short(),
            sequence = body.sequence,
            fee,
            op = body.operations[0].kind(),
            "envelope built"
        );

        Ok(TransactionEnvelope::unsigned(body))
    }
}

/// Builds a single native or issued payment from `source` to `destination`.
pub fn build_payment(
    source: &Account,
    destination: &str,
    asset: Asset,
    amount: &str,
    time_bounds: Option<TimeBounds>,
    config: &NetworkConfig,
) -> Result<TransactionEnvelope, RemitError> {
    let mut builder = TransactionBuilder::new(source)
        .network(config)
        .payment(destination, asset, amount);
    if let Some(tb) = time_bounds {
        builder = builder.time_bounds(tb);
    }
    builder.build()
}
