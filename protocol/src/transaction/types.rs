//! Core value types carried inside a transaction body.
//!
//! Amounts are integers of the smallest ledger unit. The decimal string a
//! human types is parsed exactly once, here, and never touches a float.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::asset::Asset;
use crate::config::{AMOUNT_DECIMALS, MAX_AMOUNT, MAX_MEMO_LENGTH, STROOPS_PER_UNIT};
use crate::error::RemitError;

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// A positive-or-zero amount in stroops (10^-7 units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_stroops(stroops: u64) -> Self {
        Self(stroops)
    }

    pub fn stroops(&self) -> u64 {
        self.0
    }

    /// Parses a positive decimal with at most seven fractional digits.
    ///
    /// Accepted: `"10"`, `"0.5"`, `"12.3456789"`. Rejected: empty strings,
    /// signs, exponents, whitespace, a dangling `.`, more than seven
    /// fractional digits, zero, and anything above the int64 range.
    pub fn parse(input: &str) -> Result<Self, RemitError> {
        let invalid = |reason: &str| RemitError::InvalidAmount {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (whole, frac) = match input.split_once('.') {
            Some((w, f)) => (w, f),
            None => (input, ""),
        };
        if whole.is_empty() {
            return Err(invalid("missing integer part"));
        }
        if input.contains('.') && frac.is_empty() {
            return Err(invalid("missing fractional digits after '.'"));
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid("only digits and a single '.' are allowed"));
        }
        if frac.len() > AMOUNT_DECIMALS as usize {
            return Err(invalid("more than 7 fractional digits"));
        }

        let overflow = || invalid("exceeds the maximum ledger amount");
        let whole: u64 = whole.parse().map_err(|_| overflow())?;
        let mut frac_value: u64 = if frac.is_empty() {
            0
        } else {
            frac.parse().map_err(|_| overflow())?
        };
        for _ in frac.len()..AMOUNT_DECIMALS as usize {
            frac_value *= 10;
        }

        let stroops = whole
            .checked_mul(STROOPS_PER_UNIT)
            .and_then(|w| w.checked_add(frac_value))
            .ok_or_else(overflow)?;
        if stroops > MAX_AMOUNT {
            return Err(overflow());
        }
        if stroops == 0 {
            return Err(invalid("amount must be positive"));
        }
        Ok(Self(stroops))
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0
            .checked_add(other.0)
            .filter(|v| *v <= MAX_AMOUNT)
            .map(Amount)
    }
}

impl fmt::Display for Amount {
    /// Always seven fractional digits, like the ledger's own rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:07}",
            self.0 / STROOPS_PER_UNIT,
            self.0 % STROOPS_PER_UNIT
        )
    }
}

// ---------------------------------------------------------------------------
// TimeBounds
// ---------------------------------------------------------------------------

/// Ledger-time window (unix seconds) in which the transaction is valid.
/// `max_time == 0` means no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub min_time: u64,
    pub max_time: u64,
}

impl TimeBounds {
    pub fn new(min_time: u64, max_time: u64) -> Result<Self, RemitError> {
        if max_time != 0 && max_time < min_time {
            return Err(RemitError::Validation(format!(
                "time bounds inverted: max_time {} < min_time {}",
                max_time, min_time
            )));
        }
        Ok(Self { min_time, max_time })
    }

    /// Valid until `max_time`, no lower bound.
    pub fn until(max_time: u64) -> Self {
        Self {
            min_time: 0,
            max_time,
        }
    }

    pub fn contains(&self, now: u64) -> bool {
        now >= self.min_time && (self.max_time == 0 || now <= self.max_time)
    }
}

// ---------------------------------------------------------------------------
// Memo
// ---------------------------------------------------------------------------

/// Optional free-form note attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Memo {
    #[default]
    None,
    Text(String),
}

impl Memo {
    /// A text memo of at most 28 bytes.
    pub fn text(text: impl Into<String>) -> Result<Self, RemitError> {
        let text = text.into();
        if text.len() > MAX_MEMO_LENGTH {
            return Err(RemitError::Validation(format!(
                "memo is {} bytes, limit is {}",
                text.len(),
                MAX_MEMO_LENGTH
            )));
        }
        Ok(Memo::Text(text))
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A single ledger operation. Every operation is sourced from the
/// transaction's source account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Move `amount` of `asset` to `destination`.
    Payment {
        destination: Address,
        asset: Asset,
        amount: Amount,
    },
    /// Run a contract. `call` is the contract's own encoded call payload;
    /// the ledger hands it to the contract host untouched.
    InvokeContract { contract: Address, call: Vec<u8> },
}

impl Operation {
    /// Short name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Payment { .. } => "payment",
            Operation::InvokeContract { .. } => "invoke_contract",
        }
    }
}
