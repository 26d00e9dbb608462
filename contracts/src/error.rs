//! Contract errors.
//!
//! Every failure a contract can report, with a stable numeric code and a
//! snake_case reason string. The reason string is what the ledger
//! surfaces to submitters, so it is part of the public interface and
//! never changes once published.

use thiserror::Error;

/// Errors returned by contract entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    // -- Lifecycle ---------------------------------------------------------
    /// The requested code hash was never uploaded.
    #[error("upgrade failed: unknown code hash")]
    UpgradeFailed,

    /// The caller lacks the capability for this operation.
    #[error("unauthorized")]
    Unauthorized,

    /// Business operations are suspended.
    #[error("contract is paused")]
    ContractPaused,

    #[error("contract is already paused")]
    AlreadyPaused,

    #[error("contract is not paused")]
    NotPaused,

    /// The installed code's migration hook refused.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    /// Nothing to migrate: the data layout already matches this version.
    #[error("version mismatch: expected a version after {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("contract already initialized")]
    AlreadyInitialized,

    #[error("contract not initialized")]
    NotInitialized,

    // -- Escrow ------------------------------------------------------------
    #[error("amount must be positive")]
    InvalidAmount,

    /// The deposit would push the funded amount past the escrow total.
    #[error("overfunded: attempted to deposit {attempted} but only {remaining} remains")]
    OverFunded { attempted: u64, remaining: u64 },

    /// Tried to move more than the escrow still holds.
    #[error("insufficient escrowed funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    /// The escrow reached a terminal state.
    #[error("escrow is closed")]
    EscrowClosed,

    #[error("escrow not found")]
    EscrowNotFound,

    #[error("invalid state transition: escrow is {current}, expected {expected}")]
    InvalidState { current: String, expected: String },

    /// Release conditions do not hold at this ledger time.
    #[error("release conditions not met")]
    ConditionsNotMet,

    #[error("amount overflow")]
    AmountOverflow,

    /// The requested expiry is not after the current ledger time.
    #[error("expiry {expires_at} is not after ledger time {now}")]
    ExpiryInPast { expires_at: u64, now: u64 },

    /// The escrow's expiry passed. Only a refund remains.
    #[error("escrow has expired")]
    EscrowExpired,

    #[error("batch of {size} exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("batch is empty")]
    EmptyBatch,

    #[error("escrow {escrow_id} appears twice in the batch")]
    DuplicateEscrowId { escrow_id: u64 },

    // -- Plumbing ----------------------------------------------------------
    #[error("storage error: {0}")]
    Storage(String),

    /// The call payload did not decode.
    #[error("invalid call payload")]
    InvalidCall,
}

impl ContractError {
    /// Stable numeric code. Lifecycle 1xx, escrow 2xx, plumbing 3xx.
    pub fn code(&self) -> u32 {
        match self {
            ContractError::UpgradeFailed => 100,
            ContractError::Unauthorized => 101,
            ContractError::ContractPaused => 102,
            ContractError::AlreadyPaused => 103,
            ContractError::NotPaused => 104,
            ContractError::MigrationFailed { .. } => 105,
            ContractError::VersionMismatch { .. } => 106,
            ContractError::AlreadyInitialized => 107,
            ContractError::NotInitialized => 108,
            ContractError::InvalidAmount => 200,
            ContractError::OverFunded { .. } => 201,
            ContractError::InsufficientFunds { .. } => 202,
            ContractError::EscrowClosed => 203,
            ContractError::EscrowNotFound => 204,
            ContractError::InvalidState { .. } => 205,
            ContractError::ConditionsNotMet => 206,
            ContractError::AmountOverflow => 207,
            ContractError::ExpiryInPast { .. } => 208,
            ContractError::EscrowExpired => 209,
            ContractError::BatchTooLarge { .. } => 210,
            ContractError::EmptyBatch => 211,
            ContractError::DuplicateEscrowId { .. } => 212,
            ContractError::Storage(_) => 300,
            ContractError::InvalidCall => 301,
        }
    }

    /// Reason string surfaced as the ledger rejection code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ContractError::UpgradeFailed => "upgrade_failed",
            ContractError::Unauthorized => "unauthorized",
            ContractError::ContractPaused => "contract_paused",
            ContractError::AlreadyPaused => "already_paused",
            ContractError::NotPaused => "not_paused",
            ContractError::MigrationFailed { .. } => "migration_failed",
            ContractError::VersionMismatch { .. } => "version_mismatch",
            ContractError::AlreadyInitialized => "already_initialized",
            ContractError::NotInitialized => "not_initialized",
            ContractError::InvalidAmount => "invalid_amount",
            ContractError::OverFunded { .. } => "over_funded",
            ContractError::InsufficientFunds { .. } => "insufficient_funds",
            ContractError::EscrowClosed => "escrow_closed",
            ContractError::EscrowNotFound => "escrow_not_found",
            ContractError::InvalidState { .. } => "invalid_state",
            ContractError::ConditionsNotMet => "conditions_not_met",
            ContractError::AmountOverflow => "amount_overflow",
            ContractError::ExpiryInPast { .. } => "expiry_in_past",
            ContractError::EscrowExpired => "escrow_expired",
            ContractError::BatchTooLarge { .. } => "batch_too_large",
            ContractError::EmptyBatch => "empty_batch",
            ContractError::DuplicateEscrowId { .. } => "duplicate_escrow_id",
            ContractError::Storage(_) => "storage_error",
            ContractError::InvalidCall => "invalid_call",
        }
    }
}

/// Shorthand for contract entry points.
pub type ContractResult<T> = Result<T, ContractError>;
