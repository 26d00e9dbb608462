//! # Protocol Configuration & Constants
//!
//! Every magic number the remittance core depends on lives here: amount
//! precision, fee schedule, network passphrases, signature limits, and the
//! default timeouts callers should reach for when they have no better idea.
//!
//! The ledger rules encoded below are consensus-level facts. Changing the
//! precision or the envelope tag silently invalidates every signature ever
//! produced, so treat this file as append-mostly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::network_id;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate-level protocol version string, reported by `/status` and `version`.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Envelope-type tag mixed into every transaction hash. Keeps a transaction
/// signature from ever being valid as a signature over some other payload.
pub const ENVELOPE_TYPE_TX: u32 = 2;

// ---------------------------------------------------------------------------
// Network Passphrases
// ---------------------------------------------------------------------------

/// Public network passphrase. Signatures bound to this are real money.
pub const PUBLIC_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";

/// Test network passphrase, the default for anything that is not production.
pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

/// Passphrase of the in-process devnet hosted by `remit-node run`.
pub const DEVNET_PASSPHRASE: &str = "REMIT Devnet ; October 2026";

// ---------------------------------------------------------------------------
// Amounts & Assets
// ---------------------------------------------------------------------------

/// Fractional digits carried by every ledger amount.
pub const AMOUNT_DECIMALS: u32 = 7;

/// Smallest units ("stroops") per whole unit: 10^7.
pub const STROOPS_PER_UNIT: u64 = 10_000_000;

/// Largest representable amount. The ledger stores balances as int64.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

/// Code that denotes the native currency. Matching is case-insensitive.
pub const NATIVE_ASSET_CODE: &str = "XLM";

/// Longest issued-asset code the ledger accepts (alphanum12).
pub const MAX_ASSET_CODE_LENGTH: usize = 12;

// ---------------------------------------------------------------------------
// Transaction Limits
// ---------------------------------------------------------------------------

/// Minimum fee per operation, in stroops.
pub const BASE_FEE: u64 = 100;

/// Most signatures a single envelope may carry.
pub const MAX_SIGNATURES: usize = 20;

/// Most operations a single envelope may carry.
pub const MAX_OPERATIONS: usize = 100;

/// Text memos are capped at 28 bytes of UTF-8.
pub const MAX_MEMO_LENGTH: usize = 28;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Default bound on a single submission round trip.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the node polls the ledger for confirmations, in milliseconds.
pub const DEFAULT_CONFIRMATION_POLL_MS: u64 = 1_000;

/// How many times the caller-side policy rebuilds after a sequence collision.
pub const DEFAULT_SEQUENCE_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default port for the REST API (the original backend's `PORT`).
pub const DEFAULT_RPC_PORT: u16 = 8080;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Starting native balance handed out by the devnet faucet: 10,000 units.
pub const DEVNET_FAUCET_AMOUNT: u64 = 10_000 * STROOPS_PER_UNIT;

// ---------------------------------------------------------------------------
// NetworkConfig
// ---------------------------------------------------------------------------

/// Runtime parameters of the network a caller is talking to.
///
/// Built in `main` and handed to whoever needs it. Nothing in the core reads
/// a global network handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Passphrase hashed into the network id that every signature binds to.
    pub passphrase: String,
    /// Code that resolves to the native asset.
    pub native_code: String,
    /// Fee per operation, in stroops. Never below [`BASE_FEE`].
    pub base_fee: u64,
    /// Bound on a single submission.
    #[serde(with = "duration_secs")]
    pub submit_timeout: Duration,
}

impl NetworkConfig {
    /// Creates a config for an arbitrary passphrase with default limits.
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
            native_code: NATIVE_ASSET_CODE.to_string(),
            base_fee: BASE_FEE,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }

    /// The public test network.
    pub fn testnet() -> Self {
        Self::new(TESTNET_PASSPHRASE)
    }

    /// The single-process devnet.
    pub fn devnet() -> Self {
        Self::new(DEVNET_PASSPHRASE)
    }

    /// Overrides the per-operation fee, clamped to the network minimum.
    pub fn with_base_fee(mut self, base_fee: u64) -> Self {
        self.base_fee = base_fee.max(BASE_FEE);
        self
    }

    /// Overrides the submission timeout.
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// SHA-256 of the passphrase.
    pub fn network_id(&self) -> [u8; 32] {
        network_id(&self.passphrase)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::testnet()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
