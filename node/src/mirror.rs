//! # Payment Mirror
//!
//! Off-chain reflection of on-ledger escrow state, one record per
//! remittance. The ledger is the source of truth; a record only ever moves
//! in response to a confirmation read back from it.
//!
//! Confirmations are keyed by transaction hash. Applying the same hash
//! twice is a no-op. A confirmation from an older ledger than the last one
//! applied does not overwrite newer state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use remit_contracts::{ContractValue, EscrowStatus};
use remit_protocol::address::Address;
use remit_protocol::asset::Asset;
use remit_protocol::error::RemitError;
use remit_protocol::ledger::TransactionRecord;

/// Where a remittance stands from the node's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorStatus {
    /// A step is built and waiting to be signed or to land.
    Pending,
    /// The ledger accepted the step but it has not been read back yet.
    Submitted,
    /// The latest step is applied and reflected.
    Confirmed,
    /// The latest step was rejected for good.
    Failed,
    /// The latest step outlived its time bounds without landing.
    Expired,
}

/// One remittance as the node last saw it on the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub id: Uuid,
    pub sender: Address,
    pub recipient: Address,
    pub asset: Asset,
    /// Stroops.
    pub amount: u64,
    pub status: MirrorStatus,
    /// Set once the creating transaction is confirmed.
    pub escrow_id: Option<u64>,
    pub escrow_status: Option<EscrowStatus>,
    /// Stroops deposited into the escrow so far.
    pub funded: u64,
    /// Hash of the step currently in flight.
    pub pending_tx: Option<String>,
    /// Ledger time after which the step in flight can no longer apply.
    pub pending_deadline: Option<u64>,
    /// Hash of the last confirmation applied.
    pub last_tx_hash: Option<String>,
    pub last_ledger: u64,
    /// Why the latest step failed, if it did.
    pub failure: Option<String>,
    #[serde(skip)]
    applied: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MirrorRecord {
    /// Deposit still needed to fully fund the escrow.
    pub fn remaining(&self) -> u64 {
        self.amount.saturating_sub(self.funded)
    }

    /// Whether the confirmation for `tx_hash` has already been applied.
    pub fn has_applied(&self, tx_hash: &str) -> bool {
        self.applied.contains(tx_hash)
    }
}

/// What a remittance is opened with.
#[derive(Debug, Clone)]
pub struct NewRemittance {
    pub sender: Address,
    pub recipient: Address,
    pub asset: Asset,
    pub amount: u64,
}

/// The escrow-relevant facts of one applied transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: String,
    pub ledger: u64,
    pub escrow_id: Option<u64>,
    pub escrow_status: Option<EscrowStatus>,
    pub funded: Option<u64>,
}

impl Confirmation {
    /// Reads the contract's return value out of an applied transaction.
    ///
    /// An `escrow_id` result means the escrow was just created; an escrow
    /// result carries the post-call state.
    pub fn from_record(record: &TransactionRecord) -> Self {
        let value = record
            .results
            .first()
            .and_then(|v| serde_json::from_value::<ContractValue>(v.clone()).ok());
        let (escrow_id, escrow_status, funded) = match value {
            Some(ContractValue::EscrowId(id)) => (Some(id), Some(EscrowStatus::Created), Some(0)),
            Some(ContractValue::Escrow(escrow)) => {
                (Some(escrow.id), Some(escrow.status), Some(escrow.funded))
            }
            _ => (None, None, None),
        };
        Self {
            tx_hash: record.hash.clone(),
            ledger: record.ledger,
            escrow_id,
            escrow_status,
            funded,
        }
    }
}

/// Result of offering a confirmation to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Hash already applied.
    Duplicate,
    /// Older than what the record already reflects.
    Stale,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::Duplicate => "duplicate",
            ApplyOutcome::Stale => "stale",
        }
    }
}

/// Concurrent map of mirror records.
#[derive(Debug, Default)]
pub struct PaymentMirror {
    records: DashMap<Uuid, MirrorRecord>,
}

impl PaymentMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a record in `Pending` with no step in flight yet.
    pub fn insert(&self, new: NewRemittance) -> MirrorRecord {
        let now = Utc::now();
        let record = MirrorRecord {
            id: Uuid::new_v4(),
            sender: new.sender,
            recipient: new.recipient,
            asset: new.asset,
            amount: new.amount,
            status: MirrorStatus::Pending,
            escrow_id: None,
            escrow_status: None,
            funded: 0,
            pending_tx: None,
            pending_deadline: None,
            last_tx_hash: None,
            last_ledger: 0,
            failure: None,
            applied: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };
        self.records.insert(record.id, record.clone());
        record
    }

    pub fn get(&self, id: &Uuid) -> Option<MirrorRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Notes that a new step with hash `tx_hash` is in flight. `deadline`
    /// is the envelope's upper time bound, if it has one.
    pub fn prepare(&self, id: &Uuid, tx_hash: &str, deadline: Option<u64>) -> Option<MirrorStatus> {
        let mut record = self.records.get_mut(id)?;
        record.pending_tx = Some(tx_hash.to_string());
        record.pending_deadline = deadline;
        record.status = MirrorStatus::Pending;
        record.failure = None;
        record.updated_at = Utc::now();
        Some(record.status)
    }

    /// Notes that the ledger accepted `tx_hash` without it being read back.
    pub fn mark_submitted(&self, id: &Uuid, tx_hash: &str) -> Option<MirrorStatus> {
        let mut record = self.records.get_mut(id)?;
        if record.pending_tx.as_deref() == Some(tx_hash) && !record.has_applied(tx_hash) {
            record.status = MirrorStatus::Submitted;
            record.updated_at = Utc::now();
        }
        Some(record.status)
    }

    /// Applies a ledger confirmation. `None` if the record does not exist.
    pub fn apply_confirmation(&self, id: &Uuid, confirmation: &Confirmation) -> Option<ApplyOutcome> {
        let mut record = self.records.get_mut(id)?;
        let hash = &confirmation.tx_hash;

        if record.applied.contains(hash) {
            return Some(ApplyOutcome::Duplicate);
        }
        record.applied.insert(hash.clone());

        if record.pending_tx.as_deref() == Some(hash.as_str()) {
            record.pending_tx = None;
            record.pending_deadline = None;
            record.status = MirrorStatus::Confirmed;
            record.failure = None;
        }

        if confirmation.ledger < record.last_ledger {
            record.updated_at = Utc::now();
            return Some(ApplyOutcome::Stale);
        }

        if let Some(escrow_id) = confirmation.escrow_id {
            record.escrow_id = Some(escrow_id);
        }
        if let Some(status) = confirmation.escrow_status {
            record.escrow_status = Some(status);
        }
        if let Some(funded) = confirmation.funded {
            record.funded = funded;
        }
        record.last_ledger = confirmation.ledger;
        record.last_tx_hash = Some(hash.clone());
        record.updated_at = Utc::now();
        Some(ApplyOutcome::Applied)
    }

    /// Applies the outcome of a failed step.
    ///
    /// Only a fatal error fails the record. Anything retryable leaves it
    /// where it was, with the step still in flight.
    pub fn record_failure(&self, id: &Uuid, error: &RemitError) -> Option<MirrorStatus> {
        let mut record = self.records.get_mut(id)?;
        if error.is_fatal() {
            record.status = MirrorStatus::Failed;
            record.pending_tx = None;
            record.pending_deadline = None;
            record.failure = Some(error.to_string());
            record.updated_at = Utc::now();
        }
        Some(record.status)
    }

    /// Gives up on `tx_hash` once ledger time `now` is past its deadline.
    ///
    /// The caller must have just seen the ledger report the hash as not
    /// applied. Returns `true` if the step was expired.
    pub fn expire(&self, id: &Uuid, tx_hash: &str, now: u64) -> bool {
        let Some(mut record) = self.records.get_mut(id) else {
            return false;
        };
        let Some(deadline) = record.pending_deadline else {
            return false;
        };
        if record.pending_tx.as_deref() != Some(tx_hash) || now <= deadline {
            return false;
        }
        record.status = MirrorStatus::Expired;
        record.pending_tx = None;
        record.pending_deadline = None;
        record.failure = Some(format!("step {} expired at ledger time {}", tx_hash, deadline));
        record.updated_at = Utc::now();
        true
    }

    /// Records with a step in flight, as `(id, tx_hash)`.
    pub fn outstanding(&self) -> Vec<(Uuid, String)> {
        self.records
            .iter()
            .filter_map(|r| r.pending_tx.clone().map(|hash| (r.id, hash)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remit_protocol::crypto::keys::Keypair;

    fn open(mirror: &PaymentMirror) -> Uuid {
        mirror
            .insert(NewRemittance {
                sender: Keypair::from_seed(&[1; 32]).address(),
                recipient: Keypair::from_seed(&[2; 32]).address(),
                asset: Asset::Native,
                amount: 100,
            })
            .id
    }

    fn confirmation(hash: &str, ledger: u64, status: EscrowStatus) -> Confirmation {
        Confirmation {
            tx_hash: hash.into(),
            ledger,
            escrow_id: Some(1),
            escrow_status: Some(status),
            funded: None,
        }
    }

    #[test]
    fn confirming_the_pending_step() {
        let mirror = PaymentMirror::new();
        let id = open(&mirror);
        mirror.prepare(&id, "aa", None);
        assert_eq!(mirror.outstanding(), vec![(id, "aa".to_string())]);

        let outcome = mirror
            .apply_confirmation(&id, &confirmation("aa", 5, EscrowStatus::Created))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let record = mirror.get(&id).unwrap();
        assert_eq!(record.status, MirrorStatus::Confirmed);
        assert_eq!(record.escrow_id, Some(1));
        assert_eq!(record.last_tx_hash.as_deref(), Some("aa"));
        assert!(record.pending_tx.is_none());
        assert!(mirror.outstanding().is_empty());
    }

    #[test]
    fn duplicate_confirmation_is_a_no_op() {
        let mirror = PaymentMirror::new();
        let id = open(&mirror);
        mirror.prepare(&id, "aa", None);
        let c = confirmation("aa", 5, EscrowStatus::Funded);
        mirror.apply_confirmation(&id, &c);
        let before = mirror.get(&id).unwrap();

        assert_eq!(
            mirror.apply_confirmation(&id, &c),
            Some(ApplyOutcome::Duplicate)
        );
        let after = mirror.get(&id).unwrap();
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(after.escrow_status, Some(EscrowStatus::Funded));
    }

    #[test]
    fn out_of_order_confirmation_does_not_regress() {
        let mirror = PaymentMirror::new();
        let id = open(&mirror);
        mirror.apply_confirmation(&id, &confirmation("bb", 9, EscrowStatus::Released));

        let outcome = mirror
            .apply_confirmation(&id, &confirmation("aa", 7, EscrowStatus::Funded))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale);

        let record = mirror.get(&id).unwrap();
        assert_eq!(record.escrow_status, Some(EscrowStatus::Released));
        assert_eq!(record.last_ledger, 9);
        assert!(record.has_applied("aa"));
        assert_eq!(
            mirror.apply_confirmation(&id, &confirmation("aa", 7, EscrowStatus::Funded)),
            Some(ApplyOutcome::Duplicate)
        );
    }

    #[test]
    fn only_fatal_errors_fail_a_record() {
        let mirror = PaymentMirror::new();
        let id = open(&mirror);
        mirror.prepare(&id, "aa", None);

        let retryable = RemitError::Network {
            reason: "timeout".into(),
        };
        assert_eq!(
            mirror.record_failure(&id, &retryable),
            Some(MirrorStatus::Pending)
        );
        assert_eq!(mirror.outstanding().len(), 1);

        let fatal = RemitError::LedgerRejection {
            code: "escrow_closed".into(),
            detail: "escrow is closed".into(),
        };
        assert_eq!(mirror.record_failure(&id, &fatal), Some(MirrorStatus::Failed));
        let record = mirror.get(&id).unwrap();
        assert!(record.failure.unwrap().contains("escrow_closed"));
        assert!(mirror.outstanding().is_empty());
    }

    #[test]
    fn step_expires_only_past_its_deadline() {
        let mirror = PaymentMirror::new();
        let id = open(&mirror);
        mirror.prepare(&id, "aa", Some(100));

        assert!(!mirror.expire(&id, "aa", 100));
        assert!(!mirror.expire(&id, "zz", 500));
        assert_eq!(mirror.outstanding().len(), 1);

        assert!(mirror.expire(&id, "aa", 101));
        let record = mirror.get(&id).unwrap();
        assert_eq!(record.status, MirrorStatus::Expired);
        assert!(record.pending_tx.is_none());
        assert!(record.failure.unwrap().contains("expired"));
        assert!(mirror.outstanding().is_empty());

        mirror.prepare(&id, "bb", None);
        assert!(!mirror.expire(&id, "bb", u64::MAX));
        assert_eq!(mirror.get(&id).unwrap().status, MirrorStatus::Pending);
    }

    #[test]
    fn submitted_only_for_the_pending_hash() {
        let mirror = PaymentMirror::new();
        let id = open(&mirror);
        mirror.prepare(&id, "aa", None);
        assert_eq!(mirror.mark_submitted(&id, "zz"), Some(MirrorStatus::Pending));
        assert_eq!(mirror.mark_submitted(&id, "aa"), Some(MirrorStatus::Submitted));
        assert!(mirror.mark_submitted(&Uuid::new_v4(), "aa").is_none());
    }
}
