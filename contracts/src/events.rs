//! Events emitted for off-chain monitoring.

use remit_protocol::address::Address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::code::CodeHash;
use crate::escrow::EscrowStatus;

/// Which batch call produced a [`ContractEvent::Batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchKind {
    Create,
    Deposit,
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    Upgraded { version: u32, code_hash: CodeHash },
    Migrated { version: u32 },
    Paused(bool),
    EscrowCreated {
        escrow_id: u64,
        sender: Address,
        recipient: Address,
        amount: u64,
    },
    Deposited {
        escrow_id: u64,
        amount: u64,
        status: EscrowStatus,
    },
    Released {
        escrow_id: u64,
        amount: u64,
        status: EscrowStatus,
    },
    Refunded {
        escrow_id: u64,
        amount: u64,
        status: EscrowStatus,
    },
    /// Follows the per-escrow events of a batch call.
    Batch {
        kind: BatchKind,
        escrow_ids: Vec<u64>,
    },
}

impl ContractEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            ContractEvent::Upgraded { .. } => "upgraded",
            ContractEvent::Migrated { .. } => "migrated",
            ContractEvent::Paused(_) => "paused",
            ContractEvent::EscrowCreated { .. } => "escrow_created",
            ContractEvent::Deposited { .. } => "deposited",
            ContractEvent::Released { .. } => "released",
            ContractEvent::Refunded { .. } => "refunded",
            ContractEvent::Batch { kind, .. } => match kind {
                BatchKind::Create => "batch_created",
                BatchKind::Deposit => "batch_deposited",
                BatchKind::Release => "batch_released",
            },
        }
    }

    /// Event payload as monitors see it.
    ///
    /// `upgraded` is `[version, code_hash]`, `migrated` the bare version,
    /// `paused` the bare flag. Escrow events are objects. Batch events are
    /// the list of escrow ids they covered.
    pub fn data(&self) -> Value {
        match self {
            ContractEvent::Upgraded { version, code_hash } => json!([version, code_hash.to_hex()]),
            ContractEvent::Migrated { version } => json!(version),
            ContractEvent::Paused(paused) => json!(paused),
            ContractEvent::EscrowCreated {
                escrow_id,
                sender,
                recipient,
                amount,
            } => json!({
                "escrow_id": escrow_id,
                "sender": sender,
                "recipient": recipient,
                "amount": amount,
            }),
            ContractEvent::Deposited {
                escrow_id,
                amount,
                status,
            }
            | ContractEvent::Released {
                escrow_id,
                amount,
                status,
            }
            | ContractEvent::Refunded {
                escrow_id,
                amount,
                status,
            } => json!({
                "escrow_id": escrow_id,
                "amount": amount,
                "status": status,
            }),
            ContractEvent::Batch { escrow_ids, .. } => json!(escrow_ids),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_payloads() {
        let hash = CodeHash::from_bytes([0xab; 32]);
        let upgraded = ContractEvent::Upgraded {
            version: 2,
            code_hash: hash,
        };
        assert_eq!(upgraded.topic(), "upgraded");
        assert_eq!(upgraded.data(), json!([2, "ab".repeat(32)]));
        assert_eq!(ContractEvent::Migrated { version: 2 }.data(), json!(2));
        assert_eq!(ContractEvent::Paused(true).data(), json!(true));
    }

    #[test]
    fn batch_topic_names_the_call() {
        let event = ContractEvent::Batch {
            kind: BatchKind::Deposit,
            escrow_ids: vec![3, 4],
        };
        assert_eq!(event.topic(), "batch_deposited");
        assert_eq!(event.data(), json!([3, 4]));
    }

    #[test]
    fn escrow_payload_carries_status() {
        let event = ContractEvent::Released {
            escrow_id: 4,
            amount: 40,
            status: EscrowStatus::PartiallyReleased,
        };
        assert_eq!(event.data()["status"], json!("PartiallyReleased"));
        assert_eq!(event.data()["escrow_id"], json!(4));
    }
}
