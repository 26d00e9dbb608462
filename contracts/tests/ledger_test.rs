//! The contract hosted on the in-memory ledger.
//!
//! Balances move only when the whole transaction holds: a contract call
//! whose custody transfer fails leaves both the ledger and the contract
//! exactly as they were.

use std::sync::Arc;

use remit_contracts::{
    CodeRegistry, ContractCall, ContractCode, ContractValue, EscrowStatus, RemittanceContract,
    StandardCode,
};
use remit_protocol::address::Address;
use remit_protocol::asset::Asset;
use remit_protocol::config::{NetworkConfig, STROOPS_PER_UNIT};
use remit_protocol::crypto::keys::Keypair;
use remit_protocol::error::RemitError;
use remit_protocol::ledger::{Account, LedgerClient, MemoryLedger, TransactionRecord};
use remit_protocol::transaction::{Signer, TransactionBuilder, TransactionEnvelope};

const UNIT: u64 = STROOPS_PER_UNIT;

struct Devnet {
    ledger: MemoryLedger,
    contract: Arc<RemittanceContract>,
    registry: CodeRegistry,
    signer: Signer,
    admin: Keypair,
    alice: Keypair,
    bob: Keypair,
}

impl Devnet {
    async fn start() -> Self {
        let config = NetworkConfig::devnet();
        let ledger = MemoryLedger::new(config.clone());
        let registry = CodeRegistry::new();
        let v1 = registry.upload(Arc::new(StandardCode::new("remit-escrow-v1")));
        let address = Address::contract(b"remittance-hub");
        let contract = Arc::new(RemittanceContract::deploy(address, registry.clone(), v1).unwrap());
        ledger.register_contract(address, contract.clone()).unwrap();

        let admin = Keypair::from_seed(&[0xad; 32]);
        let alice = Keypair::from_seed(&[0xa1; 32]);
        let bob = Keypair::from_seed(&[0xb0; 32]);
        ledger.create_account(admin.address(), 100 * UNIT).unwrap();
        ledger.create_account(alice.address(), 500 * UNIT).unwrap();
        ledger.create_account(bob.address(), UNIT).unwrap();

        let net = Self {
            ledger,
            contract,
            registry,
            signer: Signer::new(&config.passphrase),
            admin,
            alice,
            bob,
        };
        net.invoke(&net.admin, ContractCall::Initialize {
            admin: net.admin.address(),
        })
        .await
        .unwrap();
        net
    }

    async fn envelope(&self, keypair: &Keypair, call: &ContractCall) -> TransactionEnvelope {
        let account = self.ledger.account(&keypair.address()).await.unwrap().to_account();
        self.envelope_at(&account, keypair, call)
    }

    fn envelope_at(&self, account: &Account, keypair: &Keypair, call: &ContractCall) -> TransactionEnvelope {
        let env = TransactionBuilder::new(account)
            .invoke_contract(*self.contract.address(), call.encode().unwrap())
            .build()
            .unwrap();
        self.signer.sign(env, keypair).unwrap()
    }

    async fn invoke(&self, keypair: &Keypair, call: ContractCall) -> Result<TransactionRecord, RemitError> {
        let env = self.envelope(keypair, &call).await;
        let hash = self.ledger.submit(&env).await?;
        Ok(self.ledger.transaction(&hash).await?.expect("applied"))
    }

    fn native(&self, keypair: &Keypair) -> u64 {
        self.ledger.balance(&keypair.address(), &Asset::Native)
    }

    fn custody(&self, asset: &Asset) -> u64 {
        self.ledger.balance(self.contract.address(), asset)
    }

    async fn create(&self, amount: u64) -> u64 {
        let record = self
            .invoke(
                &self.alice,
                ContractCall::CreateEscrow {
                    sender: self.alice.address(),
                    recipient: self.bob.address(),
                    asset: Asset::Native,
                    amount,
                    conditions: vec![],
                    releaser: None,
                    expires_at: None,
                },
            )
            .await
            .unwrap();
        match serde_json::from_value(record.results[0].clone()).unwrap() {
            ContractValue::EscrowId(id) => id,
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn remittance_moves_funds_through_custody() {
    let net = Devnet::start().await;
    let alice_before = net.native(&net.alice);
    let bob_before = net.native(&net.bob);

    let id = net.create(40 * UNIT).await;
    net.invoke(
        &net.alice,
        ContractCall::Deposit {
            caller: net.alice.address(),
            escrow_id: id,
            amount: 40 * UNIT,
        },
    )
    .await
    .unwrap();
    assert_eq!(net.custody(&Asset::Native), 40 * UNIT);
    // Two transactions, one base fee each.
    assert_eq!(net.native(&net.alice), alice_before - 40 * UNIT - 200);

    let record = net
        .invoke(
            &net.admin,
            ContractCall::Release {
                caller: net.admin.address(),
                escrow_id: id,
            },
        )
        .await
        .unwrap();
    assert_eq!(record.events[0].topic, "released");
    assert_eq!(net.custody(&Asset::Native), 0);
    assert_eq!(net.native(&net.bob), bob_before + 40 * UNIT);
    assert_eq!(net.contract.escrow(id).unwrap().status, EscrowStatus::Released);
}

#[tokio::test]
async fn failed_custody_transfer_rolls_back_the_contract() {
    let net = Devnet::start().await;
    let id = net.create(10_000 * UNIT).await;
    let events_before = net.contract.events().len();
    let seq_before = net.ledger.account(&net.alice.address()).await.unwrap().sequence;
    let balance_before = net.native(&net.alice);

    let err = net
        .invoke(
            &net.alice,
            ContractCall::Deposit {
                caller: net.alice.address(),
                escrow_id: id,
                amount: 10_000 * UNIT,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), Some("op_underfunded"));

    let escrow = net.contract.escrow(id).unwrap();
    assert_eq!(escrow.funded, 0);
    assert_eq!(escrow.status, EscrowStatus::Created);
    assert_eq!(net.contract.events().len(), events_before);
    assert_eq!(net.native(&net.alice), balance_before);
    assert_eq!(
        net.ledger.account(&net.alice.address()).await.unwrap().sequence,
        seq_before
    );
}

#[tokio::test]
async fn contract_errors_surface_as_rejection_codes() {
    let net = Devnet::start().await;
    net.invoke(
        &net.admin,
        ContractCall::Pause {
            admin: net.admin.address(),
        },
    )
    .await
    .unwrap();

    let err = net
        .invoke(
            &net.alice,
            ContractCall::CreateEscrow {
                sender: net.alice.address(),
                recipient: net.bob.address(),
                asset: Asset::Native,
                amount: UNIT,
                conditions: vec![],
                releaser: None,
                expires_at: None,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.reason_code(), Some("contract_paused"));

    let err = net
        .invoke(
            &net.alice,
            ContractCall::Unpause {
                admin: net.alice.address(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), Some("unauthorized"));
}

#[tokio::test]
async fn envelope_losing_the_sequence_race_is_a_sequence_error() {
    let net = Devnet::start().await;
    let account = net.ledger.account(&net.alice.address()).await.unwrap().to_account();
    let create = |amount| ContractCall::CreateEscrow {
        sender: net.alice.address(),
        recipient: net.bob.address(),
        asset: Asset::Native,
        amount,
        conditions: vec![],
        releaser: None,
        expires_at: None,
    };

    let first = net.envelope_at(&account, &net.alice, &create(UNIT));
    let second = net.envelope_at(&account, &net.alice, &create(2 * UNIT));

    net.ledger.submit(&first).await.unwrap();
    let err = net.ledger.submit(&second).await.unwrap_err();
    assert!(matches!(
        err,
        RemitError::Sequence {
            envelope_sequence,
            ledger_sequence,
            ..
        } if envelope_sequence == account.sequence && ledger_sequence == account.sequence + 1
    ));
    assert!(err.is_retryable());
    // Only the winner's escrow exists.
    assert!(net.contract.escrow(2).is_err());
}

#[tokio::test]
async fn lifecycle_events_reach_the_ledger_record() {
    let net = Devnet::start().await;
    let unknown = StandardCode::new("never-uploaded").code_hash();
    let err = net
        .invoke(
            &net.admin,
            ContractCall::Upgrade {
                admin: net.admin.address(),
                new_code_hash: unknown,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), Some("upgrade_failed"));

    let v2 = net
        .registry
        .upload(Arc::new(StandardCode::new("remit-escrow-v2")));
    let record = net
        .invoke(
            &net.admin,
            ContractCall::Upgrade {
                admin: net.admin.address(),
                new_code_hash: v2,
            },
        )
        .await
        .unwrap();
    let topics: Vec<_> = record.events.iter().map(|e| e.topic.as_str()).collect();
    assert_eq!(topics, vec!["paused", "upgraded"]);
    assert_eq!(record.events[1].data, serde_json::json!([2, v2.to_hex()]));
    assert_eq!(record.events[1].contract, *net.contract.address());

    let record = net
        .invoke(
            &net.admin,
            ContractCall::Migrate {
                admin: net.admin.address(),
            },
        )
        .await
        .unwrap();
    let migrated = record.events.last().unwrap();
    assert_eq!(migrated.topic, "migrated");
    assert_eq!(migrated.data, serde_json::json!(2));
    assert_eq!(net.contract.active_code_hash().unwrap(), v2);
}

#[tokio::test]
async fn issued_asset_escrow_uses_the_same_custody() {
    let net = Devnet::start().await;
    let issuer = Keypair::from_seed(&[0x15; 32]);
    net.ledger.create_account(issuer.address(), 10 * UNIT).unwrap();
    let usdc = Asset::Issued {
        code: "USDC".into(),
        issuer: issuer.address(),
    };
    net.ledger
        .fund(net.alice.address(), usdc.clone(), 300 * UNIT)
        .unwrap();

    let record = net
        .invoke(
            &net.alice,
            ContractCall::CreateEscrow {
                sender: net.alice.address(),
                recipient: net.bob.address(),
                asset: usdc.clone(),
                amount: 300 * UNIT,
                conditions: vec![],
                releaser: None,
                expires_at: None,
            },
        )
        .await
        .unwrap();
    let id = match serde_json::from_value(record.results[0].clone()).unwrap() {
        ContractValue::EscrowId(id) => id,
        other => panic!("unexpected {other:?}"),
    };

    net.invoke(
        &net.alice,
        ContractCall::Deposit {
            caller: net.alice.address(),
            escrow_id: id,
            amount: 300 * UNIT,
        },
    )
    .await
    .unwrap();
    net.invoke(
        &net.admin,
        ContractCall::RefundPartial {
            caller: net.admin.address(),
            escrow_id: id,
            amount: 100 * UNIT,
        },
    )
    .await
    .unwrap();

    assert_eq!(net.custody(&usdc), 200 * UNIT);
    assert_eq!(net.ledger.balance(&net.alice.address(), &usdc), 100 * UNIT);
    assert_eq!(net.ledger.balance(&net.bob.address(), &usdc), 0);
}

#[tokio::test]
async fn batch_deposit_rolls_back_when_one_transfer_fails() {
    let net = Devnet::start().await;
    let small = net.create(10 * UNIT).await;
    let huge = net.create(10_000 * UNIT).await;
    let balance_before = net.native(&net.alice);

    let err = net
        .invoke(
            &net.alice,
            ContractCall::BatchDeposit {
                caller: net.alice.address(),
                escrow_ids: vec![small, huge],
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), Some("op_underfunded"));

    // The first transfer would have cleared on its own.
    assert_eq!(net.contract.escrow(small).unwrap().funded, 0);
    assert_eq!(net.custody(&Asset::Native), 0);
    assert_eq!(net.native(&net.alice), balance_before);
}
