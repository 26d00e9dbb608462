//! Shared fixture for the node's unit tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use remit_protocol::config::{NetworkConfig, STROOPS_PER_UNIT};
use remit_protocol::crypto::keys::Keypair;
use remit_protocol::ledger::LedgerClient;

use crate::devnet::Devnet;
use crate::metrics::{NodeMetrics, SharedMetrics};
use crate::service::{NodeEvent, RemittanceService, ServiceConfig};

pub const ADMIN_SEED: [u8; 32] = [0xad; 32];
pub const ALICE_SEED: [u8; 32] = [0xa1; 32];
pub const BOB_SEED: [u8; 32] = [0xb0; 32];

pub struct Fixture {
    pub devnet: Arc<Devnet>,
    pub service: Arc<RemittanceService>,
    pub metrics: SharedMetrics,
    pub events: broadcast::Sender<NodeEvent>,
    /// Sender with 1 000 units.
    pub alice: Keypair,
    /// Recipient with 1 unit.
    pub bob: Keypair,
}

/// A bootstrapped devnet with the service talking to it directly.
pub async fn fixture() -> Fixture {
    fixture_with(|devnet| devnet.client()).await
}

/// Same as [`fixture`], with the service's ledger client chosen by `client`.
pub async fn fixture_with(client: impl FnOnce(&Devnet) -> Arc<dyn LedgerClient>) -> Fixture {
    let network = NetworkConfig::devnet();
    let devnet = Devnet::start(network.clone()).unwrap();
    let metrics: SharedMetrics = Arc::new(NodeMetrics::new());
    let (events, _) = broadcast::channel(64);

    let service = RemittanceService::new(
        ServiceConfig {
            network,
            sequence_retries: 3,
            tx_validity: Duration::from_secs(300),
        },
        client(&devnet),
        devnet.contract_address(),
        Keypair::from_seed(&ADMIN_SEED),
        metrics.clone(),
        events.clone(),
    );
    devnet.bootstrap(&service).await.unwrap();

    let alice = Keypair::from_seed(&ALICE_SEED);
    let bob = Keypair::from_seed(&BOB_SEED);
    devnet
        .ledger
        .create_account(alice.address(), 1_000 * STROOPS_PER_UNIT)
        .unwrap();
    devnet
        .ledger
        .create_account(bob.address(), STROOPS_PER_UNIT)
        .unwrap();

    Fixture {
        devnet: Arc::new(devnet),
        service: Arc::new(service),
        metrics,
        events,
        alice,
        bob,
    }
}
