//! # Devnet
//!
//! A single-process network: an in-memory ledger with the remittance
//! contract deployed at a fixed address, plus the code registry upgrades
//! are drawn from.

use std::sync::Arc;

use remit_contracts::{CodeHash, CodeRegistry, ContractResult, RemittanceContract, StandardCode};
use remit_protocol::address::Address;
use remit_protocol::asset::Asset;
use remit_protocol::config::{NetworkConfig, DEVNET_FAUCET_AMOUNT};
use remit_protocol::error::RemitError;
use remit_protocol::ledger::{LedgerClient, MemoryLedger, TransactionRecord};

use crate::service::RemittanceService;

/// Deployment seed of the hub contract.
pub const CONTRACT_SEED: &[u8] = b"remittance-hub";

/// Label of the code the contract is deployed with.
pub const GENESIS_CODE: &str = "remit-escrow-v1";

pub struct Devnet {
    pub ledger: Arc<MemoryLedger>,
    pub contract: Arc<RemittanceContract>,
    pub registry: CodeRegistry,
}

impl Devnet {
    /// Builds the ledger and deploys the contract. It still needs
    /// [`bootstrap`](Self::bootstrap) before it accepts business calls.
    pub fn start(config: NetworkConfig) -> Result<Self, RemitError> {
        let ledger = Arc::new(MemoryLedger::new(config));
        let registry = CodeRegistry::new();
        let genesis = registry.upload(Arc::new(StandardCode::new(GENESIS_CODE)));

        let address = Address::contract(CONTRACT_SEED);
        let contract = RemittanceContract::deploy(address, registry.clone(), genesis)
            .map_err(|e| RemitError::Validation(format!("contract deployment: {}", e)))?;
        let contract = Arc::new(contract);
        ledger.register_contract(address, contract.clone())?;

        tracing::info!(contract = %address, code = %genesis, "devnet contract deployed");
        Ok(Self {
            ledger,
            contract,
            registry,
        })
    }

    pub fn client(&self) -> Arc<dyn LedgerClient> {
        self.ledger.clone()
    }

    pub fn contract_address(&self) -> Address {
        *self.contract.address()
    }

    /// Funds the node admin and initializes the contract with it.
    pub async fn bootstrap(&self, service: &RemittanceService) -> Result<TransactionRecord, RemitError> {
        let admin = service.admin_address();
        self.ledger.fund(admin, Asset::Native, DEVNET_FAUCET_AMOUNT)?;
        let record = service.initialize_contract().await?;
        tracing::info!(admin = %admin.short(), ledger = record.ledger, "devnet contract initialized");
        Ok(record)
    }

    /// Faucet: credits `amount` of `asset` to `address`, opening the account
    /// if needed. Returns the new balance.
    pub fn fund(&self, address: Address, asset: Asset, amount: u64) -> Result<u64, RemitError> {
        let balance = self.ledger.fund(address, asset.clone(), amount)?;
        tracing::info!(account = %address.short(), %asset, amount, balance, "faucet payout");
        Ok(balance)
    }

    /// Uploads another build of the standard code, the way a deployer
    /// publishes a new release before upgrading.
    pub fn upload_code(&self, label: &str) -> CodeHash {
        let hash = self.registry.upload(Arc::new(StandardCode::new(label)));
        tracing::info!(label, code = %hash, "code uploaded");
        hash
    }

    /// Snapshot of the contract's committed lifecycle state.
    pub fn contract_info(&self) -> ContractResult<ContractInfo> {
        let snapshot = self.contract.lifecycle()?;
        Ok(ContractInfo {
            address: self.contract_address(),
            admin: snapshot.admin,
            version: snapshot.version,
            paused: snapshot.paused,
            active_code_hash: snapshot.active_code_hash,
            pending_code_hash: snapshot.pending_code_hash,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContractInfo {
    pub address: Address,
    pub admin: Address,
    pub version: u32,
    pub paused: bool,
    pub active_code_hash: CodeHash,
    pub pending_code_hash: Option<CodeHash>,
}
