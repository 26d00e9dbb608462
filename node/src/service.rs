//! # Remittance Service
//!
//! The off-chain caller of the escrow contract. It turns request
//! descriptors into contract invocations, signs them with a key it was
//! handed (or returns them unsigned for an external signer), submits under
//! the per-account lock, and keeps the payment mirror in step with what the
//! ledger reports back.
//!
//! ## Retry policy
//!
//! - `Sequence`: re-fetch the account, rebuild, re-sign, resubmit. Bounded
//!   by `sequence_retries`. Only possible when the service holds the key.
//! - `Network`: look the transaction up by hash. Found means it landed and
//!   is treated as success. Not found is surfaced to the caller.
//! - `Validation`, `Auth`, `LedgerRejection`: surfaced verbatim.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use remit_contracts::{CodeHash, ContractCall, EscrowStatus};
use remit_protocol::address::Address;
use remit_protocol::asset::AssetResolver;
use remit_protocol::config::NetworkConfig;
use remit_protocol::crypto::keys::Keypair;
use remit_protocol::error::RemitError;
use remit_protocol::ledger::{
    Account, AccountInfo, AccountQueue, LedgerClient, LedgerSubmitter, TransactionRecord,
};
use remit_protocol::transaction::{Amount, Signer, TimeBounds, TransactionBuilder, TransactionEnvelope};

use crate::metrics::SharedMetrics;
use crate::mirror::{
    ApplyOutcome, Confirmation, MirrorRecord, MirrorStatus, NewRemittance, PaymentMirror,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Remit(#[from] RemitError),

    #[error("remittance not found: {0}")]
    NotFound(Uuid),

    /// The request does not fit the record's current state.
    #[error("{0}")]
    Conflict(String),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Inbound descriptor for a new remittance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemittanceRequest {
    pub sender: String,
    pub recipient: String,
    #[serde(default)]
    pub asset_code: String,
    #[serde(default)]
    pub issuer: Option<String>,
    /// Decimal units, e.g. `"25.5"`.
    pub amount: String,
    /// Release conditions as JSON. Stored on the escrow as opaque bytes.
    #[serde(default)]
    pub conditions: Option<serde_json::Value>,
    #[serde(default)]
    pub releaser: Option<String>,
    /// Ledger time, unix seconds, after which the escrow only refunds.
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub memo: Option<String>,
    /// Sender's secret key. When absent the envelope comes back unsigned.
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// Body of a funding, release, or refund request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepRequest {
    /// Decimal units. Absent means whatever deposit is still missing when
    /// funding and the whole escrowed balance when releasing or refunding.
    #[serde(default)]
    pub amount: Option<String>,
    /// Signer of the step. Defaults to the sender for funding and to the
    /// node admin for release and refund.
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// What every remittance step returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub mirror_id: Uuid,
    pub status: MirrorStatus,
    pub tx_hash: String,
    /// The unsigned envelope, hex-encoded, when the caller must sign.
    pub envelope: Option<String>,
    pub escrow_id: Option<u64>,
    pub escrow_status: Option<EscrowStatus>,
}

/// Events pushed to WebSocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A transaction sent or observed by the node was applied.
    TransactionApplied { hash: String, ledger: u64 },
    /// A mirror record moved.
    RemittanceUpdated {
        mirror_id: Uuid,
        status: MirrorStatus,
        escrow_status: Option<EscrowStatus>,
    },
}

/// Runtime knobs of the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub network: NetworkConfig,
    pub sequence_retries: u32,
    /// Upper time bound given to every envelope.
    pub tx_validity: Duration,
}

/// A step handed out for external signing, kept so it can be rebuilt.
#[derive(Debug, Clone)]
struct PreparedStep {
    source: Address,
    call: Vec<u8>,
    memo: Option<String>,
    tx_hash: String,
}

enum Signing {
    External,
    /// The node's own admin key.
    Admin,
    Key(Keypair),
}

enum StepKind {
    Fund,
    Release,
    Refund,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct RemittanceService {
    config: ServiceConfig,
    resolver: AssetResolver,
    signer: Signer,
    submitter: LedgerSubmitter,
    queue: AccountQueue,
    mirror: PaymentMirror,
    prepared: DashMap<Uuid, PreparedStep>,
    contract: Address,
    admin: Keypair,
    metrics: SharedMetrics,
    events: broadcast::Sender<NodeEvent>,
}

impl RemittanceService {
    pub fn new(
        config: ServiceConfig,
        client: Arc<dyn LedgerClient>,
        contract: Address,
        admin: Keypair,
        metrics: SharedMetrics,
        events: broadcast::Sender<NodeEvent>,
    ) -> Self {
        Self {
            resolver: AssetResolver::from(&config.network),
            signer: Signer::new(config.network.passphrase.clone()),
            submitter: LedgerSubmitter::from_config(client, &config.network),
            queue: AccountQueue::new(),
            mirror: PaymentMirror::new(),
            prepared: DashMap::new(),
            contract,
            admin,
            metrics,
            events,
            config,
        }
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.config.network
    }

    pub fn admin_address(&self) -> Address {
        self.admin.address()
    }

    pub fn mirror(&self) -> &PaymentMirror {
        &self.mirror
    }

    pub fn remittance(&self, id: &Uuid) -> Result<MirrorRecord, ServiceError> {
        self.mirror.get(id).ok_or(ServiceError::NotFound(*id))
    }

    pub async fn account(&self, address: &Address) -> Result<AccountInfo, RemitError> {
        self.submitter.account(address).await
    }

    pub async fn transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, RemitError> {
        self.submitter.transaction(hash).await
    }

    /// Relays any signed envelope to the ledger. Outstanding mirror steps it
    /// happens to complete are picked up by the next confirmation poll.
    pub async fn submit_transaction(&self, encoded: &str) -> Result<String, RemitError> {
        let envelope = TransactionEnvelope::from_encoded(encoded)?;
        let _guard = self.queue.lock(&envelope.body.source).await;
        let started = Instant::now();
        let outcome = self.submitter.submit(&envelope).await;
        self.metrics
            .submission_latency_seconds
            .observe(started.elapsed().as_secs_f64());
        self.metrics.record_submission(&outcome);
        outcome
    }

    // -- remittance steps ---------------------------------------------------

    /// Opens a remittance: validates the descriptor, records it in the
    /// mirror, and builds the `create_escrow` invocation.
    pub async fn create_remittance(&self, req: RemittanceRequest) -> Result<StepOutcome, ServiceError> {
        let sender = Address::parse(&req.sender)?;
        let recipient = Address::parse(&req.recipient)?;
        let asset = self.resolver.resolve(&req.asset_code, req.issuer.as_deref())?;
        let amount = Amount::parse(&req.amount)?;
        let releaser = req.releaser.as_deref().map(Address::parse).transpose()?;
        let conditions = match &req.conditions {
            Some(value) if !value.is_null() => serde_json::to_vec(value)
                .map_err(|e| RemitError::Validation(format!("conditions: {}", e)))?,
            _ => Vec::new(),
        };
        let signing = self.signing_for(&sender, req.secret_key.as_deref())?;

        let record = self.mirror.insert(NewRemittance {
            sender,
            recipient,
            asset: asset.clone(),
            amount: amount.stroops(),
        });
        self.metrics.remittances_created_total.inc();
        tracing::info!(
            mirror_id = %record.id,
            sender = %sender.short(),
            recipient = %recipient.short(),
            %asset,
            %amount,
            "remittance opened"
        );

        let call = ContractCall::CreateEscrow {
            sender,
            recipient,
            asset,
            amount: amount.stroops(),
            conditions,
            releaser,
            expires_at: req.expires_at,
        };
        self.run_step(record.id, sender, &call, req.memo, signing).await
    }

    /// Deposits into the remittance's escrow.
    pub async fn fund(&self, id: Uuid, req: StepRequest) -> Result<StepOutcome, ServiceError> {
        self.escrow_step(id, StepKind::Fund, req).await
    }

    /// Pays out to the recipient, in full or in part.
    pub async fn release(&self, id: Uuid, req: StepRequest) -> Result<StepOutcome, ServiceError> {
        self.escrow_step(id, StepKind::Release, req).await
    }

    /// Returns funds to the sender, in full or in part.
    pub async fn refund(&self, id: Uuid, req: StepRequest) -> Result<StepOutcome, ServiceError> {
        self.escrow_step(id, StepKind::Refund, req).await
    }

    /// Submits an externally signed envelope for the record's pending step.
    ///
    /// The envelope must hash to exactly the step that was handed out.
    pub async fn submit_signed(&self, id: Uuid, encoded: &str) -> Result<StepOutcome, ServiceError> {
        self.remittance(&id)?;
        let prepared = self
            .prepared
            .get(&id)
            .map(|p| p.clone())
            .ok_or_else(|| ServiceError::Conflict("no step is waiting for a signature".into()))?;

        let envelope = TransactionEnvelope::from_encoded(encoded)?;
        let hash = envelope.hash_hex(self.signer.passphrase())?;
        if hash != prepared.tx_hash {
            return Err(ServiceError::Conflict(
                "envelope does not match the prepared step".into(),
            ));
        }

        let _guard = self.queue.lock(&prepared.source).await;
        match self.submit_and_resolve(Some(id), &envelope).await {
            Ok(record) => {
                self.prepared.remove(&id);
                Ok(self.reflect(id, &record))
            }
            Err(e) => {
                self.mirror.record_failure(&id, &e);
                if e.is_fatal() {
                    self.prepared.remove(&id);
                }
                Err(e.into())
            }
        }
    }

    /// Rebuilds the pending step at the source account's current sequence,
    /// for an external signer whose envelope went stale.
    pub async fn rebuild_step(&self, id: Uuid) -> Result<StepOutcome, ServiceError> {
        self.remittance(&id)?;
        let prepared = self
            .prepared
            .get(&id)
            .map(|p| p.clone())
            .ok_or_else(|| ServiceError::Conflict("no step is waiting for a signature".into()))?;
        self.prepare_external(id, prepared.source, prepared.call, prepared.memo)
            .await
    }

    /// Reads back every outstanding step and applies what has landed.
    /// Steps the ledger never applied and whose time bounds have closed are
    /// expired. Returns the number of confirmations applied.
    pub async fn poll_confirmations(&self) -> usize {
        let mut applied = 0;
        let mut ledger_time = None;
        for (id, hash) in self.mirror.outstanding() {
            match self.submitter.transaction(&hash).await {
                Ok(Some(record)) => {
                    self.prepared.remove(&id);
                    self.reflect(id, &record);
                    applied += 1;
                }
                Ok(None) => {
                    let now = match ledger_time {
                        Some(now) => now,
                        None => match self.submitter.ledger_time().await {
                            Ok(now) => *ledger_time.insert(now),
                            Err(e) => {
                                tracing::warn!(error = %e, "ledger time lookup failed");
                                continue;
                            }
                        },
                    };
                    if self.mirror.expire(&id, &hash, now) {
                        self.prepared.remove(&id);
                        self.metrics.steps_expired_total.inc();
                        tracing::warn!(mirror_id = %id, tx = %hash, ledger_time = now, "pending step expired");
                        let mirrored = self.mirror.get(&id);
                        let _ = self.events.send(NodeEvent::RemittanceUpdated {
                            mirror_id: id,
                            status: MirrorStatus::Expired,
                            escrow_status: mirrored.and_then(|r| r.escrow_status),
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(mirror_id = %id, tx = %hash, error = %e, "confirmation lookup failed");
                }
            }
        }
        applied
    }

    // -- contract lifecycle (node admin) ------------------------------------

    pub async fn initialize_contract(&self) -> Result<TransactionRecord, RemitError> {
        self.invoke_as_admin(ContractCall::Initialize {
            admin: self.admin.address(),
        })
        .await
    }

    pub async fn pause(&self) -> Result<TransactionRecord, RemitError> {
        self.invoke_as_admin(ContractCall::Pause {
            admin: self.admin.address(),
        })
        .await
    }

    pub async fn unpause(&self) -> Result<TransactionRecord, RemitError> {
        self.invoke_as_admin(ContractCall::Unpause {
            admin: self.admin.address(),
        })
        .await
    }

    pub async fn upgrade(&self, new_code_hash: CodeHash) -> Result<TransactionRecord, RemitError> {
        self.invoke_as_admin(ContractCall::Upgrade {
            admin: self.admin.address(),
            new_code_hash,
        })
        .await
    }

    pub async fn migrate(&self) -> Result<TransactionRecord, RemitError> {
        self.invoke_as_admin(ContractCall::Migrate {
            admin: self.admin.address(),
        })
        .await
    }

    async fn invoke_as_admin(&self, call: ContractCall) -> Result<TransactionRecord, RemitError> {
        let bytes = encode_call(&call)?;
        tracing::info!(call = call.name(), "admin invocation");
        self.send_with_key(None, &self.admin, &bytes, None).await
    }

    // -- internals ----------------------------------------------------------

    async fn escrow_step(&self, id: Uuid, kind: StepKind, req: StepRequest) -> Result<StepOutcome, ServiceError> {
        let record = self.remittance(&id)?;
        let escrow_id = record.escrow_id.ok_or_else(|| {
            ServiceError::Conflict("escrow creation has not been confirmed yet".into())
        })?;

        let amount = req.amount.as_deref().map(Amount::parse).transpose()?;
        let caller = match req.caller.as_deref() {
            Some(addr) => Address::parse(addr)?,
            None => match kind {
                StepKind::Fund => record.sender,
                StepKind::Release | StepKind::Refund => self.admin.address(),
            },
        };
        let signing = match (&kind, req.secret_key.as_deref()) {
            (StepKind::Release | StepKind::Refund, None) if caller == self.admin.address() => {
                Signing::Admin
            }
            (_, secret) => self.signing_for(&caller, secret)?,
        };

        let call = match (kind, amount) {
            (StepKind::Fund, Some(a)) => ContractCall::Deposit {
                caller,
                escrow_id,
                amount: a.stroops(),
            },
            (StepKind::Fund, None) => {
                let remaining = record.remaining();
                if remaining == 0 {
                    return Err(ServiceError::Conflict("escrow is already fully funded".into()));
                }
                ContractCall::Deposit {
                    caller,
                    escrow_id,
                    amount: remaining,
                }
            }
            (StepKind::Release, None) => ContractCall::Release { caller, escrow_id },
            (StepKind::Release, Some(a)) => ContractCall::ReleasePartial {
                caller,
                escrow_id,
                amount: a.stroops(),
            },
            (StepKind::Refund, None) => ContractCall::Refund { caller, escrow_id },
            (StepKind::Refund, Some(a)) => ContractCall::RefundPartial {
                caller,
                escrow_id,
                amount: a.stroops(),
            },
        };
        self.run_step(id, caller, &call, None, signing).await
    }

    fn signing_for(&self, source: &Address, secret: Option<&str>) -> Result<Signing, RemitError> {
        match secret {
            None => Ok(Signing::External),
            Some(secret) => {
                let keypair =
                    Keypair::from_secret_hex(secret).map_err(|_| RemitError::InvalidSecretKey)?;
                if keypair.address() != *source {
                    return Err(RemitError::Unauthorized(format!(
                        "secret key does not belong to {}",
                        source.short()
                    )));
                }
                Ok(Signing::Key(keypair))
            }
        }
    }

    async fn run_step(
        &self,
        id: Uuid,
        source: Address,
        call: &ContractCall,
        memo: Option<String>,
        signing: Signing,
    ) -> Result<StepOutcome, ServiceError> {
        let bytes = encode_call(call)?;
        match signing {
            Signing::External => self.prepare_external(id, source, bytes, memo).await,
            Signing::Admin => self.send_step(id, &self.admin, &bytes, memo).await,
            Signing::Key(keypair) => self.send_step(id, &keypair, &bytes, memo).await,
        }
    }

    async fn send_step(
        &self,
        id: Uuid,
        keypair: &Keypair,
        call: &[u8],
        memo: Option<String>,
    ) -> Result<StepOutcome, ServiceError> {
        match self.send_with_key(Some(id), keypair, call, memo).await {
            Ok(record) => Ok(self.reflect(id, &record)),
            Err(e) => {
                self.mirror.record_failure(&id, &e);
                Err(e.into())
            }
        }
    }

    async fn prepare_external(
        &self,
        id: Uuid,
        source: Address,
        call: Vec<u8>,
        memo: Option<String>,
    ) -> Result<StepOutcome, ServiceError> {
        let account = self.submitter.account(&source).await?.to_account();
        let now = self.submitter.ledger_time().await?;
        let envelope = self.build_invocation(&account, call.clone(), memo.clone(), now)?;
        let tx_hash = envelope.hash_hex(self.signer.passphrase())?;
        let encoded = envelope.to_encoded()?;

        let status = self
            .mirror
            .prepare(&id, &tx_hash, deadline(&envelope))
            .ok_or(ServiceError::NotFound(id))?;
        self.prepared.insert(
            id,
            PreparedStep {
                source,
                call,
                memo,
                tx_hash: tx_hash.clone(),
            },
        );
        let record = self.remittance(&id)?;
        Ok(StepOutcome {
            mirror_id: id,
            status,
            tx_hash,
            envelope: Some(encoded),
            escrow_id: record.escrow_id,
            escrow_status: record.escrow_status,
        })
    }

    /// Builds the invocation, valid for `tx_validity` past ledger time `now`.
    fn build_invocation(
        &self,
        account: &Account,
        call: Vec<u8>,
        memo: Option<String>,
        now: u64,
    ) -> Result<TransactionEnvelope, RemitError> {
        let max_time = now.saturating_add(self.config.tx_validity.as_secs());
        let mut builder = TransactionBuilder::new(account)
            .network(&self.config.network)
            .invoke_contract(self.contract, call)
            .time_bounds(TimeBounds::until(max_time));
        if let Some(memo) = memo {
            builder = builder.memo_text(memo);
        }
        let envelope = builder.build()?;
        self.metrics.envelopes_built_total.inc();
        Ok(envelope)
    }

    /// Build, sign, and submit under the account lock, rebuilding on a lost
    /// sequence race.
    async fn send_with_key(
        &self,
        mirror_id: Option<Uuid>,
        keypair: &Keypair,
        call: &[u8],
        memo: Option<String>,
    ) -> Result<TransactionRecord, RemitError> {
        let source = keypair.address();
        let _guard = self.queue.lock(&source).await;

        let mut attempt = 0;
        loop {
            let account = self.submitter.account(&source).await?.to_account();
            let now = self.submitter.ledger_time().await?;
            let envelope = self.build_invocation(&account, call.to_vec(), memo.clone(), now)?;
            let signed = self
                .signer
                .sign(envelope, keypair)
                .map_err(|failure| failure.error)?;

            if let Some(id) = &mirror_id {
                let hash = signed.hash_hex(self.signer.passphrase())?;
                self.mirror.prepare(id, &hash, deadline(&signed));
            }

            match self.submit_and_resolve(mirror_id, &signed).await {
                Err(RemitError::Sequence {
                    ledger_sequence, ..
                }) if attempt < self.config.sequence_retries => {
                    attempt += 1;
                    self.metrics.sequence_retries_total.inc();
                    tracing::warn!(
                        source = %source.short(),
                        stale = account.sequence,
                        ledger_sequence,
                        attempt,
                        "sequence race lost, rebuilding"
                    );
                }
                other => return other,
            }
        }
    }

    /// One submission plus the read-back of its fate.
    async fn submit_and_resolve(
        &self,
        mirror_id: Option<Uuid>,
        envelope: &TransactionEnvelope,
    ) -> Result<TransactionRecord, RemitError> {
        let hash = envelope.hash_hex(self.signer.passphrase())?;
        let started = Instant::now();
        let outcome = self.submitter.submit(envelope).await;
        self.metrics
            .submission_latency_seconds
            .observe(started.elapsed().as_secs_f64());
        self.metrics.record_submission(&outcome);

        match outcome {
            Ok(accepted) => match self.submitter.transaction(&accepted).await? {
                Some(record) => Ok(record),
                None => {
                    if let Some(id) = &mirror_id {
                        self.mirror.mark_submitted(id, &accepted);
                    }
                    Err(RemitError::Network {
                        reason: format!("transaction {} accepted but not yet visible", accepted),
                    })
                }
            },
            Err(RemitError::Network { reason }) => match self.submitter.transaction(&hash).await {
                Ok(Some(record)) => {
                    tracing::info!(tx = %hash, "transaction landed despite a transport error");
                    Ok(record)
                }
                Ok(None) => Err(RemitError::Network { reason }),
                Err(lookup) => {
                    tracing::warn!(tx = %hash, error = %lookup, "fate lookup failed");
                    Err(RemitError::Network { reason })
                }
            },
            Err(e) => Err(e),
        }
    }

    /// Feeds an applied transaction into the mirror.
    fn reflect(&self, id: Uuid, record: &TransactionRecord) -> StepOutcome {
        let confirmation = Confirmation::from_record(record);
        let outcome = self
            .mirror
            .apply_confirmation(&id, &confirmation)
            .unwrap_or(ApplyOutcome::Stale);
        self.metrics
            .mirror_updates_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        self.metrics.ledger_height.set(record.ledger as i64);

        let mirrored = self.mirror.get(&id);
        let status = mirrored
            .as_ref()
            .map(|r| r.status)
            .unwrap_or(MirrorStatus::Confirmed);
        let escrow_id = mirrored.as_ref().and_then(|r| r.escrow_id);
        let escrow_status = mirrored.as_ref().and_then(|r| r.escrow_status);

        tracing::info!(
            mirror_id = %id,
            tx = %record.hash,
            ledger = record.ledger,
            result = outcome.as_str(),
            ?escrow_status,
            "confirmation mirrored"
        );
        // No subscribers is not an error.
        let _ = self.events.send(NodeEvent::TransactionApplied {
            hash: record.hash.clone(),
            ledger: record.ledger,
        });
        if outcome == ApplyOutcome::Applied {
            let _ = self.events.send(NodeEvent::RemittanceUpdated {
                mirror_id: id,
                status,
                escrow_status,
            });
        }

        StepOutcome {
            mirror_id: id,
            status,
            tx_hash: record.hash.clone(),
            envelope: None,
            escrow_id,
            escrow_status,
        }
    }
}

/// Upper time bound of an envelope, if it has one.
fn deadline(envelope: &TransactionEnvelope) -> Option<u64> {
    envelope
        .body
        .time_bounds
        .map(|tb| tb.max_time)
        .filter(|t| *t != 0)
}

fn encode_call(call: &ContractCall) -> Result<Vec<u8>, RemitError> {
    call.encode()
        .map_err(|e| RemitError::Encoding(e.to_string()))
}
