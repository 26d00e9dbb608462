//! Envelope submission with a deadline.
//!
//! The submitter sends exactly once. A timeout is reported as a
//! [`RemitError::Network`] failure because the envelope may or may not have
//! been applied; callers resolve that by looking the hash up with
//! [`LedgerSubmitter::transaction`], never by blindly resubmitting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{AccountInfo, LedgerClient, TransactionRecord};
use crate::address::Address;
use crate::config::NetworkConfig;
use crate::error::RemitError;
use crate::transaction::envelope::TransactionEnvelope;

/// Sends signed envelopes to a [`LedgerClient`].
#[derive(Clone)]
pub struct LedgerSubmitter {
    client: Arc<dyn LedgerClient>,
    timeout: Duration,
}

impl LedgerSubmitter {
    pub fn new(client: Arc<dyn LedgerClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Uses the submit timeout configured for the network.
    pub fn from_config(client: Arc<dyn LedgerClient>, config: &NetworkConfig) -> Self {
        Self::new(client, config.submit_timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submits once and returns the transaction hash.
    ///
    /// Unsigned envelopes are refused locally with [`RemitError::Unauthorized`].
    pub async fn submit(&self, envelope: &TransactionEnvelope) -> Result<String, RemitError> {
        if !envelope.is_signed() {
            return Err(RemitError::Unauthorized("envelope carries no signatures".into()));
        }

        let started = Instant::now();
        let source = envelope.body.source.short();
        let sequence = envelope.body.sequence;

        let outcome = match tokio::time::timeout(self.timeout, self.client.submit(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(RemitError::Network {
                reason: format!("no response within {:?}", self.timeout),
            }),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(hash) => tracing::info!(
                %source,
                sequence,
                tx = %hash,
                elapsed_ms,
                "envelope accepted"
            ),
            Err(e) => tracing::warn!(
                %source,
                sequence,
                class = %e.class(),
                code = e.reason_code().unwrap_or("-"),
                elapsed_ms,
                error = %e,
                "envelope not accepted"
            ),
        }
        outcome
    }

    /// Decodes a hex envelope and submits it.
    pub async fn submit_encoded(&self, encoded: &str) -> Result<String, RemitError> {
        let envelope = TransactionEnvelope::from_encoded(encoded)?;
        self.submit(&envelope).await
    }

    pub async fn account(&self, address: &Address) -> Result<AccountInfo, RemitError> {
        self.client.account(address).await
    }

    /// Authoritative lookup of a submitted transaction.
    pub async fn transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, RemitError> {
        self.client.transaction(hash).await
    }

    /// Close time of the latest ledger, unix seconds.
    pub async fn ledger_time(&self) -> Result<u64, RemitError> {
        self.client.ledger_time().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;
    use crate::crypto::keys::Keypair;
    use crate::ledger::memory::{Fault, MemoryLedger};
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::signing::Signer;

    fn fixture() -> (Arc<MemoryLedger>, LedgerSubmitter, TransactionEnvelope) {
        let ledger = Arc::new(MemoryLedger::new(NetworkConfig::devnet()));
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        ledger.create_account(alice.address(), 50_000_000).unwrap();
        ledger.create_account(bob.address(), 0).unwrap();

        let acct = crate::ledger::Account::new(alice.address(), 0);
        let env = TransactionBuilder::new(&acct)
            .payment(bob.address().to_string(), Asset::Native, "1")
            .build()
            .unwrap();
        let env = Signer::new(&ledger.config().passphrase).sign(env, &alice).unwrap();
        let submitter = LedgerSubmitter::new(ledger.clone(), Duration::from_secs(5));
        (ledger, submitter, env)
    }

    #[tokio::test]
    async fn unsigned_envelope_refused_locally() {
        let (ledger, submitter, mut env) = fixture();
        env.signatures.clear();
        let err = submitter.submit(&env).await.unwrap_err();
        assert!(matches!(err, RemitError::Unauthorized(_)));
        assert_eq!(ledger.transaction_count(), 0);
    }

    #[tokio::test]
    async fn accepted_hash_matches_local_hash() {
        let (ledger, submitter, env) = fixture();
        let hash = submitter.submit(&env).await.unwrap();
        assert_eq!(hash, env.hash_hex(&ledger.config().passphrase).unwrap());
        assert!(submitter.transaction(&hash).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retryable_and_requery_finds_applied_tx() {
        let (ledger, submitter, env) = fixture();
        ledger.inject_fault(Fault::SlowResponse(Duration::from_secs(60)));

        let err = submitter.submit(&env).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, RemitError::Network { .. }));

        let hash = env.hash_hex(&ledger.config().passphrase).unwrap();
        let record = submitter.transaction(&hash).await.unwrap();
        assert!(record.is_some(), "slow ledger still applied the envelope");
    }

    #[tokio::test]
    async fn encoded_submission_decodes_first() {
        let (_, submitter, env) = fixture();
        let err = submitter.submit_encoded("zz").await.unwrap_err();
        assert!(matches!(err, RemitError::Encoding(_)));
        assert!(submitter
            .submit_encoded(&env.to_encoded().unwrap())
            .await
            .is_ok());
    }
}
