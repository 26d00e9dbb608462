//! Transaction signing with Ed25519 keypairs.
//!
//! Signing is separate from building because the key may not be available
//! where the envelope is assembled (the client holds it, or a remote signer
//! does). The signed payload is the transaction hash for one specific
//! network passphrase.
//!
//! ## Failure contract
//!
//! Every signing entry point takes its input by value and, on *any* error,
//! hands it back untouched inside a [`SignFailure`]. Success appends exactly
//! one signature and changes nothing else.

use std::fmt;

use super::envelope::{DecoratedSignature, TransactionEnvelope};
use crate::config::MAX_SIGNATURES;
use crate::crypto::keys::{verify_signature, Keypair};
use crate::error::RemitError;

/// A signing error together with the caller's original input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignFailure<T> {
    /// The input exactly as it was passed in.
    pub original: T,
    pub error: RemitError,
}

impl<T> fmt::Display for SignFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signing failed: {}", self.error)
    }
}

impl<T: fmt::Debug> std::error::Error for SignFailure<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Signs envelopes for one network.
#[derive(Debug, Clone)]
pub struct Signer {
    passphrase: String,
}

impl Signer {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// Appends `keypair`'s signature over the envelope hash.
    ///
    /// # Errors
    ///
    /// The original envelope comes back unchanged if the passphrase is
    /// empty, the envelope has no operations, it already carries the
    /// maximum number of signatures, or this key has already signed it.
    pub fn sign(
        &self,
        envelope: TransactionEnvelope,
        keypair: &Keypair,
    ) -> Result<TransactionEnvelope, SignFailure<TransactionEnvelope>> {
        match self.signature_for(&envelope, keypair) {
            Ok(signature) => {
                let mut signed = envelope;
                signed.signatures.push(signature);
                Ok(signed)
            }
            Err(error) => Err(SignFailure {
                original: envelope,
                error,
            }),
        }
    }

    /// Like [`sign`](Self::sign) but parses a hex secret key first.
    pub fn sign_with_secret(
        &self,
        envelope: TransactionEnvelope,
        secret_hex: &str,
    ) -> Result<TransactionEnvelope, SignFailure<TransactionEnvelope>> {
        match Keypair::from_secret_hex(secret_hex) {
            Ok(keypair) => self.sign(envelope, &keypair),
            Err(_) => Err(SignFailure {
                original: envelope,
                error: RemitError::InvalidSecretKey,
            }),
        }
    }

    /// Signs an encoded envelope and returns the re-encoded result.
    ///
    /// On failure the original string is returned verbatim, including when
    /// it does not decode at all.
    pub fn sign_encoded(&self, encoded: &str, secret_hex: &str) -> Result<String, SignFailure<String>> {
        let fail = |error: RemitError| SignFailure {
            original: encoded.to_string(),
            error,
        };
        let envelope = TransactionEnvelope::from_encoded(encoded).map_err(fail)?;
        let signed = self
            .sign_with_secret(envelope, secret_hex)
            .map_err(|f| fail(f.error))?;
        signed.to_encoded().map_err(fail)
    }

    fn signature_for(
        &self,
        envelope: &TransactionEnvelope,
        keypair: &Keypair,
    ) -> Result<DecoratedSignature, RemitError> {
        if self.passphrase.is_empty() {
            return Err(RemitError::Validation("network passphrase is empty".into()));
        }
        if envelope.body.operations.is_empty() {
            return Err(RemitError::Validation("envelope has no operations".into()));
        }
        if envelope.signatures.len() >= MAX_SIGNATURES {
            return Err(RemitError::Validation(format!(
                "envelope already carries {} signatures",
                MAX_SIGNATURES
            )));
        }

        let hash = envelope.hash(&self.passphrase)?;
        let public_key = keypair.public_key_bytes();
        if signed_by(envelope, &hash, &public_key) {
            return Err(RemitError::Validation(format!(
                "envelope already signed by {}",
                keypair.address().short()
            )));
        }

        tracing::debug!(
            signer = %keypair.address().short(),
            source = %envelope.body.source.short(),
            sequence = envelope.body.sequence,
            "signing envelope"
        );

        Ok(DecoratedSignature {
            hint: keypair.address().hint(),
            signature: keypair.sign(&hash).to_vec(),
        })
    }
}

/// `true` if one of the envelope's signatures verifies under `public_key`.
///
/// The hint narrows the candidates; the signature itself is what counts.
pub fn signed_by(envelope: &TransactionEnvelope, hash: &[u8; 32], public_key: &[u8; 32]) -> bool {
    let hint = [public_key[28], public_key[29], public_key[30], public_key[31]];
    envelope
        .signatures
        .iter()
        .filter(|s| s.hint == hint)
        .any(|s| verify_signature(public_key, hash, &s.signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;
    use crate::ledger::Account;
    use crate::transaction::builder::TransactionBuilder;

    const NET: &str = "Test Network ; unit";

    fn unsigned(seq: u64) -> (TransactionEnvelope, Keypair) {
        let kp = Keypair::from_seed(&[9u8; 32]);
        let acct = Account::new(kp.address(), seq);
        let dest = Keypair::from_seed(&[8u8; 32]).address();
        let env = TransactionBuilder::new(&acct)
            .payment(dest.to_string(), Asset::Native, "3")
            .build()
            .unwrap();
        (env, kp)
    }

    #[test]
    fn sign_appends_exactly_one_verifiable_signature() {
        let (env, kp) = unsigned(1);
        let signed = Signer::new(NET).sign(env.clone(), &kp).unwrap();
        assert_eq!(signed.signatures.len(), 1);
        assert_eq!(signed.body, env.body);
        let hash = signed.hash(NET).unwrap();
        assert!(signed_by(&signed, &hash, &kp.public_key_bytes()));
    }

    #[test]
    fn signing_is_deterministic() {
        let (env, kp) = unsigned(1);
        let signer = Signer::new(NET);
        let a = signer.sign(env.clone(), &kp).unwrap();
        let b = signer.sign(env, &kp).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_encoded().unwrap(), b.to_encoded().unwrap());
    }

    #[test]
    fn signature_is_bound_to_network() {
        let (env, kp) = unsigned(1);
        let signed = Signer::new(NET).sign(env, &kp).unwrap();
        let other = signed.hash("Another Network").unwrap();
        assert!(!signed_by(&signed, &other, &kp.public_key_bytes()));
    }

    #[test]
    fn invalid_secret_returns_original() {
        let (env, _) = unsigned(1);
        let failure = Signer::new(NET)
            .sign_with_secret(env.clone(), "nope")
            .unwrap_err();
        assert_eq!(failure.original, env);
        assert_eq!(failure.error, RemitError::InvalidSecretKey);
    }

    #[test]
    fn duplicate_signer_returns_original() {
        let (env, kp) = unsigned(1);
        let signer = Signer::new(NET);
        let once = signer.sign(env, &kp).unwrap();
        let failure = signer.sign(once.clone(), &kp).unwrap_err();
        assert_eq!(failure.original, once);
    }

    #[test]
    fn empty_passphrase_returns_original() {
        let (env, kp) = unsigned(1);
        let failure = Signer::new("").sign(env.clone(), &kp).unwrap_err();
        assert_eq!(failure.original, env);
    }

    #[test]
    fn empty_operations_returns_original() {
        let (mut env, kp) = unsigned(1);
        env.body.operations.clear();
        let failure = Signer::new(NET).sign(env.clone(), &kp).unwrap_err();
        assert_eq!(failure.original, env);
    }

    #[test]
    fn signature_limit_enforced() {
        let (mut env, kp) = unsigned(1);
        env.signatures = vec![
            DecoratedSignature {
                hint: [0; 4],
                signature: vec![0; 64]
            };
            MAX_SIGNATURES
        ];
        let failure = Signer::new(NET).sign(env.clone(), &kp).unwrap_err();
        assert_eq!(failure.original, env);
    }

    #[test]
    fn encoded_signing_roundtrip_and_failure() {
        let (env, kp) = unsigned(4);
        let signer = Signer::new(NET);
        let encoded = env.to_encoded().unwrap();

        let signed = signer.sign_encoded(&encoded, &kp.secret_hex()).unwrap();
        let decoded = TransactionEnvelope::from_encoded(&signed).unwrap();
        assert_eq!(decoded.signatures.len(), 1);

        let failure = signer.sign_encoded("not an envelope", &kp.secret_hex()).unwrap_err();
        assert_eq!(failure.original, "not an envelope");
        assert!(matches!(failure.error, RemitError::Encoding(_)));

        let failure = signer.sign_encoded(&encoded, "bad").unwrap_err();
        assert_eq!(failure.original, encoded);
    }

    #[test]
    fn multiple_distinct_signers_allowed() {
        let (env, kp) = unsigned(1);
        let cosigner = Keypair::from_seed(&[5u8; 32]);
        let signer = Signer::new(NET);
        let signed = signer.sign(env, &kp).unwrap();
        let signed = signer.sign(signed, &cosigner).unwrap();
        assert_eq!(signed.signatures.len(), 2);
    }
}
