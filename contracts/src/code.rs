//! # Executable Code
//!
//! A deployed contract keeps its state forever but can swap the logic that
//! runs against it. Logic is a [`ContractCode`] implementation identified by
//! its [`CodeHash`]; the [`CodeRegistry`] is the set of uploaded code that an
//! upgrade may point at.
//!
//! [`StandardCode`] is the stock remittance logic. New releases that need a
//! data migration implement [`ContractCode::migrate`] and keep the default
//! dispatch for everything else.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use remit_protocol::crypto::hash::sha256_multi;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::contract::{dispatch, ContractCall, ContractEnv, ContractValue};
use crate::error::ContractResult;

const CODE_HASH_DOMAIN: &[u8] = b"remit:code:";

// ---------------------------------------------------------------------------
// CodeHash
// ---------------------------------------------------------------------------

/// SHA-256 identifier of a piece of uploaded contract code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeHash([u8; 32]);

impl CodeHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodeHash({}..)", &self.to_hex()[..12])
    }
}

impl FromStr for CodeHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for CodeHash {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CodeHash {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ContractCode
// ---------------------------------------------------------------------------

/// Logic that can be installed into a deployed contract.
pub trait ContractCode: Send + Sync {
    fn code_hash(&self) -> CodeHash;

    /// Human-readable release name, for logs.
    fn label(&self) -> &str;

    /// Rewrites stored data for this release. `from_version` is the last
    /// version whose layout the data is known to have.
    fn migrate(&self, _env: &mut ContractEnv<'_>, _from_version: u32) -> ContractResult<()> {
        Ok(())
    }

    fn invoke(&self, env: &mut ContractEnv<'_>, call: ContractCall) -> ContractResult<ContractValue> {
        dispatch(self, env, call)
    }
}

/// The stock remittance logic. Releases differ only by label, and therefore
/// by hash.
#[derive(Debug, Clone)]
pub struct StandardCode {
    label: String,
    hash: CodeHash,
}

impl StandardCode {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let hash = CodeHash(sha256_multi(&[CODE_HASH_DOMAIN, label.as_bytes()]));
        Self { label, hash }
    }
}

impl ContractCode for StandardCode {
    fn code_hash(&self) -> CodeHash {
        self.hash
    }

    fn label(&self) -> &str {
        &self.label
    }
}

// ---------------------------------------------------------------------------
// CodeRegistry
// ---------------------------------------------------------------------------

/// Uploaded code, shared by every contract that may run it.
#[derive(Clone, Default)]
pub struct CodeRegistry {
    codes: Arc<RwLock<HashMap<CodeHash, Arc<dyn ContractCode>>>>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads `code` and returns its hash. Uploading twice is harmless.
    pub fn upload(&self, code: Arc<dyn ContractCode>) -> CodeHash {
        let hash = code.code_hash();
        tracing::info!(code = %hash, label = code.label(), "code uploaded");
        self.codes.write().insert(hash, code);
        hash
    }

    pub fn get(&self, hash: &CodeHash) -> Option<Arc<dyn ContractCode>> {
        self.codes.read().get(hash).cloned()
    }

    pub fn contains(&self, hash: &CodeHash) -> bool {
        self.codes.read().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.codes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.read().is_empty()
    }
}

impl fmt::Debug for CodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeRegistry")
            .field("codes", &self.codes.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
