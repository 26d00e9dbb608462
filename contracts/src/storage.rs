//! # Contract Storage
//!
//! A key-value store with a staging layer. Every invocation writes into the
//! stage; the host then either commits the stage into durable state or
//! throws it away. [`ContractStorage::get`] sees staged writes first, so an
//! entry point observes its own writes. Outside observers use
//! [`ContractStorage::get_committed`].
//!
//! Keys are typed. Lifecycle data and escrow data live under separate
//! enum branches, so no business key can ever alias an admin key.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ContractError, ContractResult};

/// Keys owned by the lifecycle subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LifecycleKey {
    Admin,
    Version,
    Paused,
    ActiveCode,
    PendingCode,
    MigratedVersion,
}

/// Keys owned by the escrow state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EscrowKey {
    NextId,
    Record(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageKey {
    Lifecycle(LifecycleKey),
    Escrow(EscrowKey),
}

impl From<LifecycleKey> for StorageKey {
    fn from(key: LifecycleKey) -> Self {
        StorageKey::Lifecycle(key)
    }
}

impl From<EscrowKey> for StorageKey {
    fn from(key: EscrowKey) -> Self {
        StorageKey::Escrow(key)
    }
}

/// Durable entries plus the stage of the running invocation.
///
/// `None` in the stage is a pending removal.
#[derive(Debug, Clone, Default)]
pub struct ContractStorage {
    committed: BTreeMap<StorageKey, Vec<u8>>,
    staged: BTreeMap<StorageKey, Option<Vec<u8>>>,
}

impl ContractStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn raw(&self, key: &StorageKey) -> Option<&[u8]> {
        match self.staged.get(key) {
            Some(Some(bytes)) => Some(bytes.as_slice()),
            Some(None) => None,
            None => self.committed.get(key).map(Vec::as_slice),
        }
    }

    /// Reads and decodes `key`. `Ok(None)` if absent.
    pub fn get<T: DeserializeOwned>(&self, key: impl Into<StorageKey>) -> ContractResult<Option<T>> {
        let key = key.into();
        decode(&key, self.raw(&key))
    }

    /// Reads and decodes the durable value of `key`, ignoring the stage.
    pub fn get_committed<T: DeserializeOwned>(
        &self,
        key: impl Into<StorageKey>,
    ) -> ContractResult<Option<T>> {
        let key = key.into();
        decode(&key, self.committed.get(&key).map(Vec::as_slice))
    }

    pub fn has(&self, key: impl Into<StorageKey>) -> bool {
        self.raw(&key.into()).is_some()
    }

    /// Stages a write.
    pub fn set<T: Serialize>(&mut self, key: impl Into<StorageKey>, value: &T) -> ContractResult<()> {
        let key = key.into();
        let bytes = bincode::serialize(value)
            .map_err(|e| ContractError::Storage(format!("encode {:?}: {}", key, e)))?;
        self.staged.insert(key, Some(bytes));
        Ok(())
    }

    /// Stages a removal.
    pub fn remove(&mut self, key: impl Into<StorageKey>) {
        self.staged.insert(key.into(), None);
    }

    /// Whether the running invocation has written anything.
    pub fn is_dirty(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Makes staged writes durable.
    pub fn commit(&mut self) {
        for (key, value) in std::mem::take(&mut self.staged) {
            match value {
                Some(bytes) => {
                    self.committed.insert(key, bytes);
                }
                None => {
                    self.committed.remove(&key);
                }
            }
        }
    }

    /// Discards staged writes.
    pub fn rollback(&mut self) {
        self.staged.clear();
    }

    /// Number of durable entries.
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}

fn decode<T: DeserializeOwned>(key: &StorageKey, bytes: Option<&[u8]>) -> ContractResult<Option<T>> {
    bytes
        .map(|bytes| {
            bincode::deserialize(bytes)
                .map_err(|e| ContractError::Storage(format!("decode {:?}: {}", key, e)))
        })
        .transpose()
}
