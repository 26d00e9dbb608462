//! Per-account submission serialization.
//!
//! Two envelopes built concurrently from the same account read the same
//! sequence and one of them is bound to fail. Callers hold the account's
//! guard from "read sequence" to "submission resolved" so that never
//! happens inside one process. Different accounts never contend.
//!
//! An account's entry is dropped again once nobody holds or waits for it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::address::Address;

/// One async lock per source account, created on first use.
#[derive(Debug, Default)]
pub struct AccountQueue {
    locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl AccountQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `account`. Released when the guard drops.
    pub async fn lock(&self, account: &Address) -> AccountGuard<'_> {
        // The map shard must not be held across the await.
        let lock = self
            .locks
            .entry(*account)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        AccountGuard {
            queue: self,
            account: *account,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Accounts currently held or waited for.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive use of one account's sequence.
#[derive(Debug)]
pub struct AccountGuard<'a> {
    queue: &'a AccountQueue,
    account: Address,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AccountGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Cloning an entry needs the shard lock `remove_if` holds, so a count
        // of one means no task holds or awaits this lock.
        self.queue
            .locks
            .remove_if(&self.account, |_, lock| Arc::strong_count(lock) == 1);
    }
}
