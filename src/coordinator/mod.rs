//! Concurrency Coordinator
//!
//! One exclusive lock per account. Balance-affecting work on an account runs
//! while holding its guard; work on different accounts never contends.
//! Waiters are served in arrival order (`tokio::sync::Mutex` is fair).

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-account lock table
#[derive(Debug, Default)]
pub struct ConcurrencyCoordinator {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Held while an account is being worked on; released on drop.
#[derive(Debug)]
pub struct AccountGuard {
    account_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl AccountGuard {
    pub fn account_id(&self) -> Uuid {
        self.account_id
    }
}

impl ConcurrencyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `account_id`.
    pub async fn lock(&self, account_id: Uuid) -> AccountGuard {
        // Clone the handle so the map shard is not held across the await
        let lock = self.locks.entry(account_id).or_default().clone();
        let guard = lock.lock_owned().await;

        tracing::trace!(account_id = %account_id, "Account lock acquired");

        AccountGuard {
            account_id,
            _guard: guard,
        }
    }

    /// Forget locks nobody holds or waits on. Returns how many were dropped.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn tracked_accounts(&self) -> usize {
        self.locks.len()
    }
}
