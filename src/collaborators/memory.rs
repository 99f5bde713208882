//! In-memory collaborators
//!
//! Used by tests and by deployments that load reference data at start-up.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AccountStore, Action, Authorizer, CollaboratorError, DebitOutcome, Decision,
    PeriodLockCalendar, WatchListSource,
};
use crate::domain::{
    AccountSnapshot, AccountingPeriod, ActorId, Currency, DebitRecord, PeriodLock,
    SanctionsListEntry,
};

// =========================================================================
// Accounts
// =========================================================================

/// Account balances held in a map.
///
/// Lock order is accounts, then debits.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountStore {
    accounts: Arc<RwLock<HashMap<Uuid, AccountSnapshot>>>,
    debits: Arc<RwLock<HashMap<(Uuid, Uuid), DebitRecord>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an account with the given balance and no overdraft
    pub async fn open(&self, currency: Currency, balance: Decimal) -> Uuid {
        let snapshot = AccountSnapshot {
            id: Uuid::new_v4(),
            currency,
            balance,
            overdraft_limit: Decimal::ZERO,
            held: Decimal::ZERO,
            version: 1,
        };
        let id = snapshot.id;
        self.insert(snapshot).await;
        id
    }

    pub async fn insert(&self, snapshot: AccountSnapshot) {
        self.accounts.write().await.insert(snapshot.id, snapshot);
    }

    /// Post an external movement to the account, bumping its version
    pub async fn post(&self, account_id: Uuid, delta: Decimal) -> Result<(), CollaboratorError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&account_id)
            .ok_or(CollaboratorError::AccountNotFound(account_id))?;
        account.balance += delta;
        account.version += 1;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn snapshot(&self, account_id: Uuid) -> Result<AccountSnapshot, CollaboratorError> {
        self.accounts
            .read()
            .await
            .get(&account_id)
            .cloned()
            .ok_or(CollaboratorError::AccountNotFound(account_id))
    }

    async fn debit(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
        expected_version: i64,
    ) -> Result<DebitOutcome, CollaboratorError> {
        let mut accounts = self.accounts.write().await;
        let mut debits = self.debits.write().await;
        let account = accounts
            .get_mut(&account_id)
            .ok_or(CollaboratorError::AccountNotFound(account_id))?;

        if let Some(record) = debits.get(&(account_id, payment_id)) {
            return Ok(DebitOutcome::AlreadyApplied(record.clone()));
        }
        if account.version != expected_version {
            return Ok(DebitOutcome::Conflict {
                current_version: account.version,
            });
        }

        *account = account.debited(amount);
        debits.insert(
            (account_id, payment_id),
            DebitRecord {
                account_id,
                payment_id,
                amount,
                balance_after: account.balance,
                version_after: account.version,
                applied_at: Utc::now(),
            },
        );
        Ok(DebitOutcome::Applied(account.clone()))
    }

    async fn applied_debit(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<DebitRecord>, CollaboratorError> {
        Ok(self
            .debits
            .read()
            .await
            .get(&(account_id, payment_id))
            .cloned())
    }
}

// =========================================================================
// Authorization
// =========================================================================

/// Grants actions per actor.
#[derive(Debug, Clone, Default)]
pub struct RoleAuthorizer {
    allow_all: bool,
    grants: Arc<RwLock<HashMap<ActorId, HashSet<Action>>>>,
}

impl RoleAuthorizer {
    /// Deny everything until granted
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow every actor every action
    pub fn permissive() -> Self {
        Self {
            allow_all: true,
            ..Self::default()
        }
    }

    pub async fn grant(&self, actor: impl Into<ActorId>, actions: &[Action]) {
        self.grants
            .write()
            .await
            .entry(actor.into())
            .or_default()
            .extend(actions.iter().copied());
    }

    pub async fn revoke(&self, actor: &ActorId, action: Action) {
        if let Some(actions) = self.grants.write().await.get_mut(actor) {
            actions.remove(&action);
        }
    }
}

#[async_trait]
impl Authorizer for RoleAuthorizer {
    async fn authorize(
        &self,
        actor: &ActorId,
        action: Action,
    ) -> Result<Decision, CollaboratorError> {
        if self.allow_all {
            return Ok(Decision::Allow);
        }

        let allowed = self
            .grants
            .read()
            .await
            .get(actor)
            .is_some_and(|actions| actions.contains(&action));

        Ok(if allowed { Decision::Allow } else { Decision::Deny })
    }
}

// =========================================================================
// Watch list
// =========================================================================

/// Watch list file layout
#[derive(Debug, Deserialize)]
struct WatchListFile {
    version: String,
    entries: Vec<SanctionsListEntry>,
}

/// Published watch-list versions kept in memory; the last one is current.
#[derive(Debug, Clone)]
pub struct StaticWatchList {
    versions: Arc<RwLock<Vec<(String, Vec<SanctionsListEntry>)>>>,
}

impl StaticWatchList {
    pub fn new(version: impl Into<String>, entries: Vec<SanctionsListEntry>) -> Self {
        let version = version.into();
        let entries = stamp_version(&version, entries);
        Self {
            versions: Arc::new(RwLock::new(vec![(version, entries)])),
        }
    }

    /// Load `{"version": "...", "entries": [...]}` from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CollaboratorError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CollaboratorError::WatchListLoad(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CollaboratorError> {
        let file: WatchListFile = serde_json::from_str(raw)
            .map_err(|e| CollaboratorError::WatchListLoad(e.to_string()))?;

        tracing::info!(
            version = %file.version,
            entries = file.entries.len(),
            "Watch list loaded"
        );

        Ok(Self::new(file.version, file.entries))
    }

    /// Publish a new version, which becomes current
    pub async fn publish(&self, version: impl Into<String>, entries: Vec<SanctionsListEntry>) {
        let version = version.into();
        let entries = stamp_version(&version, entries);
        self.versions.write().await.push((version, entries));
    }
}

fn stamp_version(version: &str, entries: Vec<SanctionsListEntry>) -> Vec<SanctionsListEntry> {
    entries
        .into_iter()
        .map(|mut entry| {
            entry.list_version = version.to_string();
            entry
        })
        .collect()
}

#[async_trait]
impl WatchListSource for StaticWatchList {
    async fn current_version(&self) -> Result<String, CollaboratorError> {
        self.versions
            .read()
            .await
            .last()
            .map(|(version, _)| version.clone())
            .ok_or_else(|| CollaboratorError::Unavailable("watch list is empty".to_string()))
    }

    async fn entries(
        &self,
        list_version: &str,
    ) -> Result<Vec<SanctionsListEntry>, CollaboratorError> {
        self.versions
            .read()
            .await
            .iter()
            .find(|(version, _)| version == list_version)
            .map(|(_, entries)| entries.clone())
            .ok_or_else(|| CollaboratorError::UnknownListVersion(list_version.to_string()))
    }
}

// =========================================================================
// Period locks
// =========================================================================

/// Period lock states in a map; unknown periods are open.
#[derive(Debug, Clone, Default)]
pub struct PeriodLockRegistry {
    locks: Arc<RwLock<HashMap<AccountingPeriod, PeriodLock>>>,
}

impl PeriodLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, period: AccountingPeriod, by: impl Into<ActorId>) {
        let lock = PeriodLock::locked(period, by.into(), Utc::now());
        self.locks.write().await.insert(period, lock);
    }

    pub async fn unlock(&self, period: AccountingPeriod) {
        self.locks
            .write()
            .await
            .insert(period, PeriodLock::open(period));
    }
}

#[async_trait]
impl PeriodLockCalendar for PeriodLockRegistry {
    async fn is_locked(&self, value_date: NaiveDate) -> Result<bool, CollaboratorError> {
        let period = AccountingPeriod::containing(value_date);
        Ok(self
            .locks
            .read()
            .await
            .get(&period)
            .is_some_and(|lock| lock.locked))
    }
}
