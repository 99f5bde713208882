//! External Collaborators
//!
//! Seams to the systems the pipeline consumes but does not own: the account
//! ledger, role-based access control, the sanctions watch list and the
//! accounting period calendar.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{AccountSnapshot, ActorId, DebitRecord, SanctionsListEntry};

pub use memory::{InMemoryAccountStore, PeriodLockRegistry, RoleAuthorizer, StaticWatchList};
pub use postgres::{PgAccountStore, PgPeriodLockCalendar};

/// Collaborator failures
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Watch list version not available: {0}")]
    UnknownListVersion(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to load watch list: {0}")]
    WatchListLoad(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Result of a version-checked debit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Debit committed; snapshot after the debit
    Applied(AccountSnapshot),
    /// The payment was debited before; nothing moved this time
    AlreadyApplied(DebitRecord),
    /// The account moved on since the expected version
    Conflict { current_version: i64 },
}

/// Source of account balances.
#[async_trait]
pub trait AccountStore: Send + Sync + fmt::Debug {
    /// Current snapshot of the account
    async fn snapshot(&self, account_id: Uuid) -> Result<AccountSnapshot, CollaboratorError>;

    /// Debit `amount` for `payment_id` if the account is still at
    /// `expected_version`. A payment is debited at most once per account.
    async fn debit(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
        expected_version: i64,
    ) -> Result<DebitOutcome, CollaboratorError>;

    /// Debit already posted for `payment_id`, if any
    async fn applied_debit(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<DebitRecord>, CollaboratorError>;
}

/// Actions gated by the authorizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Approve,
    Reject,
    Export,
    OverrideSanctions,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Approve => "payment.approve",
            Action::Reject => "payment.reject",
            Action::Export => "payment.export",
            Action::OverrideSanctions => "payment.override_sanctions",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Role-based access decisions, evaluated elsewhere.
#[async_trait]
pub trait Authorizer: Send + Sync + fmt::Debug {
    async fn authorize(&self, actor: &ActorId, action: Action)
        -> Result<Decision, CollaboratorError>;
}

/// Versioned sanctions watch list.
#[async_trait]
pub trait WatchListSource: Send + Sync + fmt::Debug {
    async fn current_version(&self) -> Result<String, CollaboratorError>;

    /// Entries of the given version, in list order
    async fn entries(&self, list_version: &str)
        -> Result<Vec<SanctionsListEntry>, CollaboratorError>;
}

/// Closed accounting periods.
#[async_trait]
pub trait PeriodLockCalendar: Send + Sync + fmt::Debug {
    async fn is_locked(&self, value_date: NaiveDate) -> Result<bool, CollaboratorError>;
}
