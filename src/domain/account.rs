//! Account Snapshot
//!
//! Point-in-time view of a debit account as reported by the account store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amount::Currency;

/// Balance view of an account at a given version.
///
/// `version` increases with every committed debit and is passed back to the
/// store so a debit computed from a stale snapshot is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: Uuid,
    pub currency: Currency,
    pub balance: Decimal,
    pub overdraft_limit: Decimal,
    pub held: Decimal,
    pub version: i64,
}

impl AccountSnapshot {
    /// `balance + overdraft_limit - held`
    pub fn available(&self) -> Decimal {
        self.balance + self.overdraft_limit - self.held
    }

    /// Snapshot after debiting `amount`
    pub fn debited(&self, amount: Decimal) -> Self {
        Self {
            balance: self.balance - amount,
            version: self.version + 1,
            ..self.clone()
        }
    }
}

/// A debit posted for a payment. At most one exists per payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitRecord {
    pub account_id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub version_after: i64,
    pub applied_at: DateTime<Utc>,
}
